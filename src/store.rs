use crate::config::MAX_LIFETIME_DAYS;
use crate::cookie_jar::CookieBackend;
use chrono::{DateTime, Duration, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

const PROBE_COOKIE: &str = "top_level_domain";
const PROBE_VALUE: &str = "cookie";
const EXPIRED: &str = "Thu, 01 Jan 1970 00:00:01 GMT";
const MS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

/// Bytes that would end or reshape a `name=value` cookie pair
const COOKIE_VALUE: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b',').add(b';').add(b'%').add(b'\\');

/// Domain-wide key/value storage on top of the page's cookie jar.
///
/// Values are written to the broadest domain suffix the browser accepts
/// for the current host, so pages on sibling subdomains see the same
/// record. The suffix is probed on first use and kept for the lifetime
/// of the store, which is one page view.
pub struct CookieStore<'a, B: CookieBackend> {
    backend: &'a mut B,
    hostname: String,
    now: DateTime<Utc>,
    domain: Option<String>,
}

impl<'a, B: CookieBackend> CookieStore<'a, B> {
    pub fn new(backend: &'a mut B, hostname: &str, now: DateTime<Utc>) -> Self {
        Self {
            backend,
            hostname: hostname.to_string(),
            now,
            domain: None,
        }
    }

    /// Store `value` under `key`. Without `ttl_days` the cookie lives for
    /// the browser session; a negative ttl expires it immediately. Lifetimes
    /// are capped at `MAX_LIFETIME_DAYS`.
    ///
    /// The value is percent-encoded on the way in and decoded by `get`, so
    /// separators such as `;` survive the cookie syntax.
    pub fn put(&mut self, key: &str, value: &str, ttl_days: Option<f64>) {
        let expires = match ttl_days.and_then(|days| self.expiry(days)) {
            Some(at) => format!("; expires={}", http_date(at)),
            None => String::new(),
        };
        let domain = self.cookie_domain();
        let value = utf8_percent_encode(value, COOKIE_VALUE);
        self.backend
            .set_cookie(&format!("{}={}{}; domain=.{}; path=/", key, value, expires, domain));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let cookies = self.backend.cookie_string();
        cookies
            .split(';')
            .map(|c| c.trim_start_matches(' '))
            .find_map(|c| c.strip_prefix(key)?.strip_prefix('='))
            .map(|raw| percent_decode_str(raw).decode_utf8_lossy().into_owned())
    }

    pub fn erase(&mut self, key: &str) {
        self.put(key, "", Some(-1.0));
    }

    /// Whether any visible cookie name starts with `prefix`
    pub fn has_key_with_prefix(&self, prefix: &str) -> bool {
        self.backend
            .cookie_string()
            .split(';')
            .any(|c| c.trim_start().starts_with(prefix))
    }

    /// Broadest suffix of the hostname that accepts a cookie, falling back
    /// to the full hostname.
    pub fn cookie_domain(&mut self) -> String {
        if let Some(domain) = &self.domain {
            return domain.clone();
        }
        let domain = self.probe_domain();
        tracing::debug!(hostname = %self.hostname, domain = %domain, "cookie domain resolved");
        self.domain = Some(domain.clone());
        domain
    }

    fn probe_domain(&mut self) -> String {
        let labels: Vec<&str> = self.hostname.split('.').collect();
        let marker = format!("{}={}", PROBE_COOKIE, PROBE_VALUE);
        for start in (0..labels.len()).rev() {
            let candidate = labels[start..].join(".");
            self.backend
                .set_cookie(&format!("{}; domain=.{}; path=/", marker, candidate));
            if self.backend.cookie_string().contains(&marker) {
                self.backend.set_cookie(&format!(
                    "{}=; domain=.{}; path=/; expires={}",
                    PROBE_COOKIE, candidate, EXPIRED
                ));
                return candidate;
            }
        }
        self.hostname.clone()
    }

    fn expiry(&self, days: f64) -> Option<DateTime<Utc>> {
        // f64::min maps NaN to the cap
        let days = days.min(MAX_LIFETIME_DAYS);
        let at = self.now.checked_add_signed(Duration::milliseconds((days * MS_PER_DAY) as i64));
        if at.is_none() {
            tracing::warn!(days, "cookie expiry out of range, writing a session cookie");
        }
        at
    }

    pub fn backend(&self) -> &B {
        &*self.backend
    }
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
