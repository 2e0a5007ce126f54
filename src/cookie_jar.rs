use crate::TouchpointError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Browser-side cookie access, shaped like `document.cookie`:
/// one directive per write, the whole visible jar as a string on read.
pub trait CookieBackend {
    fn set_cookie(&mut self, directive: &str);
    fn cookie_string(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub host_only: bool,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn matches_host(&self, host: &str) -> bool {
        if self.host_only {
            host == self.domain
        } else {
            domain_matches(host, &self.domain)
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires.map_or(true, |at| at > now)
    }
}

/// In-memory cookie jar that applies the browser rules the attribution
/// layer depends on: domain matching, public suffix rejection, expiry and
/// session cookies. The jar is shared by every page of a visitor, so
/// navigating between subdomains is a `set_host` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCookieJar {
    host: String,
    now: DateTime<Utc>,
    public_suffixes: Vec<String>,
    cookies: Vec<StoredCookie>,
}

impl MemoryCookieJar {
    pub fn new(host: &str, now: DateTime<Utc>) -> Self {
        Self {
            host: host.to_ascii_lowercase(),
            now,
            public_suffixes: ["co.uk", "org.uk", "com.au", "co.jp", "github.io"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cookies: Vec::new(),
        }
    }

    pub fn with_public_suffixes(mut self, suffixes: &[&str]) -> Self {
        self.public_suffixes = suffixes.iter().map(|s| s.to_ascii_lowercase()).collect();
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_ascii_lowercase();
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Closing the browser drops every cookie without an expiry
    pub fn end_browser_session(&mut self) {
        self.cookies.retain(|c| c.expires.is_some());
    }

    pub fn cookies(&self) -> &[StoredCookie] {
        &self.cookies
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn purge_expired(&mut self) {
        let now = self.now;
        self.cookies.retain(|c| c.is_live(now));
    }

    pub fn load(path: &Path) -> Result<Self, TouchpointError> {
        let raw = fs::read_to_string(path)?;
        let jar = serde_json::from_str(&raw)?;
        Ok(jar)
    }

    pub fn save(&mut self, path: &Path) -> Result<(), TouchpointError> {
        self.purge_expired();
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    fn accepts_domain(&self, domain: &str) -> bool {
        if !domain_matches(&self.host, domain) {
            return false;
        }
        if domain == self.host {
            return true;
        }
        if self.host.parse::<IpAddr>().is_ok() {
            return false;
        }
        domain.contains('.') && !self.public_suffixes.iter().any(|s| s == domain)
    }
}

impl CookieBackend for MemoryCookieJar {
    fn set_cookie(&mut self, directive: &str) {
        let Some(cookie) = parse_directive(directive, &self.host) else {
            return;
        };
        if !cookie.host_only && !self.accepts_domain(&cookie.domain) {
            tracing::trace!(domain = %cookie.domain, host = %self.host, "cookie domain rejected");
            return;
        }

        let existing = self
            .cookies
            .iter()
            .position(|c| c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path);

        if !cookie.is_live(self.now) {
            if let Some(idx) = existing {
                self.cookies.remove(idx);
            }
            return;
        }

        match existing {
            Some(idx) => self.cookies[idx] = cookie,
            None => self.cookies.push(cookie),
        }
    }

    fn cookie_string(&self) -> String {
        self.cookies
            .iter()
            .filter(|c| c.is_live(self.now) && c.matches_host(&self.host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}

fn parse_directive(directive: &str, host: &str) -> Option<StoredCookie> {
    let mut parts = directive.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: host.to_string(),
        host_only: true,
        path: "/".to_string(),
        expires: None,
    };

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = val.trim_start_matches('.').to_ascii_lowercase();
                cookie.host_only = false;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            // Unparseable dates leave a session cookie, as browsers do
            "expires" => {
                if let Ok(at) = DateTime::parse_from_rfc2822(val) {
                    cookie.expires = Some(at.with_timezone(&Utc));
                }
            }
            _ => {}
        }
    }

    Some(cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_domain_cookie_visible_on_sibling_subdomain() {
        let mut jar = MemoryCookieJar::new("www.example.com", start());
        jar.set_cookie("a=1; domain=.example.com; path=/");
        jar.set_host("forms.example.com");
        assert_eq!(jar.cookie_string(), "a=1");
        jar.set_host("example.org");
        assert_eq!(jar.cookie_string(), "");
    }

    #[test]
    fn test_host_only_cookie_stays_on_host() {
        let mut jar = MemoryCookieJar::new("www.example.com", start());
        jar.set_cookie("a=1");
        jar.set_host("forms.example.com");
        assert_eq!(jar.cookie_string(), "");
    }

    #[test]
    fn test_rejects_tld_and_public_suffix() {
        let mut jar = MemoryCookieJar::new("shop.example.co.uk", start());
        jar.set_cookie("a=1; domain=.uk");
        jar.set_cookie("b=1; domain=.co.uk");
        jar.set_cookie("c=1; domain=.example.co.uk");
        assert_eq!(jar.cookie_string(), "c=1");
    }

    #[test]
    fn test_ip_host_only_accepts_exact_domain() {
        let mut jar = MemoryCookieJar::new("127.0.0.1", start());
        jar.set_cookie("a=1; domain=.0.1");
        jar.set_cookie("b=1; domain=.127.0.0.1");
        assert_eq!(jar.cookie_string(), "b=1");
    }

    #[test]
    fn test_rejects_foreign_domain() {
        let mut jar = MemoryCookieJar::new("www.example.com", start());
        jar.set_cookie("a=1; domain=.other.com");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_expiry_and_overwrite() {
        let mut jar = MemoryCookieJar::new("example.com", start());
        jar.set_cookie("a=1; expires=Fri, 01 Mar 2024 12:30:00 GMT; domain=.example.com");
        jar.set_cookie("a=2; expires=Fri, 01 Mar 2024 12:30:00 GMT; domain=.example.com");
        assert_eq!(jar.cookie_string(), "a=2");
        assert_eq!(jar.len(), 1);

        jar.advance(Duration::minutes(31));
        assert_eq!(jar.cookie_string(), "");
    }

    #[test]
    fn test_past_expiry_deletes() {
        let mut jar = MemoryCookieJar::new("example.com", start());
        jar.set_cookie("a=1; domain=.example.com");
        jar.set_cookie("a=; domain=.example.com; expires=Thu, 01 Jan 1970 00:00:01 GMT");
        assert!(jar.is_empty());
    }

    #[test]
    fn test_session_cookies_dropped_on_browser_close() {
        let mut jar = MemoryCookieJar::new("example.com", start());
        jar.set_cookie("s=1");
        jar.set_cookie("p=1; expires=Sat, 02 Mar 2024 12:00:00 GMT");
        jar.end_browser_session();
        assert_eq!(jar.cookie_string(), "p=1");
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("jar.json");
        let mut jar = MemoryCookieJar::new("www.example.com", start());
        jar.set_cookie("__lt_utm_source=google; domain=.example.com; expires=Sat, 30 Mar 2024 12:00:00 GMT");
        jar.save(&path).unwrap();

        let loaded = MemoryCookieJar::load(&path).unwrap();
        assert_eq!(loaded.cookie_string(), "__lt_utm_source=google");
        assert_eq!(loaded.now(), start());
    }
}
