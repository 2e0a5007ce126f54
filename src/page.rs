use crate::query::QueryReader;
use crate::TouchpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Do-Not-Track signals as the browser exposes them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoNotTrack {
    /// `window.doNotTrack`
    pub window: Option<String>,
    /// `navigator.doNotTrack`
    pub navigator: Option<String>,
    /// `navigator.msDoNotTrack`
    pub ms_navigator: Option<String>,
    /// `window.external.msTrackingProtectionEnabled`
    pub ms_tracking_protection: Option<bool>,
}

impl DoNotTrack {
    /// Signals of a browser that asks not to be tracked
    pub fn requested() -> Self {
        Self {
            navigator: Some("1".to_string()),
            ..Self::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.window.as_deref() == Some("1")
            || matches!(self.navigator.as_deref(), Some("1") | Some("yes"))
            || self.ms_navigator.as_deref() == Some("1")
            || self.ms_tracking_protection == Some(true)
    }
}

/// Everything a single page view exposes to the attribution layer
#[derive(Debug, Clone)]
pub struct PageContext {
    url: Url,
    referrer: String,
    now: DateTime<Utc>,
    do_not_track: DoNotTrack,
    query: QueryReader,
}

impl PageContext {
    pub fn new(url: &str, referrer: &str, now: DateTime<Utc>) -> Result<Self, TouchpointError> {
        let url = Url::parse(url)?;
        if url.host_str().is_none() {
            return Err(TouchpointError::Other(format!("page URL has no host: {}", url)));
        }
        let query = QueryReader::new(url.query());
        Ok(Self {
            url,
            referrer: referrer.to_string(),
            now,
            do_not_track: DoNotTrack::default(),
            query,
        })
    }

    pub fn with_do_not_track(mut self, do_not_track: DoNotTrack) -> Self {
        self.do_not_track = do_not_track;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `location.hostname`
    pub fn hostname(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// `location.host`: hostname plus a non-default port
    pub fn host(&self) -> String {
        host_with_port(&self.url)
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn query(&self) -> &QueryReader {
        &self.query
    }

    pub fn do_not_track(&self) -> &DoNotTrack {
        &self.do_not_track
    }

    /// A referrer is present and comes from another host than this page
    pub fn has_external_referrer(&self) -> bool {
        if self.referrer.is_empty() {
            return false;
        }
        match Url::parse(&self.referrer) {
            Ok(referrer) if referrer.host_str().is_some() => host_with_port(&referrer) != self.host(),
            _ => !self.referrer.contains(&self.host()),
        }
    }

    /// Scheme-stripped referrer equals `"www" + hostname`, compared as
    /// plain strings (no dot, path included).
    pub fn is_www_self_referral(&self) -> bool {
        strip_scheme(&self.referrer) == format!("www{}", self.hostname())
    }
}

fn host_with_port(url: &Url) -> String {
    let hostname = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", hostname, port),
        None => hostname.to_string(),
    }
}

fn strip_scheme(referrer: &str) -> &str {
    if let Some(idx) = referrer.find("://") {
        let scheme = &referrer[..idx];
        if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return &referrer[idx + 3..];
        }
    }
    referrer.strip_prefix("//").unwrap_or(referrer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(url: &str, referrer: &str) -> PageContext {
        PageContext::new(url, referrer, Utc::now()).unwrap()
    }

    #[test]
    fn test_do_not_track_signals() {
        assert!(!DoNotTrack::default().enabled());
        assert!(DoNotTrack::requested().enabled());
        let yes = DoNotTrack { navigator: Some("yes".to_string()), ..Default::default() };
        assert!(yes.enabled());
        let unspecified = DoNotTrack { navigator: Some("unspecified".to_string()), window: Some("0".to_string()), ..Default::default() };
        assert!(!unspecified.enabled());
        let ms = DoNotTrack { ms_tracking_protection: Some(true), ..Default::default() };
        assert!(ms.enabled());
    }

    #[test]
    fn test_host_includes_non_default_port() {
        let p = page("http://127.0.0.1:8080/landing?x=1", "");
        assert_eq!(p.hostname(), "127.0.0.1");
        assert_eq!(p.host(), "127.0.0.1:8080");
        assert_eq!(page("https://example.com:443/", "").host(), "example.com");
    }

    #[test]
    fn test_external_referrer() {
        assert!(!page("https://www.example.com/", "").has_external_referrer());
        assert!(!page("https://www.example.com/", "https://www.example.com/blog").has_external_referrer());
        assert!(page("https://www.example.com/", "https://other.com/").has_external_referrer());
        assert!(page("https://www.example.com/", "https://example.com/").has_external_referrer());
    }

    #[test]
    fn test_www_self_referral_is_literal() {
        assert!(page("https://example.com/", "https://wwwexample.com").is_www_self_referral());
        assert!(!page("https://example.com/", "https://www.example.com").is_www_self_referral());
        assert!(!page("https://example.com/", "https://wwwexample.com/").is_www_self_referral());
    }

    #[test]
    fn test_rejects_url_without_host() {
        assert!(PageContext::new("mailto:someone@example.com", "", Utc::now()).is_err());
        assert!(PageContext::new("not a url", "", Utc::now()).is_err());
    }
}
