use crate::cookie_jar::CookieBackend;
use crate::store::CookieStore;

/// Decides whether a page view opens a new tracking session.
///
/// The marker cookie carries no payload. Every check rewrites it, so a
/// session ends only after `ttl_days` without a page view.
#[derive(Debug, Clone)]
pub struct SessionGate {
    key: String,
    ttl_days: f64,
}

impl SessionGate {
    pub fn new(key: &str, ttl_days: f64) -> Self {
        Self {
            key: key.to_string(),
            ttl_days,
        }
    }

    pub fn is_new_session<B: CookieBackend>(&self, store: &mut CookieStore<'_, B>) -> bool {
        let is_new = store.get(&self.key).is_none();
        store.put(&self.key, "true", Some(self.ttl_days));
        is_new
    }
}
