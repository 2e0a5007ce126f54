use crate::config::AttributionConfig;
use crate::cookie_jar::CookieBackend;
use crate::store::CookieStore;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldTouches {
    pub field: String,
    pub first_touch: Option<String>,
    pub last_touch: Option<String>,
}

/// Snapshot of both touch slots for every configured field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionRecord {
    pub fields: Vec<FieldTouches>,
}

impl AttributionRecord {
    pub fn read<B: CookieBackend>(config: &AttributionConfig, store: &CookieStore<'_, B>) -> Self {
        let fields = config
            .record_fields()
            .map(|field| FieldTouches {
                field: field.to_string(),
                first_touch: store.get(&config.first_touch_key(field)),
                last_touch: store.get(&config.last_touch_key(field)),
            })
            .collect();
        Self { fields }
    }

    pub fn first_touch(&self, field: &str) -> Option<&str> {
        self.find(field)?.first_touch.as_deref()
    }

    pub fn last_touch(&self, field: &str) -> Option<&str> {
        self.find(field)?.last_touch.as_deref()
    }

    fn find(&self, field: &str) -> Option<&FieldTouches> {
        self.fields.iter().find(|f| f.field == field)
    }
}

/// Last-touch value for form controls; a missing cookie reads as ""
pub fn read_last_touch<B: CookieBackend>(
    config: &AttributionConfig,
    store: &CookieStore<'_, B>,
    field: &str,
) -> String {
    store.get(&config.last_touch_key(field)).unwrap_or_default()
}
