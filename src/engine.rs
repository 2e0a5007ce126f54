use crate::config::{AttributionConfig, FieldFamily, DIRECT, REFERRER_KEY};
use crate::cookie_jar::CookieBackend;
use crate::page::PageContext;
use crate::session::SessionGate;
use crate::store::CookieStore;
use serde::Serialize;
use tracing::{debug, info};

/// Per-page-view facts computed once before any write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchContext {
    /// No first-touch cookie existed when the page view started
    pub first_touch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EngineAction {
    CampaignCaptured,
    ReferrerCaptured(String),
    UtmErased,
    DirectForced,
    PaidOverride(String),
    InternalReset,
    InternalWritten(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageViewReport {
    /// Do-Not-Track was on; nothing was read or written
    pub suppressed: bool,
    pub first_touch: bool,
    pub new_session: bool,
    pub actions: Vec<EngineAction>,
}

impl PageViewReport {
    fn suppressed() -> Self {
        Self {
            suppressed: true,
            first_touch: false,
            new_session: false,
            actions: Vec::new(),
        }
    }
}

/// Attribution state machine. One instance serves any number of page
/// views; all per-view state lives in the store and the `TouchContext`.
#[derive(Debug, Clone)]
pub struct AttributionEngine {
    config: AttributionConfig,
    gate: SessionGate,
}

impl AttributionEngine {
    pub fn new(config: AttributionConfig) -> Self {
        let gate = SessionGate::new(&config.session_key, config.session_ttl_days);
        Self { config, gate }
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Apply the attribution rules for one page load.
    ///
    /// Steps run in a fixed order and later steps see the writes of
    /// earlier ones: session capture, referrer/UTM cross-override, paid
    /// medium override, internal-tracking reconciliation.
    pub fn run_page_view<B: CookieBackend>(&self, page: &PageContext, backend: &mut B) -> PageViewReport {
        if page.do_not_track().enabled() {
            info!("campaign tracking disabled by Do-Not-Track");
            return PageViewReport::suppressed();
        }

        let mut store = CookieStore::new(backend, page.hostname(), page.now());
        let ctx = TouchContext {
            first_touch: !store.has_key_with_prefix(&self.config.first_touch_prefix),
        };
        debug!(first_touch = ctx.first_touch, "evaluated first-touch status");

        let mut actions = Vec::new();
        let new_session = self.gate.is_new_session(&mut store);
        if new_session {
            self.capture_session(&ctx, page, &mut store, &mut actions);
        }
        self.cross_override(&ctx, page, &mut store, &mut actions);
        self.paid_override(&ctx, page, &mut store, &mut actions);
        if self.config.internal_tracking {
            self.reconcile_internal(&ctx, page, &mut store, &mut actions);
        }

        debug!(new_session, actions = actions.len(), "page view attributed");
        PageViewReport {
            suppressed: false,
            first_touch: ctx.first_touch,
            new_session,
            actions,
        }
    }

    /// Write once for first touch, always for last touch
    pub fn write_field<B: CookieBackend>(
        &self,
        ctx: &TouchContext,
        store: &mut CookieStore<'_, B>,
        field: &str,
        value: &str,
    ) {
        let ttl = Some(self.config.retention_days);
        if ctx.first_touch {
            store.put(&self.config.first_touch_key(field), value, ttl);
        }
        store.put(&self.config.last_touch_key(field), value, ttl);
    }

    fn campaign_in_url(&self, page: &PageContext) -> bool {
        page.query().any_present(self.config.fields.iter().map(String::as_str))
    }

    fn capture_session<B: CookieBackend>(
        &self,
        ctx: &TouchContext,
        page: &PageContext,
        store: &mut CookieStore<'_, B>,
        actions: &mut Vec<EngineAction>,
    ) {
        if self.campaign_in_url(page) {
            for field in &self.config.fields {
                let value = page.query().value_or_empty(field);
                self.write_field(ctx, store, field, &value);
            }
            actions.push(EngineAction::CampaignCaptured);
        }

        let referrer = if page.has_external_referrer() {
            page.referrer()
        } else {
            DIRECT
        };
        debug!(referrer, "captured referrer");
        self.write_field(ctx, store, REFERRER_KEY, referrer);
        actions.push(EngineAction::ReferrerCaptured(referrer.to_string()));
    }

    fn cross_override<B: CookieBackend>(
        &self,
        ctx: &TouchContext,
        page: &PageContext,
        store: &mut CookieStore<'_, B>,
        actions: &mut Vec<EngineAction>,
    ) {
        let external = page.has_external_referrer();
        let campaign = self.campaign_in_url(page);

        if external && campaign && !page.is_www_self_referral() {
            for field in self.config.fields_in(FieldFamily::Utm) {
                store.erase(&self.config.last_touch_key(field));
            }
            debug!(referrer = page.referrer(), "external referrer with campaign, UTM slots erased");
            actions.push(EngineAction::UtmErased);
        }

        if !external && !campaign {
            self.write_field(ctx, store, REFERRER_KEY, DIRECT);
            actions.push(EngineAction::DirectForced);
        }
    }

    fn paid_override<B: CookieBackend>(
        &self,
        ctx: &TouchContext,
        page: &PageContext,
        store: &mut CookieStore<'_, B>,
        actions: &mut Vec<EngineAction>,
    ) {
        let Some(medium) = page.query().get("utm_medium") else {
            return;
        };
        if !self.config.is_paid_medium(medium) {
            return;
        }
        for field in &self.config.paid_override_fields {
            let value = page.query().value_or_empty(field);
            self.write_field(ctx, store, field, &value);
        }
        info!(medium, "paid medium override applied");
        actions.push(EngineAction::PaidOverride(medium.to_string()));
    }

    fn reconcile_internal<B: CookieBackend>(
        &self,
        ctx: &TouchContext,
        page: &PageContext,
        store: &mut CookieStore<'_, B>,
        actions: &mut Vec<EngineAction>,
    ) {
        let present: Vec<(&str, &str)> = self
            .config
            .fields_in(FieldFamily::Internal)
            .filter_map(|field| Some((field, page.query().get(field)?)))
            .collect();
        if present.is_empty() {
            return;
        }

        let mismatch = present.iter().any(|(field, value)| {
            store.get(&self.config.last_touch_key(field)).as_deref() != Some(*value)
        });
        if mismatch {
            for field in self.config.fields_in(FieldFamily::Internal) {
                self.write_field(ctx, store, field, "");
            }
            debug!("internal tracking values changed, family reset");
            actions.push(EngineAction::InternalReset);
        }

        for (field, value) in &present {
            self.write_field(ctx, store, field, value);
        }
        actions.push(EngineAction::InternalWritten(
            present.iter().map(|(field, _)| field.to_string()).collect(),
        ));
    }
}
