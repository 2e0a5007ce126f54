pub mod config;
pub mod cookie_jar;
pub mod engine;
pub mod error;
pub mod form_sync;
pub mod page;
pub mod query;
pub mod record;
pub mod session;
pub mod store;

pub use config::{AttributionConfig, Variant};
pub use cookie_jar::{CookieBackend, MemoryCookieJar};
pub use engine::{AttributionEngine, EngineAction, PageViewReport};
pub use error::*;
pub use form_sync::{FormHost, FormSyncTask, MemoryFormHost, TaskState};
pub use page::{DoNotTrack, PageContext};
pub use record::AttributionRecord;
pub use store::CookieStore;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`)
pub fn init_tracing(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(service, "tracing initialised");
    }
}
