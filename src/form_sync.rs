use crate::config::{AttributionConfig, FieldFamily};
use crate::cookie_jar::CookieBackend;
use crate::page::PageContext;
use crate::record::read_last_touch;
use crate::store::CookieStore;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const MAX_RETRIES: u32 = 30;

/// The page's lead forms, as seen from the attribution layer
pub trait FormHost {
    /// The third-party form library is loaded and its forms are rendered
    fn form_library_ready(&self) -> bool;
    /// Set the first control named `name`; false if there is none
    fn set_control_value(&mut self, name: &str, value: &str) -> bool;
}

/// Name of the form control that receives a field's last-touch value
pub fn control_name(field: &str) -> String {
    match FieldFamily::of(field) {
        FieldFamily::Utm => field.to_string(),
        FieldFamily::Internal => format!("{}__c", field),
        FieldFamily::Referrer => "utm_referrer".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateMode {
    /// Wait for the form library before touching controls
    FormLibrary,
    /// Local development host without the form library
    Direct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Populated,
    Exhausted,
    Cancelled,
}

/// Bounded retry task that copies the last-touch record into form
/// controls. One immediate attempt, then one per `POLL_INTERVAL` for at
/// most `MAX_RETRIES` more.
///
/// By default the task stops on the first attempt that fills a control.
/// With `repopulate_until_exhausted` it keeps writing on every attempt
/// until the budget runs out, which restores hidden fields a form library
/// wipes when it re-renders. `cancel` stops either schedule.
#[derive(Debug, Clone)]
pub struct FormSyncTask {
    config: AttributionConfig,
    hostname: String,
    now: DateTime<Utc>,
    mode: PopulateMode,
    max_attempts: u32,
    attempts: u32,
    repopulate: bool,
    populated: bool,
    state: TaskState,
}

impl FormSyncTask {
    /// `None` when Do-Not-Track is on: no polling is started at all
    pub fn for_page(config: &AttributionConfig, page: &PageContext) -> Option<Self> {
        if page.do_not_track().enabled() {
            return None;
        }
        let mode = if config.direct_populate_hosts.iter().any(|h| *h == page.host()) {
            PopulateMode::Direct
        } else {
            PopulateMode::FormLibrary
        };
        Some(Self {
            config: config.clone(),
            hostname: page.hostname().to_string(),
            now: page.now(),
            mode,
            max_attempts: 1 + MAX_RETRIES,
            attempts: 0,
            repopulate: false,
            populated: false,
            state: TaskState::Pending,
        })
    }

    /// Keep populating on every attempt instead of stopping at the first fill
    pub fn repopulate_until_exhausted(mut self) -> Self {
        self.repopulate = true;
        self
    }

    pub fn mode(&self) -> PopulateMode {
        self.mode
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        self.state != TaskState::Pending
    }

    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.state = TaskState::Cancelled;
        }
    }

    /// Run one attempt if the task is still pending
    pub fn tick<B: CookieBackend, F: FormHost>(&mut self, backend: &mut B, form: &mut F) -> TaskState {
        if self.is_finished() {
            return self.state;
        }
        self.attempts += 1;

        let written = self.populate(backend, form);
        if written > 0 {
            tracing::debug!(attempt = self.attempts, written, "form controls populated");
            self.populated = true;
            if !self.repopulate {
                self.state = TaskState::Populated;
                return self.state;
            }
        }
        if self.attempts >= self.max_attempts {
            self.state = if self.populated {
                TaskState::Populated
            } else {
                tracing::debug!(attempts = self.attempts, "form sync gave up");
                TaskState::Exhausted
            };
        }
        self.state
    }

    /// Drive the schedule to completion, calling `sleep` between attempts
    pub fn run_blocking<B, F, S>(&mut self, backend: &mut B, form: &mut F, mut sleep: S) -> TaskState
    where
        B: CookieBackend,
        F: FormHost,
        S: FnMut(Duration),
    {
        loop {
            if self.tick(backend, form) != TaskState::Pending {
                return self.state;
            }
            sleep(POLL_INTERVAL);
        }
    }

    fn populate<B: CookieBackend, F: FormHost>(&self, backend: &mut B, form: &mut F) -> usize {
        if self.mode == PopulateMode::FormLibrary && !form.form_library_ready() {
            return 0;
        }
        let store = CookieStore::new(backend, &self.hostname, self.now);
        self.config
            .record_fields()
            .filter(|field| {
                let value = read_last_touch(&self.config, &store, field);
                form.set_control_value(&control_name(field), &value)
            })
            .count()
    }
}

/// Form with named controls, for tests and the simulator
#[derive(Debug, Clone, Default)]
pub struct MemoryFormHost {
    library_ready: bool,
    controls: Vec<(String, String)>,
}

impl MemoryFormHost {
    pub fn with_controls(names: &[&str]) -> Self {
        Self {
            library_ready: false,
            controls: names.iter().map(|n| (n.to_string(), String::new())).collect(),
        }
    }

    pub fn set_library_ready(&mut self, ready: bool) {
        self.library_ready = ready;
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.controls
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn controls(&self) -> &[(String, String)] {
        &self.controls
    }
}

impl FormHost for MemoryFormHost {
    fn form_library_ready(&self) -> bool {
        self.library_ready
    }

    fn set_control_value(&mut self, name: &str, value: &str) -> bool {
        match self.controls.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => {
                *v = value.to_string();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie_jar::MemoryCookieJar;

    fn seeded_jar(host: &str) -> MemoryCookieJar {
        let mut jar = MemoryCookieJar::new(host, Utc::now());
        let now = jar.now();
        let mut store = CookieStore::new(&mut jar, host, now);
        store.put("__lt_utm_source", "google", Some(30.0));
        store.put("__lt_int_campaign", "launch", Some(30.0));
        store.put("__lt_referrer", "direct", Some(30.0));
        jar
    }

    #[test]
    fn test_control_names() {
        assert_eq!(control_name("utm_medium"), "utm_medium");
        assert_eq!(control_name("int_medium"), "int_medium__c");
        assert_eq!(control_name("referrer"), "utm_referrer");
    }

    #[test]
    fn test_waits_for_form_library() {
        let config = AttributionConfig::extended();
        let mut jar = seeded_jar("www.example.com");
        let page = PageContext::new("https://www.example.com/contact", "", jar.now()).unwrap();
        let mut form = MemoryFormHost::with_controls(&["utm_source", "utm_medium", "int_campaign__c", "utm_referrer"]);
        let mut task = FormSyncTask::for_page(&config, &page).unwrap();
        assert_eq!(task.mode(), PopulateMode::FormLibrary);

        assert_eq!(task.tick(&mut jar, &mut form), TaskState::Pending);
        assert_eq!(form.value("utm_source"), Some(""));

        form.set_library_ready(true);
        assert_eq!(task.tick(&mut jar, &mut form), TaskState::Populated);
        assert_eq!(task.attempts(), 2);
        assert_eq!(form.value("utm_source"), Some("google"));
        assert_eq!(form.value("utm_medium"), Some(""));
        assert_eq!(form.value("int_campaign__c"), Some("launch"));
        assert_eq!(form.value("utm_referrer"), Some("direct"));
    }

    #[test]
    fn test_budget_is_one_plus_thirty_attempts() {
        let config = AttributionConfig::standard();
        let mut jar = seeded_jar("www.example.com");
        let page = PageContext::new("https://www.example.com/", "", jar.now()).unwrap();
        let mut form = MemoryFormHost::with_controls(&["utm_source"]);
        let mut task = FormSyncTask::for_page(&config, &page).unwrap();

        let mut slept = Vec::new();
        let state = task.run_blocking(&mut jar, &mut form, |d| slept.push(d));
        assert_eq!(state, TaskState::Exhausted);
        assert_eq!(task.attempts(), 1 + MAX_RETRIES);
        assert_eq!(slept.len() as u32, MAX_RETRIES);
        assert!(slept.iter().all(|d| *d == POLL_INTERVAL));

        // finished tasks never run again
        form.set_library_ready(true);
        assert_eq!(task.tick(&mut jar, &mut form), TaskState::Exhausted);
        assert_eq!(form.value("utm_source"), Some(""));
    }

    #[test]
    fn test_repopulate_restores_wiped_controls() {
        let config = AttributionConfig::standard();
        let mut jar = seeded_jar("www.example.com");
        let page = PageContext::new("https://www.example.com/", "", jar.now()).unwrap();
        let mut form = MemoryFormHost::with_controls(&["utm_source"]);
        form.set_library_ready(true);
        let mut task = FormSyncTask::for_page(&config, &page).unwrap().repopulate_until_exhausted();

        assert_eq!(task.tick(&mut jar, &mut form), TaskState::Pending);
        assert_eq!(form.value("utm_source"), Some("google"));

        // the form library re-renders and clears the hidden field
        form.set_control_value("utm_source", "");
        let state = task.run_blocking(&mut jar, &mut form, |_| {});
        assert_eq!(state, TaskState::Populated);
        assert_eq!(task.attempts(), 1 + MAX_RETRIES);
        assert_eq!(form.value("utm_source"), Some("google"));
    }

    #[test]
    fn test_direct_mode_on_local_dev_host() {
        let config = AttributionConfig::standard();
        let mut jar = seeded_jar("127.0.0.1");
        let page = PageContext::new("http://127.0.0.1:8080/form.html", "", jar.now()).unwrap();
        let mut form = MemoryFormHost::with_controls(&["utm_source"]);
        let mut task = FormSyncTask::for_page(&config, &page).unwrap();
        assert_eq!(task.mode(), PopulateMode::Direct);
        assert_eq!(task.tick(&mut jar, &mut form), TaskState::Populated);
        assert_eq!(form.value("utm_source"), Some("google"));
    }

    #[test]
    fn test_cancel_stops_polling() {
        let config = AttributionConfig::standard();
        let mut jar = seeded_jar("www.example.com");
        let page = PageContext::new("https://www.example.com/", "", jar.now()).unwrap();
        let mut form = MemoryFormHost::with_controls(&["utm_source"]);
        let mut task = FormSyncTask::for_page(&config, &page).unwrap();
        task.tick(&mut jar, &mut form);
        task.cancel();
        form.set_library_ready(true);
        assert_eq!(task.tick(&mut jar, &mut form), TaskState::Cancelled);
        assert_eq!(task.attempts(), 1);
    }

    #[test]
    fn test_no_task_under_do_not_track() {
        let page = PageContext::new("https://www.example.com/", "", Utc::now())
            .unwrap()
            .with_do_not_track(crate::page::DoNotTrack::requested());
        assert!(FormSyncTask::for_page(&AttributionConfig::standard(), &page).is_none());
    }
}
