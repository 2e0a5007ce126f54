use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use touchpoint::{
    AttributionConfig, AttributionEngine, AttributionRecord, CookieStore, DoNotTrack, FormSyncTask,
    MemoryCookieJar, MemoryFormHost, PageContext, TouchpointError, Variant,
};

#[derive(Parser)]
#[command(name = "touchpoint")]
#[command(about = "Simulate campaign attribution page views against a saved cookie jar", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RulesArgs {
    /// Preset rule set
    #[arg(long, value_enum, default_value_t = Variant::Extended)]
    variant: Variant,
    /// JSON rule file, overrides --variant
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one page view and persist the resulting cookies
    Visit {
        #[arg(long)]
        url: String,
        #[arg(long, default_value = "")]
        referrer: String,
        #[arg(long, default_value = "./touchpoint_jar.json")]
        jar: PathBuf,
        /// Page view time (RFC 3339), defaults to now
        #[arg(long)]
        now: Option<String>,
        /// Browser sends a Do-Not-Track signal
        #[arg(long)]
        dnt: bool,
        /// Drop session cookies first, as if the browser was restarted
        #[arg(long)]
        restart_browser: bool,
        #[command(flatten)]
        rules: RulesArgs,
    },
    /// Print the first/last touch record visible to a host
    Show {
        #[arg(long, default_value = "./touchpoint_jar.json")]
        jar: PathBuf,
        #[arg(long)]
        host: String,
        #[arg(long)]
        now: Option<String>,
        #[command(flatten)]
        rules: RulesArgs,
    },
    /// Copy the record into a simulated lead form
    Sync {
        #[arg(long, default_value = "./touchpoint_jar.json")]
        jar: PathBuf,
        #[arg(long)]
        url: String,
        /// Control names present on the form
        #[arg(long, value_delimiter = ',')]
        controls: Vec<String>,
        /// The form library never finishes loading
        #[arg(long)]
        no_library: bool,
        /// Sleep between attempts instead of simulating the interval
        #[arg(long)]
        real_time: bool,
        /// Write the controls on every attempt until the budget runs out
        #[arg(long)]
        keep_populating: bool,
        #[command(flatten)]
        rules: RulesArgs,
    },
}

fn main() -> Result<(), TouchpointError> {
    touchpoint::init_tracing("touchpoint");
    let cli = Cli::parse();

    match cli.command {
        Commands::Visit { url, referrer, jar, now, dnt, restart_browser, rules } => {
            let config = load_rules(&rules)?;
            let now = parse_now(now.as_deref())?;
            let page = PageContext::new(&url, &referrer, now)?.with_do_not_track(if dnt {
                DoNotTrack::requested()
            } else {
                DoNotTrack::default()
            });

            let mut cookie_jar = open_jar(&jar, page.hostname(), now)?;
            if restart_browser {
                cookie_jar.end_browser_session();
            }

            let engine = AttributionEngine::new(config);
            let report = engine.run_page_view(&page, &mut cookie_jar);
            cookie_jar.save(&jar)?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Show { jar, host, now, rules } => {
            let config = load_rules(&rules)?;
            let mut cookie_jar = MemoryCookieJar::load(&jar)?;
            cookie_jar.set_host(&host);
            if let Some(now) = now.as_deref() {
                cookie_jar.set_now(parse_now(Some(now))?);
            }
            let now = cookie_jar.now();
            let store = CookieStore::new(&mut cookie_jar, &host, now);
            let record = AttributionRecord::read(&config, &store);
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Sync { jar, url, controls, no_library, real_time, keep_populating, rules } => {
            let config = load_rules(&rules)?;
            let mut cookie_jar = MemoryCookieJar::load(&jar)?;
            let page = PageContext::new(&url, "", cookie_jar.now())?;
            cookie_jar.set_host(page.hostname());

            let names: Vec<&str> = controls.iter().map(String::as_str).collect();
            let mut form = MemoryFormHost::with_controls(&names);
            form.set_library_ready(!no_library);

            let Some(mut task) = FormSyncTask::for_page(&config, &page) else {
                return Ok(());
            };
            if keep_populating {
                task = task.repopulate_until_exhausted();
            }
            let state = task.run_blocking(&mut cookie_jar, &mut form, |interval| {
                if real_time {
                    std::thread::sleep(interval);
                }
            });

            println!("[touchpoint] form sync {:?} after {} attempt(s)", state, task.attempts());
            for (name, value) in form.controls() {
                println!("{}={}", name, value);
            }
        }
    }

    Ok(())
}

fn load_rules(rules: &RulesArgs) -> Result<AttributionConfig, TouchpointError> {
    match &rules.config {
        Some(path) => AttributionConfig::from_json_file(path),
        None => Ok(rules.variant.config()),
    }
}

fn parse_now(raw: Option<&str>) -> Result<DateTime<Utc>, TouchpointError> {
    match raw {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| TouchpointError::Other(format!("invalid --now {:?}: {}", raw, e))),
        None => Ok(Utc::now()),
    }
}

/// Load the visitor's jar, or start an empty one on first visit
fn open_jar(path: &Path, host: &str, now: DateTime<Utc>) -> Result<MemoryCookieJar, TouchpointError> {
    let mut jar = if path.exists() {
        MemoryCookieJar::load(path)?
    } else {
        MemoryCookieJar::new(host, now)
    };
    jar.set_host(host);
    jar.set_now(now);
    Ok(jar)
}
