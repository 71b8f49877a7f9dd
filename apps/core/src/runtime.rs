use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{self, ConfigError};
use crate::contract::{FileListingResponse, TagSearchResponse};
use crate::dispatcher::{DispatchError, RunningTasks};
use crate::events::{DeliveryMode, EventListener, TaskEvent};
use crate::logging::{self, LogInitError};
use crate::tag::Tag;
use crate::tag_store::SessionCleanup;
use crate::tag_tasks::{FileListingTask, SearchMode, TagSearchTask};
use crate::task::{EventId, Task, TaskId};

const SEARCH_EVENT: EventId = EventId(1);
const LISTING_EVENT: EventId = EventId(2);
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] LogInitError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("task timed out after {0:?}")]
    TimedOut(Duration),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub config_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub source_dirs: Vec<PathBuf>,
    pub mode: SearchMode,
    pub list_files: bool,
    pub query: String,
    pub timeout: Duration,
}

pub fn parse_cli_args(args: &[String]) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        config_path: None,
        db_path: None,
        source_dirs: Vec::new(),
        mode: SearchMode::ExactThenNearMatch,
        list_files: false,
        query: String::new(),
        timeout: Duration::from_secs(30),
    };
    let mut query: Option<String> = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => options.config_path = Some(PathBuf::from(value_for(&mut iter, arg)?)),
            "--db" => options.db_path = Some(PathBuf::from(value_for(&mut iter, arg)?)),
            "--source" => options.source_dirs.push(PathBuf::from(value_for(&mut iter, arg)?)),
            "--timeout-secs" => {
                let raw = value_for(&mut iter, arg)?;
                let secs = raw
                    .parse::<u64>()
                    .map_err(|_| format!("invalid --timeout-secs value '{raw}'"))?;
                options.timeout = Duration::from_secs(secs.max(1));
            }
            "--exact" => options.mode = SearchMode::Exact,
            "--near" => options.mode = SearchMode::NearMatch,
            "--file" => options.mode = SearchMode::FileTags,
            "--list-files" => options.list_files = true,
            flag if flag.starts_with("--") => return Err(format!("unknown option '{flag}'")),
            positional => {
                if query.is_some() {
                    return Err(format!("unexpected argument '{positional}'"));
                }
                query = Some(positional.to_string());
            }
        }
    }

    if options.list_files {
        if let Some(extra) = query {
            return Err(format!("--list-files takes no query, got '{extra}'"));
        }
        return Ok(options);
    }
    options.query = query.ok_or_else(|| {
        "usage: phpdesk-core [--config PATH] [--db PATH] [--source DIR]... [--exact|--near|--file] QUERY\n       phpdesk-core [--config PATH] [--source DIR]... --list-files"
            .to_string()
    })?;
    Ok(options)
}

fn value_for<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a str, String> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

#[derive(Default)]
struct SearchOutcome {
    task_id: Option<TaskId>,
    tags: Option<(Vec<Tag>, Option<String>)>,
    files: Option<Vec<PathBuf>>,
    completion: Option<String>,
}

struct SearchListener {
    outcome: Mutex<SearchOutcome>,
}

impl EventListener for SearchListener {
    fn on_event(&self, event: &TaskEvent) {
        let mut outcome = self.outcome.lock();
        match event {
            TaskEvent::TagSearchComplete { tags, error, .. } => {
                outcome.tags = Some((tags.clone(), error.clone()));
            }
            TaskEvent::FileListingComplete { files, .. } => {
                outcome.files = Some(files.clone());
            }
            TaskEvent::Completion { task_id, message, .. } if outcome.task_id == Some(*task_id) => {
                outcome.completion = Some(message.clone());
            }
            TaskEvent::Progress { message, .. } if !message.is_empty() => {
                log::debug!("progress: {message}");
            }
            _ => {}
        }
    }
}

pub fn run_with_options(options: CliOptions) -> Result<String, RuntimeError> {
    let mut config = config::load(options.config_path.as_deref())?;
    if let Some(db_path) = options.db_path {
        config.tag_db_path = db_path;
    }
    if !options.source_dirs.is_empty() {
        config.source_dirs = options.source_dirs;
    }
    config::validate(&config)?;
    match logging::init(&config.log_dir, config.level_filter()) {
        Ok(()) | Err(LogInitError::AlreadySet) => {}
        Err(error) => return Err(error.into()),
    }
    log::info!(
        "startup config_path={} tag_db_path={} sources={}",
        config.config_path.display(),
        config.tag_db_path.display(),
        config.source_dirs.len()
    );

    let tasks = RunningTasks::new(DeliveryMode::Marshaled);
    tasks.set_max_threads(config.max_threads)?;
    tasks.set_heartbeat_interval(Duration::from_millis(config.heartbeat_interval_ms))?;
    tasks.set_thread_cleanup(Box::new(SessionCleanup));

    let listener = Arc::new(SearchListener {
        outcome: Mutex::new(SearchOutcome::default()),
    });
    let handle: Arc<dyn EventListener> = listener.clone();
    tasks.add_event_handler(&handle);

    let task: Box<dyn Task> = if options.list_files {
        Box::new(
            FileListingTask::new(&config.source_dirs, &config.php_file_extensions)
                .with_event_id(LISTING_EVENT),
        )
    } else {
        Box::new(
            TagSearchTask::new(&config.tag_db_path, &options.query, options.mode)
                .with_source_dirs(&config.source_dirs)
                .with_event_id(SEARCH_EVENT),
        )
    };
    listener.outcome.lock().task_id = tasks.queue(task);

    let started = Instant::now();
    while listener.outcome.lock().completion.is_none() {
        if started.elapsed() >= options.timeout {
            tasks.shutdown();
            return Err(RuntimeError::TimedOut(options.timeout));
        }
        tasks.dispatch_pending_timeout(PUMP_INTERVAL);
    }
    tasks.shutdown();

    let outcome = std::mem::take(&mut *listener.outcome.lock());
    if options.list_files {
        let files = outcome.files.unwrap_or_default();
        log::info!("file listing returned {} file(s)", files.len());
        return Ok(FileListingResponse::new(files).to_json()?);
    }
    let (tags, error) = outcome.tags.unwrap_or_default();
    let error = error.or(outcome.completion.filter(|message| !message.is_empty()));
    log::info!("search '{}' returned {} tag(s)", options.query, tags.len());
    Ok(TagSearchResponse::new(&options.query, tags, error).to_json()?)
}
