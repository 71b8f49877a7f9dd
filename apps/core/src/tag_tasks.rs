use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::events::TaskEvent;
use crate::tag::Tag;
use crate::tag_finder::{search_with_fallback, TagFinder, TagLookup};
use crate::tag_search::TagSearch;
use crate::tag_store::{self, StoreError};
use crate::task::{EventId, ProgressMode, Task, TaskContext, TaskError};

const LISTING_REPORT_INTERVAL: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    Exact,
    NearMatch,
    #[default]
    ExactThenNearMatch,
    FileTags,
}

pub struct TagSearchTask {
    db_path: PathBuf,
    query: String,
    source_dirs: Vec<PathBuf>,
    mode: SearchMode,
    event_id: EventId,
}

impl TagSearchTask {
    pub fn new(db_path: &Path, query: &str, mode: SearchMode) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            query: query.to_string(),
            source_dirs: Vec::new(),
            mode,
            event_id: EventId::NONE,
        }
    }

    pub fn with_source_dirs(mut self, source_dirs: &[PathBuf]) -> Self {
        self.source_dirs = source_dirs.to_vec();
        self
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    fn lookup(&self, finder: &TagFinder<'_>) -> Vec<Tag> {
        let search = TagSearch::parse(&self.query);
        if search.is_empty() {
            return Vec::new();
        }
        match self.mode {
            SearchMode::Exact => finder.exact_class_or_file(&search),
            SearchMode::NearMatch => finder.near_match_class_or_file(&search),
            SearchMode::ExactThenNearMatch => search_with_fallback(finder, &search),
            SearchMode::FileTags => finder.all_tags_in_file(Path::new(&self.query)),
        }
    }
}

impl Task for TagSearchTask {
    fn label(&self) -> &str {
        "tag search"
    }

    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn background_work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        let outcome = tag_store::with_session(&self.db_path, |conn| {
            let interrupt = conn.get_interrupt_handle();
            ctx.set_cancel_hook(move || interrupt.interrupt());

            let finder = TagFinder::new(conn)
                .with_source_dirs(&self.source_dirs)
                .with_cancel_check(|| ctx.is_cancelled());
            let tags = self.lookup(&finder);
            ctx.clear_cancel_hook();
            Ok::<_, StoreError>((tags, finder.last_error()))
        });

        if ctx.is_cancelled() {
            return Ok(());
        }

        let (tags, error) = match outcome {
            Ok(found) => found,
            Err(error) => (Vec::new(), Some(error.to_string())),
        };
        log::debug!(
            "tag search '{}' mode={:?} found={} error={:?}",
            self.query,
            self.mode,
            tags.len(),
            error
        );
        ctx.post_event(TaskEvent::TagSearchComplete {
            event_id: self.event_id,
            query: self.query.clone(),
            tags,
            error: error.clone(),
        });
        match error {
            Some(message) => Err(TaskError::Failed(message)),
            None => Ok(()),
        }
    }
}

pub struct FileListingTask {
    source_dirs: Vec<PathBuf>,
    extensions: Vec<String>,
    event_id: EventId,
}

impl FileListingTask {
    pub fn new(source_dirs: &[PathBuf], extensions: &[String]) -> Self {
        Self {
            source_dirs: source_dirs.to_vec(),
            extensions: extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            event_id: EventId::NONE,
        }
    }

    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = event_id;
        self
    }

    fn wanted(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|wanted| wanted.eq_ignore_ascii_case(ext))
            })
    }
}

impl Task for FileListingTask {
    fn label(&self) -> &str {
        "file listing"
    }

    fn event_id(&self) -> EventId {
        self.event_id
    }

    fn background_work(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        ctx.set_progress_mode(ProgressMode::Indeterminate);
        let mut files = Vec::new();
        let mut walked = 0usize;

        for dir in &self.source_dirs {
            for entry in WalkDir::new(dir).follow_links(false) {
                if ctx.is_cancelled() {
                    return Ok(());
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(error) => {
                        log::debug!("skipping unreadable entry under {}: {error}", dir.display());
                        continue;
                    }
                };
                walked += 1;
                if walked % LISTING_REPORT_INTERVAL == 0 {
                    ctx.set_status(&format!("Scanned {walked} files"));
                }
                if entry.file_type().is_file() && self.wanted(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        }

        files.sort();
        log::debug!("file listing found {} of {walked} entries", files.len());
        ctx.post_event(TaskEvent::FileListingComplete {
            event_id: self.event_id,
            files,
        });
        Ok(())
    }
}
