use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::tag::{Tag, TraitTag};
use crate::task::ThreadCleanup;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    source_id INTEGER PRIMARY KEY,
    directory TEXT NOT NULL UNIQUE COLLATE NOCASE
);
CREATE TABLE IF NOT EXISTS file_items (
    file_item_id INTEGER PRIMARY KEY,
    source_id INTEGER,
    full_path TEXT NOT NULL COLLATE NOCASE,
    name TEXT NOT NULL COLLATE NOCASE,
    last_modified INTEGER NOT NULL DEFAULT 0,
    is_parsed INTEGER NOT NULL DEFAULT 0,
    is_new INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_file_items_name ON file_items(name);
CREATE INDEX IF NOT EXISTS idx_file_items_full_path ON file_items(full_path);
CREATE TABLE IF NOT EXISTS resources (
    id INTEGER PRIMARY KEY,
    file_item_id INTEGER,
    source_id INTEGER,
    key TEXT NOT NULL COLLATE NOCASE,
    identifier TEXT NOT NULL COLLATE NOCASE,
    class_name TEXT NOT NULL DEFAULT '' COLLATE NOCASE,
    type INTEGER NOT NULL,
    namespace_name TEXT NOT NULL DEFAULT '\\' COLLATE NOCASE,
    signature TEXT NOT NULL DEFAULT '',
    return_type TEXT NOT NULL DEFAULT '',
    comment TEXT NOT NULL DEFAULT '',
    is_protected INTEGER NOT NULL DEFAULT 0,
    is_private INTEGER NOT NULL DEFAULT 0,
    is_static INTEGER NOT NULL DEFAULT 0,
    is_dynamic INTEGER NOT NULL DEFAULT 0,
    is_native INTEGER NOT NULL DEFAULT 0,
    has_variable_args INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_resources_key ON resources(key, type);
CREATE INDEX IF NOT EXISTS idx_resources_file ON resources(file_item_id);
CREATE TABLE IF NOT EXISTS trait_resources (
    id INTEGER PRIMARY KEY,
    file_item_id INTEGER,
    source_id INTEGER,
    key TEXT NOT NULL COLLATE NOCASE,
    class_name TEXT NOT NULL COLLATE NOCASE,
    namespace_name TEXT NOT NULL COLLATE NOCASE,
    trait_name TEXT NOT NULL COLLATE NOCASE,
    trait_namespace_name TEXT NOT NULL COLLATE NOCASE,
    aliases TEXT NOT NULL DEFAULT '',
    instead_ofs TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_trait_resources_key ON trait_resources(key);
";

pub fn open_memory() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn open_file(path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

pub fn source_key(dir: &Path) -> String {
    let raw = dir.to_string_lossy();
    let trimmed = raw.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        raw.into_owned()
    } else {
        trimmed.to_string()
    }
}

pub fn insert_source(conn: &Connection, dir: &Path) -> Result<i64, StoreError> {
    let key = source_key(dir);
    conn.execute(
        "INSERT INTO sources (directory) VALUES (?1) ON CONFLICT(directory) DO NOTHING",
        params![key],
    )?;
    let id = conn.query_row(
        "SELECT source_id FROM sources WHERE directory = ?1",
        params![key],
        |row| row.get(0),
    )?;
    Ok(id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileItem {
    pub full_path: PathBuf,
    pub source_id: Option<i64>,
    pub last_modified: i64,
    pub is_parsed: bool,
    pub is_new: bool,
}

impl FileItem {
    pub fn new(full_path: impl Into<PathBuf>, source_id: Option<i64>) -> Self {
        Self {
            full_path: full_path.into(),
            source_id,
            last_modified: 0,
            is_parsed: true,
            is_new: false,
        }
    }

    pub fn name(&self) -> String {
        self.full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub fn insert_file_item(conn: &Connection, item: &FileItem) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO file_items (source_id, full_path, name, last_modified, is_parsed, is_new)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            item.source_id,
            item.full_path.to_string_lossy(),
            item.name(),
            item.last_modified,
            item.is_parsed,
            item.is_new
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn mark_file_new(conn: &Connection, file_item_id: i64, is_new: bool) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE file_items SET is_new = ?1 WHERE file_item_id = ?2",
        params![is_new, file_item_id],
    )?;
    Ok(())
}

pub fn file_item_id_for_path(conn: &Connection, full_path: &Path) -> Result<Option<i64>, StoreError> {
    let id = conn
        .query_row(
            "SELECT file_item_id FROM file_items WHERE full_path = ?1",
            params![full_path.to_string_lossy()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn insert_tag(conn: &Connection, tag: &Tag) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO resources (file_item_id, source_id, key, identifier, class_name, type,
            namespace_name, signature, return_type, comment, is_protected, is_private,
            is_static, is_dynamic, is_native, has_variable_args)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            tag.file_item_id,
            tag.source_id,
            tag.key,
            tag.identifier,
            tag.class_name,
            tag.tag_type.code(),
            tag.namespace_name,
            tag.signature,
            tag.return_type,
            tag.comment,
            tag.is_protected,
            tag.is_private,
            tag.is_static,
            tag.is_dynamic,
            tag.is_native,
            tag.has_variable_args
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_trait(
    conn: &Connection,
    trait_tag: &TraitTag,
    file_item_id: Option<i64>,
    source_id: Option<i64>,
) -> Result<i64, StoreError> {
    conn.execute(
        "INSERT INTO trait_resources (file_item_id, source_id, key, class_name, namespace_name,
            trait_name, trait_namespace_name, aliases, instead_ofs)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            file_item_id,
            source_id,
            trait_tag.key,
            trait_tag.class_name,
            trait_tag.namespace_name,
            trait_tag.trait_name,
            trait_tag.trait_namespace_name,
            trait_tag.encode_aliases(),
            trait_tag.encode_instead_ofs()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

thread_local! {
    static SESSIONS: RefCell<HashMap<PathBuf, Connection>> = RefCell::new(HashMap::new());
}

/// Runs `f` with a connection owned by the calling thread. The connection is opened
/// on first use and reused by later calls on the same thread.
pub fn with_session<T>(
    db_path: &Path,
    f: impl FnOnce(&Connection) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    SESSIONS.with(|sessions| {
        let mut sessions = sessions.borrow_mut();
        if !sessions.contains_key(db_path) {
            let conn = open_file(db_path)?;
            log::debug!(
                "opened tag session db={} thread={:?}",
                db_path.display(),
                std::thread::current().name()
            );
            sessions.insert(db_path.to_path_buf(), conn);
        }
        match sessions.get(db_path) {
            Some(conn) => f(conn),
            None => Err(StoreError::Sqlite(rusqlite::Error::InvalidPath(
                db_path.to_path_buf(),
            ))),
        }
    })
}

pub fn close_sessions() -> usize {
    SESSIONS.with(|sessions| {
        let drained: Vec<(PathBuf, Connection)> = sessions.borrow_mut().drain().collect();
        let count = drained.len();
        for (path, conn) in drained {
            if let Err((_, error)) = conn.close() {
                log::warn!("closing tag session {} failed: {error}", path.display());
            }
        }
        count
    })
}

pub fn open_session_count() -> usize {
    SESSIONS.with(|sessions| sessions.borrow().len())
}

#[derive(Debug, Default, Clone)]
pub struct SessionCleanup;

impl ThreadCleanup for SessionCleanup {
    fn cleanup(&mut self) {
        let closed = close_sessions();
        if closed > 0 {
            log::debug!("released {closed} tag session(s) on worker exit");
        }
    }

    fn clone_for_thread(&self) -> Box<dyn ThreadCleanup> {
        Box::new(self.clone())
    }
}
