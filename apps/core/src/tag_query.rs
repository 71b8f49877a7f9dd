use std::iter::Peekable;
use std::path::PathBuf;
use std::vec::IntoIter;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

use crate::tag::{member_key, normalize_namespace, QualifiedName, Tag, TagType, TraitTag};
use crate::tag_store::{source_key, StoreError};

pub const NEAR_MATCH_SENTINEL: &str = "zzzzzzzzzz";

pub const INTERACTIVE_ROW_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameKey {
    pub namespace: Option<String>,
    pub key: String,
}

impl NameKey {
    pub fn any_namespace(key: &str) -> Self {
        Self {
            namespace: None,
            key: key.to_string(),
        }
    }

    pub fn in_namespace(namespace: &str, key: &str) -> Self {
        Self {
            namespace: Some(normalize_namespace(namespace)),
            key: key.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberKey {
    pub class: QualifiedName,
    pub member: String,
}

impl MemberKey {
    pub fn new(class: QualifiedName, member: &str) -> Self {
        Self {
            class,
            member: member.to_string(),
        }
    }

    fn key(&self) -> String {
        member_key(&self.class.name, &self.member)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryStrategy {
    ExactNonMember { names: Vec<NameKey> },
    NearMatchNonMember { names: Vec<NameKey> },
    ExactMember { keys: Vec<MemberKey> },
    NearMatchMember { keys: Vec<MemberKey> },
    ExactFile { names: Vec<String> },
    NearMatchFile { prefix: String },
    // bulk, never row-limited
    FileTags { full_path: String },
    AllNonMembers,
}

impl QueryStrategy {
    fn default_types(&self) -> &'static [TagType] {
        match self {
            Self::ExactMember { .. } | Self::NearMatchMember { .. } => &TagType::MEMBERS,
            Self::ExactFile { .. } | Self::NearMatchFile { .. } => &[],
            _ => &TagType::NON_MEMBERS,
        }
    }

    fn is_bulk(&self) -> bool {
        matches!(self, Self::FileTags { .. } | Self::AllNonMembers)
    }

    fn is_file_lookup(&self) -> bool {
        matches!(self, Self::ExactFile { .. } | Self::NearMatchFile { .. })
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::ExactNonMember { names } | Self::NearMatchNonMember { names } => names.is_empty(),
            Self::ExactMember { keys } | Self::NearMatchMember { keys } => keys.is_empty(),
            Self::ExactFile { names } => names.is_empty(),
            Self::NearMatchFile { .. } | Self::FileTags { .. } | Self::AllNonMembers => false,
        }
    }
}

const TAG_COLUMNS: &str = "r.id, r.file_item_id, r.source_id, r.key, r.identifier, r.class_name, \
    r.namespace_name, r.type, r.signature, r.return_type, r.comment, r.is_protected, r.is_private, \
    r.is_static, r.is_dynamic, r.is_native, r.has_variable_args, f.full_path, f.is_new";

#[derive(Debug, Default)]
struct SqlBuilder {
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    fn bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.sql.push('?');
        self.params.push(value.into());
        self
    }

    fn bind_list<V: Into<Value>>(&mut self, values: impl IntoIterator<Item = V>) -> &mut Self {
        self.push("(");
        for (index, value) in values.into_iter().enumerate() {
            if index > 0 {
                self.push(", ");
            }
            self.bind(value);
        }
        self.push(")")
    }

    fn bind_range(&mut self, column: &str, prefix: &str) -> &mut Self {
        self.push(column).push(" BETWEEN ").bind(prefix.to_string());
        self.push(" AND ").bind(format!("{prefix}{NEAR_MATCH_SENTINEL}"))
    }

    fn or_group<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) -> &mut Self {
        self.push("(");
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                self.push(" OR ");
            }
            self.push("(");
            each(self, item);
            self.push(")");
        }
        self.push(")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagQuery {
    strategy: QueryStrategy,
    types: Option<Vec<TagType>>,
    source_dirs: Vec<PathBuf>,
    limited: bool,
}

impl TagQuery {
    pub fn new(strategy: QueryStrategy) -> Self {
        Self {
            strategy,
            types: None,
            source_dirs: Vec::new(),
            limited: false,
        }
    }

    pub fn with_types(mut self, types: &[TagType]) -> Self {
        self.types = Some(types.to_vec());
        self
    }

    pub fn in_sources(mut self, source_dirs: &[PathBuf]) -> Self {
        self.source_dirs = source_dirs.to_vec();
        self
    }

    pub fn limited(mut self, limited: bool) -> Self {
        self.limited = limited;
        self
    }

    pub fn strategy(&self) -> &QueryStrategy {
        &self.strategy
    }

    fn types(&self) -> &[TagType] {
        self.types
            .as_deref()
            .unwrap_or_else(|| self.strategy.default_types())
    }

    pub fn sql(&self) -> (String, Vec<Value>) {
        let mut b = SqlBuilder::default();
        if self.strategy.is_file_lookup() {
            self.build_file_lookup(&mut b);
        } else {
            self.build_tag_lookup(&mut b);
        }
        if self.limited && !self.strategy.is_bulk() {
            b.push(&format!(" LIMIT {INTERACTIVE_ROW_LIMIT}"));
        }
        (b.sql, b.params)
    }

    fn build_tag_lookup(&self, b: &mut SqlBuilder) {
        b.push("SELECT ")
            .push(TAG_COLUMNS)
            .push(" FROM resources r LEFT JOIN file_items f ON f.file_item_id = r.file_item_id WHERE ");

        match &self.strategy {
            QueryStrategy::ExactNonMember { names } => {
                b.or_group(names, |b, name| {
                    b.push("r.key = ").bind(name.key.clone());
                    bind_namespace(b, name.namespace.as_deref());
                });
            }
            QueryStrategy::NearMatchNonMember { names } => {
                b.or_group(names, |b, name| {
                    b.bind_range("r.key", &name.key);
                    bind_namespace(b, name.namespace.as_deref());
                });
            }
            QueryStrategy::ExactMember { keys } => {
                b.or_group(keys, |b, key| {
                    b.push("r.key = ").bind(key.key());
                    bind_namespace(b, key.class.namespace.as_deref());
                });
            }
            QueryStrategy::NearMatchMember { keys } => {
                b.or_group(keys, |b, key| {
                    b.bind_range("r.key", &key.key());
                    bind_namespace(b, key.class.namespace.as_deref());
                });
            }
            QueryStrategy::FileTags { full_path } => {
                b.push("f.full_path = ").bind(full_path.clone());
            }
            QueryStrategy::AllNonMembers => {
                b.push("1 = 1");
            }
            QueryStrategy::ExactFile { .. } | QueryStrategy::NearMatchFile { .. } => {}
        }

        let types = self.types();
        if !types.is_empty() {
            b.push(" AND r.type IN ")
                .bind_list(types.iter().map(|tag_type| tag_type.code()));
        }
        self.bind_sources(b, "r.source_id");
        b.push(" ORDER BY r.key ASC");
    }

    fn build_file_lookup(&self, b: &mut SqlBuilder) {
        b.push("SELECT NULL, f.file_item_id, f.source_id, f.name, f.name, '', '\\', ")
            .bind(TagType::File.code())
            .push(", '', '', '', 0, 0, 0, 0, 0, 0, f.full_path, f.is_new FROM file_items f WHERE ");
        match &self.strategy {
            QueryStrategy::ExactFile { names } => {
                b.push("f.name IN ").bind_list(names.iter().cloned());
            }
            QueryStrategy::NearMatchFile { prefix } => {
                b.bind_range("f.name", prefix);
            }
            _ => {}
        }
        self.bind_sources(b, "f.source_id");
        b.push(" ORDER BY f.name ASC");
    }

    fn bind_sources(&self, b: &mut SqlBuilder, column: &str) {
        if self.source_dirs.is_empty() {
            return;
        }
        b.push(" AND ")
            .push(column)
            .push(" IN (SELECT source_id FROM sources WHERE directory IN ")
            .bind_list(self.source_dirs.iter().map(|dir| source_key(dir)))
            .push(")");
    }

    pub fn try_run(&self, conn: &Connection) -> Result<Vec<Tag>, StoreError> {
        if self.strategy.is_empty() {
            return Ok(Vec::new());
        }
        let (sql, params) = self.sql();
        run_rows(conn, &sql, params, decode_tag)
    }

    /// Hands each decoded row to `visit` as it is stepped, without buffering the
    /// result set. Stops once `visit` returns `false`. Returns the rows visited.
    pub fn for_each(
        &self,
        conn: &Connection,
        mut visit: impl FnMut(Tag) -> bool,
    ) -> Result<usize, StoreError> {
        if self.strategy.is_empty() {
            return Ok(0);
        }
        let (sql, params) = self.sql();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), decode_tag)?;
        let mut visited = 0;
        for row in rows {
            visited += 1;
            if !visit(row?) {
                break;
            }
        }
        Ok(visited)
    }

    pub fn run(&self, conn: &Connection) -> TagCursor {
        match self.try_run(conn) {
            Ok(tags) => TagCursor::new(tags),
            Err(error) => {
                log::warn!("tag query failed: {error}");
                TagCursor::failed(error.to_string())
            }
        }
    }
}

fn bind_namespace(b: &mut SqlBuilder, namespace: Option<&str>) {
    if let Some(namespace) = namespace {
        b.push(" AND r.namespace_name = ").bind(namespace.to_string());
    }
}

fn run_rows<T>(
    conn: &Connection,
    sql: &str,
    params: Vec<Value>,
    decode: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params_from_iter(params), decode)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn decode_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    let type_code: i64 = row.get(7)?;
    let tag_type = TagType::from_code(type_code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Integer,
            format!("unknown tag type {type_code}").into(),
        )
    })?;
    Ok(Tag {
        id: row.get(0)?,
        file_item_id: row.get(1)?,
        source_id: row.get(2)?,
        key: row.get(3)?,
        identifier: row.get(4)?,
        class_name: row.get(5)?,
        namespace_name: row.get(6)?,
        tag_type,
        signature: row.get(8)?,
        return_type: row.get(9)?,
        comment: row.get(10)?,
        is_protected: row.get(11)?,
        is_private: row.get(12)?,
        is_static: row.get(13)?,
        is_dynamic: row.get(14)?,
        is_native: row.get(15)?,
        has_variable_args: row.get(16)?,
        full_path: row.get(17)?,
        file_is_new: row.get::<_, Option<bool>>(18)?.unwrap_or(false),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitQuery {
    classes: Vec<QualifiedName>,
    source_dirs: Vec<PathBuf>,
}

impl TraitQuery {
    pub fn new(classes: Vec<QualifiedName>) -> Self {
        Self {
            classes,
            source_dirs: Vec::new(),
        }
    }

    pub fn in_sources(mut self, source_dirs: &[PathBuf]) -> Self {
        self.source_dirs = source_dirs.to_vec();
        self
    }

    pub fn sql(&self) -> (String, Vec<Value>) {
        let mut b = SqlBuilder::default();
        b.push(
            "SELECT key, class_name, namespace_name, trait_name, trait_namespace_name, aliases, \
             instead_ofs FROM trait_resources WHERE ",
        );
        b.or_group(&self.classes, |b, class| {
            b.push("key = ").bind(class.name.clone());
            if let Some(namespace) = &class.namespace {
                b.push(" AND namespace_name = ").bind(namespace.clone());
            }
        });
        if !self.source_dirs.is_empty() {
            b.push(" AND source_id IN (SELECT source_id FROM sources WHERE directory IN ")
                .bind_list(self.source_dirs.iter().map(|dir| source_key(dir)))
                .push(")");
        }
        b.push(" ORDER BY key ASC");
        (b.sql, b.params)
    }

    pub fn try_run(&self, conn: &Connection) -> Result<Vec<TraitTag>, StoreError> {
        if self.classes.is_empty() {
            return Ok(Vec::new());
        }
        let (sql, params) = self.sql();
        run_rows(conn, &sql, params, decode_trait)
    }
}

fn decode_trait(row: &Row<'_>) -> rusqlite::Result<TraitTag> {
    let aliases: String = row.get(5)?;
    let instead_ofs: String = row.get(6)?;
    Ok(TraitTag {
        key: row.get(0)?,
        class_name: row.get(1)?,
        namespace_name: row.get(2)?,
        trait_name: row.get(3)?,
        trait_namespace_name: row.get(4)?,
        aliases: TraitTag::decode_aliases(&aliases),
        instead_ofs: TraitTag::decode_instead_ofs(&instead_ofs),
    })
}

/// Single-pass cursor over decoded tags. Rows are decoded when the query runs, so
/// bulk strategies should go through `TagQuery::for_each` instead.
#[derive(Debug)]
pub struct TagCursor {
    rows: Peekable<IntoIter<Tag>>,
    error: Option<String>,
}

impl TagCursor {
    fn new(tags: Vec<Tag>) -> Self {
        Self {
            rows: tags.into_iter().peekable(),
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            rows: Vec::new().into_iter().peekable(),
            error: Some(message),
        }
    }

    pub fn more(&mut self) -> bool {
        self.rows.peek().is_some()
    }

    pub fn matches(self) -> Vec<Tag> {
        self.rows.collect()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl Iterator for TagCursor {
    type Item = Tag;

    fn next(&mut self) -> Option<Tag> {
        self.rows.next()
    }
}
