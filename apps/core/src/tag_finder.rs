use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::tag::{qualify, QualifiedName, Tag, TagType, TraitTag};
use crate::tag_query::{MemberKey, NameKey, QueryStrategy, TagQuery, TraitQuery};
use crate::tag_search::{ResourceType, TagSearch};
use crate::tag_store::StoreError;

// cycle guard for broken `extends` chains
const MAX_PARENT_DEPTH: usize = 64;

pub trait TagLookup {
    fn exact_class_or_file(&self, search: &TagSearch) -> Vec<Tag>;

    fn near_match_class_or_file(&self, search: &TagSearch) -> Vec<Tag>;
}

pub fn search_with_fallback<L: TagLookup + ?Sized>(lookup: &L, search: &TagSearch) -> Vec<Tag> {
    let exact = lookup.exact_class_or_file(search);
    if !exact.is_empty() {
        return exact;
    }
    lookup.near_match_class_or_file(search)
}

pub fn filter_stale(tags: Vec<Tag>) -> Vec<Tag> {
    let mut exists: HashMap<String, bool> = HashMap::new();
    tags.into_iter()
        .filter(|tag| {
            if tag.skips_file_check() {
                return true;
            }
            match &tag.full_path {
                Some(path) => *exists
                    .entry(path.clone())
                    .or_insert_with(|| Path::new(path).exists()),
                None => true,
            }
        })
        .collect()
}

pub fn dedupe(tags: Vec<Tag>) -> Vec<Tag> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| {
            seen.insert((
                tag.tag_type,
                tag.key.to_ascii_lowercase(),
                tag.namespace_name.to_ascii_lowercase(),
                tag.full_path.clone(),
            ))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Exclusion {
    excluded_trait: QualifiedName,
    method: String,
    declared_by: QualifiedName,
}

impl Exclusion {
    fn hides(&self, trait_name: &QualifiedName, method: &str) -> bool {
        !self.declared_by.same_as(&self.excluded_trait)
            && self.excluded_trait.same_as(trait_name)
            && self.method.eq_ignore_ascii_case(method)
    }
}

fn exclusions_for(traits: &[TraitTag]) -> Vec<Exclusion> {
    traits
        .iter()
        .flat_map(|trait_tag| {
            let declared_by = trait_tag.used_trait();
            trait_tag
                .excluded_methods()
                .into_iter()
                .map(move |(excluded_trait, method)| Exclusion {
                    excluded_trait,
                    method,
                    declared_by: declared_by.clone(),
                })
        })
        .collect()
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn sort_by_key(tags: &mut [Tag]) {
    tags.sort_by_cached_key(|tag| tag.key.to_ascii_lowercase());
}

pub struct TagFinder<'c> {
    conn: &'c Connection,
    source_dirs: Vec<PathBuf>,
    cancel_check: Option<Box<dyn Fn() -> bool + 'c>>,
    last_error: RefCell<Option<String>>,
}

impl<'c> TagFinder<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            source_dirs: Vec::new(),
            cancel_check: None,
            last_error: RefCell::new(None),
        }
    }

    pub fn with_source_dirs(mut self, source_dirs: &[PathBuf]) -> Self {
        self.source_dirs = source_dirs.to_vec();
        self
    }

    /// Polled before every query, so a multi-query lookup gives up between steps.
    pub fn with_cancel_check(mut self, check: impl Fn() -> bool + 'c) -> Self {
        self.cancel_check = Some(Box::new(check));
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_check.as_ref().is_some_and(|check| check())
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.borrow().clone()
    }

    fn record(&self, error: &StoreError) {
        log::warn!("tag lookup failed: {error}");
        *self.last_error.borrow_mut() = Some(error.to_string());
    }

    fn collect(&self, query: TagQuery) -> Vec<Tag> {
        if self.is_cancelled() {
            return Vec::new();
        }
        let cursor = query.in_sources(&self.source_dirs).run(self.conn);
        if let Some(message) = cursor.error() {
            log::debug!("tag cursor carried error: {message}");
            *self.last_error.borrow_mut() = Some(message.to_string());
        }
        cursor.matches()
    }

    pub fn exact_class(&self, class: &QualifiedName) -> Vec<Tag> {
        let name = match &class.namespace {
            Some(namespace) => NameKey::in_namespace(namespace, &class.name),
            None => NameKey::any_namespace(&class.name),
        };
        self.collect(
            TagQuery::new(QueryStrategy::ExactNonMember { names: vec![name] })
                .with_types(&[TagType::Class]),
        )
    }

    pub fn exact_function(&self, name: &str) -> Vec<Tag> {
        filter_stale(self.collect(
            TagQuery::new(QueryStrategy::ExactNonMember {
                names: vec![NameKey::any_namespace(name)],
            })
            .with_types(&[TagType::Function]),
        ))
    }

    pub fn near_match_namespaces(&self, prefix: &str) -> Vec<Tag> {
        let prefix = if prefix.starts_with('\\') {
            prefix.to_string()
        } else {
            format!("\\{prefix}")
        };
        self.collect(
            TagQuery::new(QueryStrategy::NearMatchNonMember {
                names: vec![NameKey::any_namespace(&prefix)],
            })
            .with_types(&[TagType::Namespace])
            .limited(true),
        )
    }

    fn stream(&self, query: TagQuery, mut visit: impl FnMut(Tag) -> bool) -> usize {
        let outcome = query
            .in_sources(&self.source_dirs)
            .for_each(self.conn, |tag| !self.is_cancelled() && visit(tag));
        match outcome {
            Ok(visited) => visited,
            Err(error) => {
                self.record(&error);
                0
            }
        }
    }

    pub fn for_each_tag_in_file(&self, full_path: &Path, visit: impl FnMut(Tag) -> bool) -> usize {
        self.stream(
            TagQuery::new(QueryStrategy::FileTags {
                full_path: full_path.to_string_lossy().into_owned(),
            }),
            visit,
        )
    }

    pub fn for_each_non_member_tag(&self, visit: impl FnMut(Tag) -> bool) -> usize {
        self.stream(TagQuery::new(QueryStrategy::AllNonMembers), visit)
    }

    pub fn all_tags_in_file(&self, full_path: &Path) -> Vec<Tag> {
        let mut tags = Vec::new();
        self.for_each_tag_in_file(full_path, |tag| {
            tags.push(tag);
            true
        });
        tags
    }

    pub fn all_non_member_tags(&self) -> Vec<Tag> {
        let mut tags = Vec::new();
        self.for_each_non_member_tag(|tag| {
            tags.push(tag);
            true
        });
        tags
    }

    pub fn class_parents(&self, class: &QualifiedName) -> Vec<QualifiedName> {
        let mut parents: Vec<QualifiedName> = Vec::new();
        let mut current = class.clone();
        for _ in 0..MAX_PARENT_DEPTH {
            let Some(parent) = self
                .exact_class(&current)
                .iter()
                .find_map(|tag| tag.parent_class_name())
            else {
                break;
            };
            if parent.same_as(class) || parents.iter().any(|seen| seen.same_as(&parent)) {
                log::debug!("inheritance cycle at {}", parent.fully_qualified());
                break;
            }
            parents.push(parent.clone());
            current = parent;
        }
        parents
    }

    pub fn class_used_traits(&self, classes: &[QualifiedName]) -> Vec<TraitTag> {
        if self.is_cancelled() {
            return Vec::new();
        }
        match TraitQuery::new(classes.to_vec())
            .in_sources(&self.source_dirs)
            .try_run(self.conn)
        {
            Ok(traits) => traits,
            Err(error) => {
                self.record(&error);
                Vec::new()
            }
        }
    }

    fn member_search_classes(&self, class: &QualifiedName) -> Vec<QualifiedName> {
        let mut roots: Vec<QualifiedName> = if class.namespace.is_some() {
            vec![class.clone()]
        } else {
            self.exact_class(class)
                .iter()
                .map(|tag| QualifiedName::new(&tag.namespace_name, &tag.identifier))
                .collect()
        };
        if roots.is_empty() {
            roots.push(class.clone());
        }

        let mut classes: Vec<QualifiedName> = Vec::new();
        for root in roots {
            if self.is_cancelled() {
                break;
            }
            let parents = self.class_parents(&root);
            for candidate in std::iter::once(root).chain(parents) {
                if !classes.iter().any(|seen| seen.same_as(&candidate)) {
                    classes.push(candidate);
                }
            }
        }
        classes
    }

    pub fn exact_member_tags(&self, class: &QualifiedName, member: &str) -> Vec<Tag> {
        self.member_tags(class, member, false)
    }

    pub fn near_match_member_tags(&self, class: &QualifiedName, member_prefix: &str) -> Vec<Tag> {
        self.member_tags(class, member_prefix, true)
    }

    fn member_tags(&self, class: &QualifiedName, member: &str, near: bool) -> Vec<Tag> {
        let classes = self.member_search_classes(class);
        if self.is_cancelled() {
            return Vec::new();
        }
        let traits = self.class_used_traits(&classes);
        let exclusions = exclusions_for(&traits);

        let mut keys: Vec<MemberKey> = classes
            .iter()
            .map(|owner| MemberKey::new(owner.clone(), member))
            .collect();
        let mut alias_keys: Vec<MemberKey> = Vec::new();
        for trait_tag in &traits {
            let used = trait_tag.used_trait();
            if !keys.iter().any(|key| key.class.same_as(&used)) {
                keys.push(MemberKey::new(used.clone(), member));
            }
            for alias in &trait_tag.aliases {
                let hit = if near {
                    starts_with_ignore_case(&alias.alias, member)
                } else {
                    alias.alias.eq_ignore_ascii_case(member)
                };
                let hidden = exclusions.iter().any(|e| e.hides(&used, &alias.method));
                if hit && !hidden {
                    alias_keys.push(MemberKey::new(used.clone(), &alias.method));
                }
            }
        }

        let strategy = if near {
            QueryStrategy::NearMatchMember { keys }
        } else {
            QueryStrategy::ExactMember { keys }
        };
        let mut tags = self.collect(TagQuery::new(strategy).limited(near));
        if !alias_keys.is_empty() && !self.is_cancelled() {
            tags.extend(self.collect(TagQuery::new(QueryStrategy::ExactMember { keys: alias_keys })));
            sort_by_key(&mut tags);
        }

        tags.retain(|tag| {
            let owner = QualifiedName::new(&tag.namespace_name, &tag.class_name);
            !exclusions.iter().any(|e| e.hides(&owner, &tag.identifier))
        });
        dedupe(filter_stale(tags))
    }

    fn non_member_names(&self, search: &TagSearch) -> Vec<NameKey> {
        match &search.namespace_name {
            Some(namespace) if search.class_name.is_empty() => {
                vec![NameKey::any_namespace(namespace)]
            }
            Some(namespace) => vec![
                NameKey::in_namespace(namespace, &search.class_name),
                NameKey::any_namespace(&qualify(namespace, &search.class_name)),
            ],
            None => vec![NameKey::any_namespace(&search.class_name)],
        }
    }

    fn search_class(&self, search: &TagSearch) -> QualifiedName {
        match &search.namespace_name {
            Some(namespace) => QualifiedName::new(namespace, &search.class_name),
            None => QualifiedName::unqualified(&search.class_name),
        }
    }

    fn namespaced_types() -> Vec<TagType> {
        let mut types = TagType::NON_MEMBERS.to_vec();
        types.push(TagType::Namespace);
        types
    }

    fn exact_files(&self, search: &TagSearch) -> Vec<Tag> {
        self.collect(TagQuery::new(QueryStrategy::ExactFile {
            names: vec![search.file_name.clone()],
        }))
    }

    fn near_match_files(&self, prefix: &str) -> Vec<Tag> {
        self.collect(
            TagQuery::new(QueryStrategy::NearMatchFile {
                prefix: prefix.to_string(),
            })
            .limited(true),
        )
    }

    pub fn is_resource_cache_empty(&self) -> bool {
        self.table_is_empty("SELECT EXISTS(SELECT 1 FROM resources)")
    }

    pub fn is_file_cache_empty(&self) -> bool {
        self.table_is_empty("SELECT EXISTS(SELECT 1 FROM file_items)")
    }

    fn table_is_empty(&self, sql: &str) -> bool {
        match self.conn.query_row(sql, [], |row| row.get::<_, bool>(0)) {
            Ok(any) => !any,
            Err(error) => {
                self.record(&StoreError::from(error));
                true
            }
        }
    }
}

impl TagLookup for TagFinder<'_> {
    fn exact_class_or_file(&self, search: &TagSearch) -> Vec<Tag> {
        let tags = match search.resource_type {
            ResourceType::ClassName => self.collect(TagQuery::new(QueryStrategy::ExactNonMember {
                names: self.non_member_names(search),
            })),
            ResourceType::ClassNameMethodName => {
                return self.exact_member_tags(&self.search_class(search), search.method());
            }
            ResourceType::NamespaceName if search.method_name.is_some() => {
                return self.exact_member_tags(&self.search_class(search), search.method());
            }
            ResourceType::NamespaceName if search.class_name.is_empty() => self.collect(
                TagQuery::new(QueryStrategy::ExactNonMember {
                    names: self.non_member_names(search),
                })
                .with_types(&[TagType::Namespace]),
            ),
            ResourceType::NamespaceName => self.collect(
                TagQuery::new(QueryStrategy::ExactNonMember {
                    names: self.non_member_names(search),
                })
                .with_types(&Self::namespaced_types()),
            ),
            ResourceType::FileName | ResourceType::FileNameLineNumber => self.exact_files(search),
        };
        dedupe(filter_stale(tags))
    }

    fn near_match_class_or_file(&self, search: &TagSearch) -> Vec<Tag> {
        let tags = match search.resource_type {
            ResourceType::ClassName => {
                let tags = self.collect(
                    TagQuery::new(QueryStrategy::NearMatchNonMember {
                        names: self.non_member_names(search),
                    })
                    .limited(true),
                );
                if tags.is_empty() {
                    self.near_match_files(&search.class_name)
                } else {
                    tags
                }
            }
            ResourceType::ClassNameMethodName => {
                return self.near_match_member_tags(&self.search_class(search), search.method());
            }
            ResourceType::NamespaceName if search.method_name.is_some() => {
                return self.near_match_member_tags(&self.search_class(search), search.method());
            }
            ResourceType::NamespaceName if search.class_name.is_empty() => {
                let namespace = search.namespace_name.clone().unwrap_or_default();
                let inside = NameKey::in_namespace(&namespace, "");
                let nested = NameKey::any_namespace(&format!("{namespace}\\"));
                self.collect(
                    TagQuery::new(QueryStrategy::NearMatchNonMember {
                        names: vec![inside, nested],
                    })
                    .with_types(&Self::namespaced_types())
                    .limited(true),
                )
            }
            ResourceType::NamespaceName => self.collect(
                TagQuery::new(QueryStrategy::NearMatchNonMember {
                    names: self.non_member_names(search),
                })
                .with_types(&Self::namespaced_types())
                .limited(true),
            ),
            ResourceType::FileName | ResourceType::FileNameLineNumber => {
                self.near_match_files(&search.file_name)
            }
        };
        dedupe(filter_stale(tags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_comparison_ignores_ascii_case() {
        assert!(starts_with_ignore_case("runFast", "RUN"));
        assert!(!starts_with_ignore_case("ru", "run"));
        assert!(starts_with_ignore_case("anything", ""));
    }

    #[test]
    fn exclusion_never_hides_the_declaring_trait() {
        let own = Exclusion {
            excluded_trait: QualifiedName::new("\\", "T1"),
            method: "go".into(),
            declared_by: QualifiedName::new("\\", "T1"),
        };
        assert!(!own.hides(&QualifiedName::new("\\", "T1"), "go"));

        let other = Exclusion {
            declared_by: QualifiedName::new("\\", "T2"),
            ..own
        };
        assert!(other.hides(&QualifiedName::new("\\", "t1"), "GO"));
        assert!(!other.hides(&QualifiedName::new("\\", "T2"), "go"));
    }
}
