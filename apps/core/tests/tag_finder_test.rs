use std::cell::Cell;
use std::path::{Path, PathBuf};

use phpdesk_core::tag::{QualifiedName, Tag, TagType, TraitTag};
use phpdesk_core::tag_finder::{dedupe, filter_stale, search_with_fallback, TagFinder, TagLookup};
use phpdesk_core::tag_search::TagSearch;
use phpdesk_core::tag_store::{self, FileItem};
use rusqlite::Connection;
use tempfile::TempDir;

/// An in-memory tag index whose files live in a temporary source directory.
struct Fixture {
    dir: TempDir,
    conn: Connection,
    source_id: i64,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let conn = tag_store::open_memory().unwrap();
        let source_id = tag_store::insert_source(&conn, dir.path()).unwrap();
        Self { dir, conn, source_id }
    }

    fn source_dir(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Registers a file; `on_disk` controls whether it actually exists.
    fn file(&self, name: &str, on_disk: bool) -> i64 {
        let path = self.dir.path().join(name);
        if on_disk {
            std::fs::write(&path, b"<?php\n").unwrap();
        }
        tag_store::insert_file_item(&self.conn, &FileItem::new(path, Some(self.source_id))).unwrap()
    }

    fn tag(&self, file_item_id: i64, mut tag: Tag) {
        tag.file_item_id = Some(file_item_id);
        tag.source_id = Some(self.source_id);
        tag_store::insert_tag(&self.conn, &tag).unwrap();
    }

    fn uses(&self, file_item_id: i64, trait_tag: TraitTag) {
        tag_store::insert_trait(&self.conn, &trait_tag, Some(file_item_id), Some(self.source_id)).unwrap();
    }

    fn finder(&self) -> TagFinder<'_> {
        TagFinder::new(&self.conn)
    }
}

fn identifiers(tags: &[Tag]) -> Vec<String> {
    tags.iter()
        .map(|tag| format!("{}::{}", tag.class_name, tag.identifier))
        .collect()
}

struct SpyLookup {
    exact: Vec<Tag>,
    near: Vec<Tag>,
    near_calls: Cell<usize>,
}

impl TagLookup for SpyLookup {
    fn exact_class_or_file(&self, _search: &TagSearch) -> Vec<Tag> {
        self.exact.clone()
    }

    fn near_match_class_or_file(&self, _search: &TagSearch) -> Vec<Tag> {
        self.near_calls.set(self.near_calls.get() + 1);
        self.near.clone()
    }
}

#[test]
fn near_match_runs_only_when_exact_finds_nothing() {
    let search = TagSearch::parse("User");
    let hit = SpyLookup {
        exact: vec![Tag::class("\\", "User")],
        near: vec![Tag::class("\\", "UserRepository")],
        near_calls: Cell::new(0),
    };
    let found = search_with_fallback(&hit, &search);
    assert_eq!(found, vec![Tag::class("\\", "User")]);
    assert_eq!(hit.near_calls.get(), 0);

    let miss = SpyLookup {
        exact: Vec::new(),
        ..hit
    };
    let found = search_with_fallback(&miss, &search);
    assert_eq!(found, vec![Tag::class("\\", "UserRepository")]);
    assert_eq!(miss.near_calls.get(), 1);
}

#[test]
fn insteadof_hides_the_losing_trait_method() {
    let fx = Fixture::new();
    let file = fx.file("Robot.php", true);
    fx.tag(file, Tag::class("\\", "Robot"));
    fx.tag(file, Tag::method("\\", "T1", "go"));
    fx.tag(file, Tag::method("\\", "T2", "go"));
    fx.tag(file, Tag::method("\\", "T1", "stop"));
    fx.uses(file, TraitTag::new("\\", "Robot", "\\", "T1"));
    fx.uses(file, TraitTag::new("\\", "Robot", "\\", "T2").with_instead_of("T1::go"));

    let finder = fx.finder();
    let go = finder.exact_member_tags(&QualifiedName::unqualified("Robot"), "go");
    assert_eq!(identifiers(&go), vec!["T2::go"]);

    let near_go = finder.near_match_member_tags(&QualifiedName::unqualified("Robot"), "go");
    assert_eq!(identifiers(&near_go), vec!["T2::go"]);

    let stop = finder.exact_member_tags(&QualifiedName::unqualified("Robot"), "stop");
    assert_eq!(identifiers(&stop), vec!["T1::stop"]);
}

#[test]
fn trait_aliases_resolve_to_the_aliased_method() {
    let fx = Fixture::new();
    let file = fx.file("Robot.php", true);
    fx.tag(file, Tag::class("\\", "Robot"));
    fx.tag(file, Tag::method("\\", "Mover", "go").with_signature("public function go()"));
    fx.tag(file, Tag::method("\\", "Other", "go"));
    fx.uses(file, TraitTag::new("\\", "Robot", "\\", "Mover").with_alias("go", "run"));
    fx.uses(file, TraitTag::new("\\", "Robot", "\\", "Other").with_instead_of("Mover::go"));

    let finder = fx.finder();
    let run = finder.exact_member_tags(&QualifiedName::unqualified("Robot"), "run");
    assert!(run.is_empty(), "alias of an excluded method must stay hidden: {run:?}");

    let fx = Fixture::new();
    let file = fx.file("Robot.php", true);
    fx.tag(file, Tag::class("\\", "Robot"));
    fx.tag(file, Tag::method("\\", "Mover", "go"));
    fx.uses(file, TraitTag::new("\\", "Robot", "\\", "Mover").with_alias("go", "run"));

    let finder = fx.finder();
    let run = finder.exact_member_tags(&QualifiedName::unqualified("Robot"), "run");
    assert_eq!(identifiers(&run), vec!["Mover::go"]);

    let near = finder.near_match_member_tags(&QualifiedName::unqualified("Robot"), "ru");
    assert_eq!(identifiers(&near), vec!["Mover::go"]);
}

#[test]
fn members_are_inherited_from_parent_classes() {
    let fx = Fixture::new();
    let file = fx.file("Models.php", true);
    fx.tag(file, Tag::class("\\App", "Base"));
    fx.tag(file, Tag::class("\\App", "Child").with_signature("class Child extends Base"));
    fx.tag(file, Tag::class("\\App", "GrandChild").with_signature("class GrandChild extends \\App\\Child"));
    fx.tag(file, Tag::method("\\App", "Base", "save"));
    fx.tag(file, Tag::method("\\App", "Child", "validate"));
    fx.tag(file, Tag::method("\\Elsewhere", "Base", "save"));

    let finder = fx.finder();
    let parents = finder.class_parents(&QualifiedName::new("\\App", "GrandChild"));
    assert_eq!(
        parents,
        vec![QualifiedName::new("\\App", "Child"), QualifiedName::new("\\App", "Base")]
    );

    let save = finder.exact_member_tags(&QualifiedName::unqualified("GrandChild"), "save");
    assert_eq!(save.len(), 1);
    assert_eq!(save[0].namespace_name, "\\App");

    let near = finder.near_match_member_tags(&QualifiedName::new("\\App", "GrandChild"), "");
    assert_eq!(identifiers(&near), vec!["Base::save", "Child::validate"]);
}

#[test]
fn inheritance_cycles_terminate() {
    let fx = Fixture::new();
    let file = fx.file("Loop.php", true);
    fx.tag(file, Tag::class("\\", "A").with_signature("class A extends B"));
    fx.tag(file, Tag::class("\\", "B").with_signature("class B extends A"));

    let parents = fx.finder().class_parents(&QualifiedName::new("\\", "A"));
    assert_eq!(parents, vec![QualifiedName::new("\\", "B")]);
}

#[test]
fn stale_files_are_dropped_but_native_and_new_tags_survive() {
    let fx = Fixture::new();
    let present = fx.file("Present.php", true);
    let missing = fx.file("Missing.php", false);
    let unsaved = fx.file("Unsaved.php", false);
    tag_store::mark_file_new(&fx.conn, unsaved, true).unwrap();

    fx.tag(present, Tag::function("\\", "strlen_wrapper"));
    fx.tag(missing, Tag::function("\\", "strlen_gone"));
    fx.tag(missing, Tag::function("\\", "strlen").native());
    fx.tag(unsaved, Tag::function("\\", "strlen_draft"));

    let search = TagSearch::parse("strlen");
    let tags = fx.finder().near_match_class_or_file(&search);
    let mut names: Vec<&str> = tags.iter().map(|tag| tag.identifier.as_str()).collect();
    names.sort();

    assert_eq!(names, vec!["strlen", "strlen_draft", "strlen_wrapper"]);
}

#[test]
fn filter_stale_and_dedupe_work_on_plain_tags() {
    let mut gone = Tag::class("\\", "Gone");
    gone.full_path = Some("/definitely/not/here/Gone.php".to_string());
    let fileless = Tag::class("\\", "Fileless");
    assert_eq!(filter_stale(vec![gone, fileless.clone()]), vec![fileless.clone()]);

    let shouting = Tag::class("\\", "FILELESS");
    assert_eq!(dedupe(vec![fileless.clone(), shouting]), vec![fileless]);
}

#[test]
fn class_lookup_falls_back_to_file_names() {
    let fx = Fixture::new();
    let file = fx.file("bootstrap.php", true);
    fx.tag(file, Tag::class("\\", "Kernel"));

    let search = TagSearch::parse("boot");
    let tags = search_with_fallback(&fx.finder(), &search);

    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].tag_type, TagType::File);
    assert_eq!(tags[0].identifier, "bootstrap.php");
}

#[test]
fn file_searches_match_file_names() {
    let fx = Fixture::new();
    fx.file("User.php", true);
    fx.file("UserRepository.php", true);

    let finder = fx.finder();
    let exact = finder.exact_class_or_file(&TagSearch::parse("user.php:42"));
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].identifier, "User.php");

    let near = search_with_fallback(&finder, &TagSearch::parse("UserR.php"));
    assert!(near.is_empty());

    let near = finder.near_match_class_or_file(&TagSearch::parse("User."));
    assert_eq!(near.len(), 1);
}

#[test]
fn namespace_searches_find_classes_and_namespaces() {
    let fx = Fixture::new();
    let file = fx.file("Models.php", true);
    fx.tag(file, Tag::namespace("\\App\\Models"));
    fx.tag(file, Tag::class("\\App", "Model"));
    fx.tag(file, Tag::class("\\App\\Models", "User"));
    fx.tag(file, Tag::class("\\Other", "Model"));

    let finder = fx.finder();

    let near = finder.near_match_class_or_file(&TagSearch::parse("\\App\\Mo"));
    let mut keys: Vec<&str> = near.iter().map(|tag| tag.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["Model", "\\App\\Models"]);

    let exact = finder.exact_class_or_file(&TagSearch::parse("App\\Models\\User"));
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].namespace_name, "\\App\\Models");

    let inside = finder.near_match_class_or_file(&TagSearch::parse("\\App\\Models\\"));
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].identifier, "User");

    let namespaces = finder.near_match_namespaces("App");
    assert_eq!(namespaces.len(), 1);
    assert_eq!(namespaces[0].tag_type, TagType::Namespace);
}

#[test]
fn namespaced_member_lookup_pins_the_class_namespace() {
    let fx = Fixture::new();
    let file = fx.file("Users.php", true);
    fx.tag(file, Tag::class("\\App", "User"));
    fx.tag(file, Tag::class("\\Admin", "User"));
    fx.tag(file, Tag::method("\\App", "User", "save"));
    fx.tag(file, Tag::method("\\Admin", "User", "save"));

    let finder = fx.finder();
    let pinned = finder.exact_class_or_file(&TagSearch::parse("\\Admin\\User::save"));
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].namespace_name, "\\Admin");

    let anywhere = finder.exact_class_or_file(&TagSearch::parse("User::save"));
    assert_eq!(anywhere.len(), 2);
}

#[test]
fn source_directories_scope_every_lookup() {
    let fx = Fixture::new();
    let file = fx.file("Local.php", true);
    fx.tag(file, Tag::class("\\", "Local"));

    let scoped = fx.finder().with_source_dirs(&[fx.source_dir()]);
    assert_eq!(scoped.exact_class(&QualifiedName::unqualified("Local")).len(), 1);

    let elsewhere = fx.finder().with_source_dirs(&[PathBuf::from("/no/such/source")]);
    assert!(elsewhere.exact_class(&QualifiedName::unqualified("Local")).is_empty());
}

#[test]
fn file_tags_and_cache_state() {
    let fx = Fixture::new();
    let finder = fx.finder();
    assert!(finder.is_resource_cache_empty());
    assert!(finder.is_file_cache_empty());

    let file = fx.file("helpers.php", true);
    fx.tag(file, Tag::function("\\", "array_first"));
    fx.tag(file, Tag::define("APP_ROOT"));

    let finder = fx.finder();
    assert!(!finder.is_resource_cache_empty());
    let path = fx.dir.path().join("helpers.php");
    let tags = finder.all_tags_in_file(Path::new(&path));
    assert_eq!(tags.len(), 2);
    assert_eq!(finder.all_non_member_tags().len(), 2);
    assert!(finder.exact_function("ARRAY_FIRST").len() == 1);
    assert!(finder.last_error().is_none());
}

#[test]
fn cancelled_member_lookups_stop_between_queries() {
    let fx = Fixture::new();
    let file = fx.file("Models.php", true);
    fx.tag(file, Tag::class("\\App", "Base"));
    fx.tag(file, Tag::class("\\App", "Child").with_signature("class Child extends Base"));
    fx.tag(file, Tag::method("\\App", "Base", "save"));
    let child = QualifiedName::new("\\App", "Child");

    assert_eq!(fx.finder().exact_member_tags(&child, "save").len(), 1);

    let polls = Cell::new(0usize);
    let cancelled_after_first_query = fx.finder().with_cancel_check(|| {
        polls.set(polls.get() + 1);
        polls.get() > 1
    });
    assert!(cancelled_after_first_query.exact_member_tags(&child, "save").is_empty());
    assert!(polls.get() >= 2);
}

#[test]
fn bulk_file_tags_stream_and_honor_cancellation() {
    let fx = Fixture::new();
    let file = fx.file("helpers.php", true);
    for name in ["first", "second", "third"] {
        fx.tag(file, Tag::function("\\", name));
    }
    let path = fx.dir.path().join("helpers.php");

    let mut names = Vec::new();
    let visited = fx.finder().for_each_tag_in_file(&path, |tag| {
        names.push(tag.identifier);
        true
    });
    assert_eq!(visited, 3);
    assert_eq!(names, vec!["first", "second", "third"]);

    let stopped = fx.finder().with_cancel_check(|| true);
    let mut none = 0;
    stopped.for_each_non_member_tag(|_| {
        none += 1;
        true
    });
    assert_eq!(none, 0);
}
