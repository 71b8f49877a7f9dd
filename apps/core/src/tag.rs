use serde::{Deserialize, Serialize};

pub const MEMBER_SEPARATOR: &str = "::";

pub const ROOT_NAMESPACE: &str = "\\";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    Class,
    Method,
    Member,
    Define,
    Function,
    ClassConstant,
    Namespace,
    File,
}

impl TagType {
    pub const NON_MEMBERS: [TagType; 3] = [TagType::Class, TagType::Function, TagType::Define];
    pub const MEMBERS: [TagType; 3] = [TagType::Method, TagType::Member, TagType::ClassConstant];

    pub fn code(self) -> i64 {
        match self {
            Self::Class => 0,
            Self::Method => 1,
            Self::Member => 2,
            Self::Define => 3,
            Self::Function => 4,
            Self::ClassConstant => 5,
            Self::Namespace => 6,
            Self::File => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Class),
            1 => Some(Self::Method),
            2 => Some(Self::Member),
            3 => Some(Self::Define),
            4 => Some(Self::Function),
            5 => Some(Self::ClassConstant),
            6 => Some(Self::Namespace),
            7 => Some(Self::File),
            _ => None,
        }
    }

    pub fn is_member(self) -> bool {
        Self::MEMBERS.contains(&self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: Option<i64>,
    pub file_item_id: Option<i64>,
    pub source_id: Option<i64>,
    pub key: String,
    pub identifier: String,
    pub class_name: String,
    pub namespace_name: String,
    pub tag_type: TagType,
    pub signature: String,
    pub return_type: String,
    pub comment: String,
    pub is_protected: bool,
    pub is_private: bool,
    pub is_static: bool,
    pub is_dynamic: bool,
    pub is_native: bool,
    pub has_variable_args: bool,
    pub full_path: Option<String>,
    pub file_is_new: bool,
}

impl Tag {
    fn blank(tag_type: TagType, namespace: &str, key: String, identifier: &str) -> Self {
        Self {
            id: None,
            file_item_id: None,
            source_id: None,
            key,
            identifier: identifier.to_string(),
            class_name: String::new(),
            namespace_name: normalize_namespace(namespace),
            tag_type,
            signature: String::new(),
            return_type: String::new(),
            comment: String::new(),
            is_protected: false,
            is_private: false,
            is_static: false,
            is_dynamic: false,
            is_native: false,
            has_variable_args: false,
            full_path: None,
            file_is_new: false,
        }
    }

    pub fn class(namespace: &str, name: &str) -> Self {
        Self::blank(TagType::Class, namespace, name.to_string(), name)
    }

    pub fn function(namespace: &str, name: &str) -> Self {
        Self::blank(TagType::Function, namespace, name.to_string(), name)
    }

    pub fn define(name: &str) -> Self {
        Self::blank(TagType::Define, ROOT_NAMESPACE, name.to_string(), name)
    }

    /// A namespace tag is keyed by its fully qualified name and lives in its
    /// parent namespace.
    pub fn namespace(fully_qualified: &str) -> Self {
        let qualified = normalize_namespace(fully_qualified);
        let (parent, _) = split_qualified(&qualified);
        Self::blank(TagType::Namespace, &parent, qualified.clone(), &qualified)
    }

    pub fn method(namespace: &str, class_name: &str, name: &str) -> Self {
        Self::member_of(TagType::Method, namespace, class_name, name)
    }

    pub fn property(namespace: &str, class_name: &str, name: &str) -> Self {
        Self::member_of(TagType::Member, namespace, class_name, name)
    }

    pub fn class_constant(namespace: &str, class_name: &str, name: &str) -> Self {
        Self::member_of(TagType::ClassConstant, namespace, class_name, name)
    }

    fn member_of(tag_type: TagType, namespace: &str, class_name: &str, name: &str) -> Self {
        let mut tag = Self::blank(tag_type, namespace, member_key(class_name, name), name);
        tag.class_name = class_name.to_string();
        tag
    }

    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = signature.to_string();
        self
    }

    pub fn with_return_type(mut self, return_type: &str) -> Self {
        self.return_type = return_type.to_string();
        self
    }

    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }

    pub fn is_member(&self) -> bool {
        self.tag_type.is_member()
    }

    pub fn fully_qualified_class_name(&self) -> String {
        if self.is_member() {
            qualify(&self.namespace_name, &self.class_name)
        } else {
            qualify(&self.namespace_name, &self.identifier)
        }
    }

    pub fn parent_class_name(&self) -> Option<QualifiedName> {
        if self.tag_type != TagType::Class {
            return None;
        }
        let mut words = self.signature.split_whitespace();
        while let Some(word) = words.next() {
            if word.eq_ignore_ascii_case("extends") {
                let parent = words.next()?.trim_end_matches(['{', ',']);
                if parent.is_empty() {
                    return None;
                }
                return Some(QualifiedName::resolve(&self.namespace_name, parent));
            }
        }
        None
    }

    pub fn skips_file_check(&self) -> bool {
        self.is_native || self.is_dynamic || self.file_is_new || self.full_path.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    pub namespace: Option<String>,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(normalize_namespace(namespace)),
            name: name.to_string(),
        }
    }

    pub fn unqualified(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn resolve(current_namespace: &str, name: &str) -> Self {
        if name.starts_with('\\') {
            let (namespace, short) = split_qualified(name);
            Self::new(&namespace, &short)
        } else if name.contains('\\') {
            let joined = qualify(current_namespace, name);
            let (namespace, short) = split_qualified(&joined);
            Self::new(&namespace, &short)
        } else {
            Self::new(current_namespace, name)
        }
    }

    pub fn fully_qualified(&self) -> String {
        match &self.namespace {
            Some(namespace) => qualify(namespace, &self.name),
            None => self.name.clone(),
        }
    }

    pub fn same_as(&self, other: &QualifiedName) -> bool {
        self.fully_qualified()
            .eq_ignore_ascii_case(&other.fully_qualified())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitTag {
    pub key: String,
    pub class_name: String,
    pub namespace_name: String,
    pub trait_name: String,
    pub trait_namespace_name: String,
    pub aliases: Vec<TraitAlias>,
    pub instead_ofs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraitAlias {
    pub method: String,
    pub alias: String,
}

impl TraitTag {
    pub fn new(namespace: &str, class_name: &str, trait_namespace: &str, trait_name: &str) -> Self {
        Self {
            key: class_name.to_string(),
            class_name: class_name.to_string(),
            namespace_name: normalize_namespace(namespace),
            trait_name: trait_name.to_string(),
            trait_namespace_name: normalize_namespace(trait_namespace),
            aliases: Vec::new(),
            instead_ofs: Vec::new(),
        }
    }

    pub fn with_alias(mut self, method: &str, alias: &str) -> Self {
        self.aliases.push(TraitAlias {
            method: method.to_string(),
            alias: alias.to_string(),
        });
        self
    }

    pub fn with_instead_of(mut self, excluded: &str) -> Self {
        self.instead_ofs.push(excluded.to_string());
        self
    }

    pub fn used_trait(&self) -> QualifiedName {
        QualifiedName::new(&self.trait_namespace_name, &self.trait_name)
    }

    pub fn excluded_methods(&self) -> Vec<(QualifiedName, String)> {
        self.instead_ofs
            .iter()
            .filter_map(|entry| {
                let (trait_ref, method) = entry.trim().rsplit_once(MEMBER_SEPARATOR)?;
                if trait_ref.is_empty() || method.is_empty() {
                    return None;
                }
                Some((
                    QualifiedName::resolve(&self.namespace_name, trait_ref),
                    method.to_string(),
                ))
            })
            .collect()
    }

    pub fn encode_aliases(&self) -> String {
        self.aliases
            .iter()
            .map(|a| format!("{} as {}", a.method, a.alias))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn decode_aliases(raw: &str) -> Vec<TraitAlias> {
        raw.split(',')
            .filter_map(|entry| {
                let (method, alias) = entry.trim().split_once(" as ")?;
                let (method, alias) = (method.trim(), alias.trim());
                if method.is_empty() || alias.is_empty() {
                    return None;
                }
                Some(TraitAlias {
                    method: method.to_string(),
                    alias: alias.to_string(),
                })
            })
            .collect()
    }

    pub fn encode_instead_ofs(&self) -> String {
        self.instead_ofs.join(",")
    }

    pub fn decode_instead_ofs(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }
}

pub fn member_key(class_name: &str, member: &str) -> String {
    format!("{class_name}{MEMBER_SEPARATOR}{member}")
}

pub fn normalize_namespace(namespace: &str) -> String {
    let trimmed = namespace.trim().trim_matches('\\');
    if trimmed.is_empty() {
        ROOT_NAMESPACE.to_string()
    } else {
        format!("\\{trimmed}")
    }
}

pub fn qualify(namespace: &str, name: &str) -> String {
    let namespace = normalize_namespace(namespace);
    if namespace == ROOT_NAMESPACE {
        format!("\\{name}")
    } else {
        format!("{namespace}\\{name}")
    }
}

pub fn split_qualified(fully_qualified: &str) -> (String, String) {
    let trimmed = fully_qualified.trim().trim_end_matches('\\');
    match trimmed.rfind('\\') {
        Some(pos) => (normalize_namespace(&trimmed[..pos]), trimmed[pos + 1..].to_string()),
        None => (ROOT_NAMESPACE.to_string(), trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_namespaces() {
        assert_eq!(normalize_namespace(""), "\\");
        assert_eq!(normalize_namespace("Foo\\Bar"), "\\Foo\\Bar");
        assert_eq!(normalize_namespace("\\Foo\\"), "\\Foo");
    }

    #[test]
    fn splits_and_qualifies() {
        assert_eq!(
            split_qualified("\\First\\Child\\User"),
            ("\\First\\Child".to_string(), "User".to_string())
        );
        assert_eq!(split_qualified("User"), ("\\".to_string(), "User".to_string()));
        assert_eq!(qualify("\\", "User"), "\\User");
        assert_eq!(qualify("\\First", "User"), "\\First\\User");
    }

    #[test]
    fn parent_class_resolves_relative_to_namespace() {
        let tag = Tag::class("\\App\\Models", "User")
            .with_signature("class User extends Model implements Countable");
        let parent = tag.parent_class_name().unwrap();
        assert_eq!(parent.fully_qualified(), "\\App\\Models\\Model");

        let absolute = Tag::class("\\App", "Admin").with_signature("class Admin extends \\Base\\User {");
        assert_eq!(
            absolute.parent_class_name().unwrap().fully_qualified(),
            "\\Base\\User"
        );
        assert!(Tag::class("\\", "Plain").with_signature("class Plain").parent_class_name().is_none());
    }

    #[test]
    fn trait_lists_decode_from_delimited_strings() {
        let aliases = TraitTag::decode_aliases("go as run, stop as halt,broken");
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases[1].alias, "halt");

        let tag = TraitTag::new("\\App", "C", "\\App", "T2").with_instead_of("T1::go");
        let excluded = tag.excluded_methods();
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].0.fully_qualified(), "\\App\\T1");
        assert_eq!(excluded[0].1, "go");
    }

    #[test]
    fn type_codes_round_trip() {
        for tag_type in [TagType::Class, TagType::ClassConstant, TagType::File] {
            assert_eq!(TagType::from_code(tag_type.code()), Some(tag_type));
        }
        assert_eq!(TagType::from_code(42), None);
    }
}
