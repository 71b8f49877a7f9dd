use crate::tag::{normalize_namespace, split_qualified, MEMBER_SEPARATOR};

const FILE_NAME_CHARS: [char; 9] = ['.', '/', ':', '*', '?', '"', '<', '>', '|'];

// Classification order: `::`, then a backslash, then `file:line`, then a file
// name. `C:\dir\file.php` is read as a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    ClassName,
    ClassNameMethodName,
    NamespaceName,
    FileNameLineNumber,
    FileName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSearch {
    pub raw: String,
    pub resource_type: ResourceType,
    pub namespace_name: Option<String>,
    pub class_name: String,
    pub method_name: Option<String>,
    pub file_name: String,
    pub line_number: Option<u32>,
}

impl TagSearch {
    pub fn parse(query: &str) -> Self {
        let raw = query.trim().to_string();
        let mut search = Self {
            raw: raw.clone(),
            resource_type: ResourceType::ClassName,
            namespace_name: None,
            class_name: String::new(),
            method_name: None,
            file_name: String::new(),
            line_number: None,
        };

        if let Some((class_part, method)) = raw.split_once(MEMBER_SEPARATOR) {
            search.method_name = Some(method.to_string());
            if class_part.contains('\\') {
                let (namespace, class_name) = split_namespaced(class_part);
                search.resource_type = ResourceType::NamespaceName;
                search.namespace_name = Some(namespace);
                search.class_name = class_name;
            } else {
                search.resource_type = ResourceType::ClassNameMethodName;
                search.class_name = class_part.to_string();
            }
            return search;
        }

        if raw.contains('\\') {
            let (namespace, class_name) = split_namespaced(&raw);
            search.resource_type = ResourceType::NamespaceName;
            search.namespace_name = Some(namespace);
            search.class_name = class_name;
            return search;
        }

        if let Some((file_name, line)) = raw.rsplit_once(':') {
            if let Ok(line_number) = line.trim().parse::<u32>() {
                search.resource_type = ResourceType::FileNameLineNumber;
                search.file_name = file_name.to_string();
                search.line_number = Some(line_number);
                return search;
            }
        }

        if raw.contains(FILE_NAME_CHARS) {
            search.resource_type = ResourceType::FileName;
            search.file_name = raw;
            return search;
        }

        search.class_name = raw;
        search
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn method(&self) -> &str {
        self.method_name.as_deref().unwrap_or_default()
    }
}

fn split_namespaced(text: &str) -> (String, String) {
    if text.ends_with('\\') {
        return (normalize_namespace(text), String::new());
    }
    let qualified = if text.starts_with('\\') {
        text.to_string()
    } else {
        format!("\\{text}")
    };
    split_qualified(&qualified)
}
