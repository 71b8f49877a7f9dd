use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tag::{Tag, TagType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagDto {
    pub key: String,
    pub identifier: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub class_name: String,
    pub namespace_name: String,
    #[serde(rename = "type")]
    pub tag_type: TagType,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub signature: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub return_type: String,
    pub full_path: Option<String>,
    pub is_native: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagSearchResponse {
    pub query: String,
    pub tags: Vec<TagDto>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileListingResponse {
    pub files: Vec<String>,
}

impl From<Tag> for TagDto {
    fn from(value: Tag) -> Self {
        Self {
            key: value.key,
            identifier: value.identifier,
            class_name: value.class_name,
            namespace_name: value.namespace_name,
            tag_type: value.tag_type,
            signature: value.signature,
            return_type: value.return_type,
            full_path: value.full_path,
            is_native: value.is_native,
        }
    }
}

impl TagSearchResponse {
    pub fn new(query: &str, tags: Vec<Tag>, error: Option<String>) -> Self {
        Self {
            query: query.to_string(),
            tags: tags.into_iter().map(TagDto::from).collect(),
            error,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl FileListingResponse {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
