//! The metadata blob a client attaches to an upload.
//!
//! Carried as the `metadata` multipart field or the `X-Metadata` header.

use crate::models::object::ObjectKind;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Key-value description of the object being uploaded.
///
/// Only `projectName` is mandatory; the receiver rejects a transfer whose
/// project name is missing or blank.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransferMetadata {
    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ObjectKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Accepts either a list or a comma separated string.
    #[serde(
        default,
        deserialize_with = "deserialize_tags",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TransferMetadata {
    /// Metadata for a generic file upload into `project`.
    pub fn files(project: impl Into<String>) -> Self {
        Self {
            project_name: Some(project.into()),
            kind: Some(ObjectKind::Files),
            ..Self::default()
        }
    }

    /// Metadata for a video upload into `project`.
    pub fn video(project: impl Into<String>) -> Self {
        Self {
            project_name: Some(project.into()),
            kind: Some(ObjectKind::Video),
            ..Self::default()
        }
    }

    /// The project name, if present and not blank.
    pub fn project_name(&self) -> Option<&str> {
        self.project_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagsInput {
    List(Vec<String>),
    Text(String),
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let tags = match Option::<TagsInput>::deserialize(deserializer)? {
        Some(TagsInput::List(list)) => list,
        Some(TagsInput::Text(text)) => text.split(',').map(str::to_string).collect(),
        None => Vec::new(),
    };
    Ok(tags
        .into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect())
}
