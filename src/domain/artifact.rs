//! Deployable artifacts and the items the remote workspace reports.
//!
//! A `LocalArtifact` is what the repository on disk describes; a
//! `RemoteItem` is what the workspace currently holds. Both are keyed by
//! `(type, display name)` when matching one against the other.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kinds of workspace items the deployer knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactType {
    DataPipeline,
    Notebook,
    Lakehouse,
    Eventhouse,
    Environment,
    #[serde(rename = "KQLDatabase")]
    KqlDatabase,
    Workspace,

    /// Any item type this tool does not manage (reports, semantic models, ...)
    #[serde(other)]
    Other,
}

impl ArtifactType {
    /// Name used by the remote API and in `.platform` metadata
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataPipeline => "DataPipeline",
            Self::Notebook => "Notebook",
            Self::Lakehouse => "Lakehouse",
            Self::Eventhouse => "Eventhouse",
            Self::Environment => "Environment",
            Self::KqlDatabase => "KQLDatabase",
            Self::Workspace => "Workspace",
            Self::Other => "Other",
        }
    }

    /// Parse a type name, ignoring case and surrounding whitespace
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "datapipeline" => Self::DataPipeline,
            "notebook" => Self::Notebook,
            "lakehouse" => Self::Lakehouse,
            "eventhouse" => Self::Eventhouse,
            "environment" => Self::Environment,
            "kqldatabase" => Self::KqlDatabase,
            "workspace" => Self::Workspace,
            _ => Self::Other,
        }
    }

    /// Folder suffix used by the source-control layout (`<name>.<Type>`)
    pub fn folder_suffix(&self) -> String {
        format!(".{}", self.as_str())
    }

    /// The file inside an item folder that carries its main content
    pub fn content_file(&self) -> Option<&'static str> {
        match self {
            Self::DataPipeline => Some("pipeline-content.json"),
            Self::Notebook => Some("notebook-content.py"),
            Self::Lakehouse => Some("lakehouse.metadata.json"),
            Self::Eventhouse => Some("EventhouseProperties.json"),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite lookup key: an item type plus one of its identifying strings
/// (display name, logical id or live id depending on the table).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub artifact_type: ArtifactType,
    pub value: String,
}

impl ItemKey {
    pub fn new(artifact_type: ArtifactType, value: impl Into<String>) -> Self {
        Self {
            artifact_type,
            value: value.into(),
        }
    }
}

impl fmt::Display for ItemKey {
    /// Renders as `displayName.Type`, the same form the source folders use
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.value, self.artifact_type)
    }
}

/// An item as listed by the remote workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    #[serde(default)]
    pub description: Option<String>,
}

impl RemoteItem {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        artifact_type: ArtifactType,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            artifact_type,
            description: None,
        }
    }

    /// Key by display name, used to find an existing item to update
    pub fn name_key(&self) -> ItemKey {
        ItemKey::new(self.artifact_type, self.display_name.clone())
    }
}

/// One file belonging to an item definition, before encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionFile {
    /// Path relative to the item folder (e.g. `pipeline-content.json`)
    pub path: String,

    /// Raw UTF-8 content
    pub content: String,
}

/// An artifact described by the on-disk repository
#[derive(Debug, Clone)]
pub struct LocalArtifact {
    pub artifact_type: ArtifactType,
    pub display_name: String,
    pub logical_id: String,
    pub description: String,

    /// The `<name>.<Type>` folder holding the item
    pub folder: PathBuf,

    /// Every file in the folder except `.platform`
    pub files: Vec<DefinitionFile>,

    /// Raw `.platform` content (notebooks upload it alongside their source)
    pub platform: String,

    /// Parsed content document for pipelines (`pipeline-content.json`)
    pub definition: Option<serde_json::Value>,
}

impl LocalArtifact {
    /// Display name derived from the folder naming convention
    /// (`Sales_Load.DataPipeline` -> `Sales_Load`)
    pub fn folder_name(&self) -> Option<String> {
        let name = self.folder.file_name()?.to_str()?;
        let suffix = self.artifact_type.folder_suffix();
        Some(name.strip_suffix(suffix.as_str()).unwrap_or(name).to_string())
    }

    /// The main content file, if present
    pub fn content(&self) -> Option<&DefinitionFile> {
        let name = self.artifact_type.content_file()?;
        self.files.iter().find(|f| f.path == name)
    }

    pub fn name_key(&self) -> ItemKey {
        ItemKey::new(self.artifact_type, self.display_name.clone())
    }
}
