//! Local artifact store.
//!
//! Reads the source-control layout of a workspace:
//!
//! ```text
//! <artifact_path>/<target_folder>/
//!   Sales_Load.DataPipeline/
//!     .platform
//!     pipeline-content.json
//!   Notebook_1.Notebook/
//!     .platform
//!     notebook-content.py
//! ```
//!
//! Every `<name>.<Type>` folder holding a `.platform` file is one artifact.

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::core::error::{DeployError, DeployResult};
use crate::domain::{ArtifactType, DefinitionFile, LocalArtifact};

/// Item metadata file present in every artifact folder
pub const PLATFORM_FILE: &str = ".platform";

/// Types the store enumerates, in deployment phase order
pub const SCANNED_TYPES: [ArtifactType; 4] = [
    ArtifactType::Lakehouse,
    ArtifactType::Eventhouse,
    ArtifactType::Notebook,
    ArtifactType::DataPipeline,
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformMetadata {
    #[serde(rename = "type")]
    artifact_type: String,
    display_name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlatformConfig {
    logical_id: String,
}

#[derive(Debug, Deserialize)]
struct PlatformFile {
    metadata: PlatformMetadata,
    config: PlatformConfig,
}

/// Reads artifacts from one target folder of the repository
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    root: PathBuf,
}

impl ArtifactRepository {
    pub fn new(artifact_path: impl AsRef<Path>, target_folder: impl AsRef<Path>) -> Self {
        Self {
            root: artifact_path.as_ref().join(target_folder),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> DeployResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(DeployError::InvalidArtifact {
                path: self.root.display().to_string(),
                reason: "target folder does not exist".to_string(),
            })
        }
    }

    /// Folders of one type, sorted by path
    pub fn folders(&self, artifact_type: ArtifactType) -> DeployResult<Vec<PathBuf>> {
        self.ensure_root()?;

        let pattern = format!(
            "{}/**/*{}/{}",
            Pattern::escape(&self.root.to_string_lossy()),
            artifact_type.folder_suffix(),
            PLATFORM_FILE
        );

        let entries = glob::glob(&pattern).map_err(|e| DeployError::InvalidArtifact {
            path: self.root.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut folders: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter_map(|platform| platform.parent().map(Path::to_path_buf))
            .collect();
        folders.sort();
        folders.dedup();

        debug!(kind = %artifact_type, count = folders.len(), root = %self.root.display(), "Found artifact folders");
        Ok(folders)
    }

    /// Load every artifact of one type
    pub fn artifacts_of(&self, artifact_type: ArtifactType) -> DeployResult<Vec<LocalArtifact>> {
        self.folders(artifact_type)?
            .iter()
            .map(|folder| load_artifact(folder, artifact_type))
            .collect()
    }

    /// Load every artifact of every scanned type, in phase order
    pub fn scan(&self) -> DeployResult<Vec<LocalArtifact>> {
        let mut artifacts = Vec::new();
        for artifact_type in SCANNED_TYPES {
            artifacts.extend(self.artifacts_of(artifact_type)?);
        }
        Ok(artifacts)
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> DeployError {
    DeployError::InvalidArtifact {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Load one artifact folder
pub fn load_artifact(folder: &Path, artifact_type: ArtifactType) -> DeployResult<LocalArtifact> {
    let platform_path = folder.join(PLATFORM_FILE);
    let platform = fs::read_to_string(&platform_path).map_err(|e| invalid(&platform_path, e.to_string()))?;

    let parsed: PlatformFile =
        serde_json::from_str(&platform).map_err(|e| invalid(&platform_path, e.to_string()))?;

    let declared = ArtifactType::parse(&parsed.metadata.artifact_type);
    if declared != artifact_type {
        return Err(invalid(
            &platform_path,
            format!("declares type '{}' inside a {} folder", parsed.metadata.artifact_type, artifact_type),
        ));
    }

    let files = definition_files(folder)?;

    let definition = match artifact_type {
        ArtifactType::DataPipeline => {
            let content_name = artifact_type.content_file().unwrap_or_default();
            let content = files
                .iter()
                .find(|f| f.path == content_name)
                .ok_or_else(|| invalid(folder, format!("missing {}", content_name)))?;
            let document: Value = serde_json::from_str(&content.content)
                .map_err(|e| invalid(&folder.join(content_name), e.to_string()))?;
            Some(document)
        }
        _ => None,
    };

    Ok(LocalArtifact {
        artifact_type,
        display_name: parsed.metadata.display_name,
        logical_id: parsed.config.logical_id,
        description: parsed.metadata.description.unwrap_or_default(),
        folder: folder.to_path_buf(),
        files,
        platform,
        definition,
    })
}

/// Every file under the folder except `.platform`, with `/`-separated relative paths
fn definition_files(folder: &Path) -> DeployResult<Vec<DefinitionFile>> {
    let pattern = format!("{}/**/*", Pattern::escape(&folder.to_string_lossy()));
    let entries = glob::glob(&pattern).map_err(|e| invalid(folder, e.to_string()))?;

    let mut files = Vec::new();
    for path in entries.filter_map(Result::ok) {
        if !path.is_file() {
            continue;
        }
        let Ok(relative) = path.strip_prefix(folder) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if relative == PLATFORM_FILE {
            continue;
        }

        let content = fs::read_to_string(&path).map_err(|e| invalid(&path, e.to_string()))?;
        files.push(DefinitionFile {
            path: relative,
            content,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_item(root: &Path, folder: &str, kind: &str, name: &str, logical_id: &str, content: Option<(&str, &str)>) {
        let dir = root.join(folder);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(PLATFORM_FILE),
            format!(
                r#"{{"metadata":{{"type":"{}","displayName":"{}","description":"d"}},"config":{{"version":"2.0","logicalId":"{}"}}}}"#,
                kind, name, logical_id
            ),
        )
        .unwrap();
        if let Some((file, body)) = content {
            fs::write(dir.join(file), body).unwrap();
        }
    }

    #[test]
    fn test_scan_reads_metadata_and_files() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("ARM").join("Operations");
        write_item(&root, "Load.DataPipeline", "DataPipeline", "Load", "lid-1", Some(("pipeline-content.json", r#"{"properties":{}}"#)));
        write_item(&root, "Notebook_1.Notebook", "Notebook", "Notebook_1", "lid-2", Some(("notebook-content.py", "print(1)")));

        let repo = ArtifactRepository::new(temp.path(), "ARM/Operations");
        let artifacts = repo.scan().unwrap();

        assert_eq!(artifacts.len(), 2);
        let notebook = &artifacts[0];
        assert_eq!(notebook.artifact_type, ArtifactType::Notebook);
        assert_eq!(notebook.files.len(), 1);
        assert!(notebook.platform.contains("lid-2"));

        let pipeline = &artifacts[1];
        assert_eq!(pipeline.display_name, "Load");
        assert_eq!(pipeline.logical_id, "lid-1");
        assert_eq!(pipeline.description, "d");
        assert!(pipeline.definition.is_some());
        assert_eq!(pipeline.folder_name().as_deref(), Some("Load"));
    }

    #[test]
    fn test_missing_target_folder_is_an_error() {
        let temp = TempDir::new().unwrap();
        let repo = ArtifactRepository::new(temp.path(), "ARM/Nope");
        assert!(matches!(repo.scan(), Err(DeployError::InvalidArtifact { .. })));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let temp = TempDir::new().unwrap();
        write_item(&temp.path().join("items"), "Odd.Notebook", "Lakehouse", "Odd", "lid", None);

        let repo = ArtifactRepository::new(temp.path(), "items");
        assert!(repo.artifacts_of(ArtifactType::Notebook).is_err());
    }

    #[test]
    fn test_invalid_pipeline_json_is_rejected() {
        let temp = TempDir::new().unwrap();
        write_item(&temp.path().join("items"), "Bad.DataPipeline", "DataPipeline", "Bad", "lid", Some(("pipeline-content.json", "{not json")));

        let repo = ArtifactRepository::new(temp.path(), "items");
        assert!(repo.artifacts_of(ArtifactType::DataPipeline).is_err());
    }
}
