//! Configuration for fabdeploy.
//!
//! Configuration sources (highest priority first):
//! 1. Command line flags and their environment variables (handled by the CLI)
//! 2. Config file (`--config`, else `.fabdeploy/config.yaml` in the current
//!    directory or a parent, else `<config dir>/fabdeploy/config.yaml`)
//! 3. Defaults
//!
//! Paths in the config file are relative to the project root (the parent of
//! `.fabdeploy/`). Leaf components never read the environment; everything
//! they need is carried by [`ResolvedConfig`] and [`DeploymentTarget`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::auth::DEFAULT_TOKEN_URL;
use crate::adapters::fabric::DEFAULT_BASE_URL;
use crate::core::environment::EnvironmentSettings;
use crate::core::error::{DeployError, DeployResult};
use crate::core::lifecycle::PollingSettings;
use crate::core::rewrite::{ConnectionMapping, NotebookBindingSettings};
use crate::core::throttle::ThrottleSettings;

/// Directory holding the project config file
pub const CONFIG_DIR: &str = ".fabdeploy";
pub const CONFIG_FILE: &str = "config.yaml";

/// Parent folder of every transformation layer in the artifact repository
pub const LAYER_ROOT: &str = "ARM";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,

    /// Root of the exported workspace repository (relative to the project root)
    #[serde(default)]
    pub artifact_path: Option<String>,

    /// Layer deployed when none is given on the command line
    #[serde(default = "default_layer")]
    pub transformation_layer: String,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub profiles: Vec<DeploymentProfile>,

    #[serde(default)]
    pub connections: Vec<ConnectionMapping>,

    #[serde(default)]
    pub throttle: ThrottleSettings,

    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub environment: EnvironmentSettings,

    #[serde(default)]
    pub notebook_binding: NotebookBindingSettings,

    /// JSONL ledger of deployment records (relative to the project root)
    #[serde(default)]
    pub records_path: Option<String>,
}

fn default_layer() -> String {
    "Operations".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: Option<String>,

    /// Token endpoint template; `{tenant}` is replaced with the tenant id
    pub token_url: Option<String>,
}

/// Notebook allow-list, either as a YAML list or a `|`-separated string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotebookList {
    List(Vec<String>),
    Joined(String),
}

impl NotebookList {
    /// Trimmed, non-empty names
    pub fn names(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Joined(joined) => joined.split('|').collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// One row of the deployment profile table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentProfile {
    pub deployment_env: String,
    pub environment_type: String,
    pub transformation_layer: String,

    #[serde(default = "default_onboarded")]
    pub to_be_onboarded: bool,

    pub capacity_id: String,

    /// Display name of the target workspace
    pub workspace_prefix: String,

    /// Groups granted access to the workspace
    #[serde(default)]
    pub workspace_default_groups: Vec<String>,

    #[serde(default)]
    pub notebooks_to_deploy: Option<NotebookList>,
}

fn default_onboarded() -> bool {
    true
}

fn matches(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

impl DeploymentProfile {
    pub fn matches(&self, environment: &str, environment_type: &str, layer: &str) -> bool {
        self.to_be_onboarded
            && matches(&self.deployment_env, environment)
            && matches(&self.environment_type, environment_type)
            && matches(&self.transformation_layer, layer)
    }
}

/// The resolved profile row a run deploys to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    pub deployment_env: String,
    pub environment_type: String,
    pub transformation_layer: String,
    pub workspace_name: String,
    pub capacity_id: String,
    pub default_groups: Vec<String>,

    /// Empty means every notebook is deployed
    pub notebooks_to_deploy: Vec<String>,

    /// Folder under the artifact path (`ARM/<Layer>`)
    pub target_folder: String,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    pub artifact_path: PathBuf,
    pub transformation_layer: String,
    pub api_base_url: String,
    pub token_url: String,
    pub profiles: Vec<DeploymentProfile>,
    pub connections: Vec<ConnectionMapping>,
    pub throttle: ThrottleSettings,
    pub polling: PollingSettings,
    pub environment: EnvironmentSettings,
    pub notebook_binding: NotebookBindingSettings,
    pub records_path: Option<PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            config_file: None,
            artifact_path: PathBuf::from("."),
            transformation_layer: default_layer(),
            api_base_url: DEFAULT_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            profiles: Vec::new(),
            connections: Vec::new(),
            throttle: ThrottleSettings::default(),
            polling: PollingSettings::default(),
            environment: EnvironmentSettings::default(),
            notebook_binding: NotebookBindingSettings::default(),
            records_path: None,
        }
    }
}

impl ResolvedConfig {
    /// Pick the first onboarded profile matching environment, type and layer
    pub fn select_target(
        &self,
        environment: &str,
        environment_type: &str,
        layer: Option<&str>,
    ) -> DeployResult<DeploymentTarget> {
        let layer = layer.unwrap_or(&self.transformation_layer);

        let profile = self
            .profiles
            .iter()
            .find(|p| p.matches(environment, environment_type, layer))
            .ok_or_else(|| DeployError::NoMatchingProfile {
                environment: environment.to_string(),
                environment_type: environment_type.to_string(),
                layer: layer.to_string(),
            })?;

        if profile.workspace_prefix.trim().is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "profile for '{}' has an empty workspace_prefix",
                profile.deployment_env
            )));
        }

        let layer_name = profile.transformation_layer.trim().to_string();
        Ok(DeploymentTarget {
            deployment_env: profile.deployment_env.trim().to_string(),
            environment_type: profile.environment_type.trim().to_string(),
            target_folder: format!("{}/{}", LAYER_ROOT, layer_name),
            transformation_layer: layer_name,
            workspace_name: profile.workspace_prefix.trim().to_string(),
            capacity_id: profile.capacity_id.trim().to_string(),
            default_groups: profile.workspace_default_groups.clone(),
            notebooks_to_deploy: profile
                .notebooks_to_deploy
                .as_ref()
                .map(NotebookList::names)
                .unwrap_or_default(),
        })
    }

    /// Name of the workspace the default lakehouse is borrowed from
    pub fn borrowed_workspace_name(&self) -> Option<&str> {
        let marker = &self.notebook_binding.borrowed_workspace_marker;
        if marker.is_empty() {
            return None;
        }
        self.profiles
            .iter()
            .map(|p| p.workspace_prefix.as_str())
            .find(|name| name.contains(marker.as_str()))
    }
}

/// Find config file by searching current directory and parents, then the
/// user config directory
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(mut current) = std::env::current_dir() {
        loop {
            let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            if !current.pop() {
                break;
            }
        }
    }

    let user_config = dirs::config_dir()?.join("fabdeploy").join(CONFIG_FILE);
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Project root for a config file: the parent of `.fabdeploy/`, or the
/// directory holding the file when it lives elsewhere
fn project_root(config_path: &Path) -> PathBuf {
    let dir = config_path.parent().unwrap_or(Path::new("."));
    if dir.file_name().map(|n| n == CONFIG_DIR).unwrap_or(false) {
        dir.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        dir.to_path_buf()
    }
}

/// Resolve a parsed config file against its project root
pub fn resolve_config(config: ConfigFile, config_path: Option<&Path>) -> ResolvedConfig {
    let base_dir = config_path
        .map(project_root)
        .unwrap_or_else(|| PathBuf::from("."));

    ResolvedConfig {
        config_file: config_path.map(Path::to_path_buf),
        artifact_path: config
            .artifact_path
            .as_deref()
            .map(|p| resolve_path(&base_dir, p))
            .unwrap_or_else(|| base_dir.clone()),
        transformation_layer: config.transformation_layer,
        api_base_url: config
            .api
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        token_url: config
            .api
            .token_url
            .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        profiles: config.profiles,
        connections: config.connections,
        throttle: config.throttle,
        polling: config.polling,
        environment: config.environment,
        notebook_binding: config.notebook_binding,
        records_path: config
            .records_path
            .as_deref()
            .map(|p| resolve_path(&base_dir, p)),
    }
}

/// Load configuration from an explicit file or by discovery
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let config_file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(),
    };

    match config_file {
        Some(path) => {
            let config = load_config_file(&path)?;
            Ok(resolve_config(config, Some(&path)))
        }
        None => Ok(ResolvedConfig::default()),
    }
}
