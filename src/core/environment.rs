//! Spark environment deployment.
//!
//! The environment is created (or reused), published, and made the
//! workspace default once publishing reports `Success`. Publishing is slow,
//! so its state is polled on a stepped schedule: a long interval during an
//! initial window, then a shorter one, up to a ceiling. Hitting the ceiling
//! is a warning, not an error.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::error::{DeployError, DeployResult};
use super::resolver::ItemTables;
use super::throttle::Throttle;
use crate::adapters::EnvironmentService;
use crate::domain::{ArtifactType, DeploymentRun, ItemKey, RemoteItem};

/// Publish state that allows the environment to become the default
pub const PUBLISH_SUCCESS: &str = "Success";

const PUBLISH_RUNNING: &str = "Running";

/// Environment settings (the `environment` section of the config file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSettings {
    /// Display name (default: "Spark_Environment")
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Spark runtime set alongside the default environment (default: "1.3")
    #[serde(default = "default_runtime")]
    pub runtime_version: String,

    /// Give up waiting for publish after this many seconds (default: 1200)
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_seconds: u64,

    /// Poll interval during the initial window (default: 300)
    #[serde(default = "default_initial_interval")]
    pub publish_initial_interval_seconds: u64,

    /// Length of the initial window (default: 600)
    #[serde(default = "default_initial_window")]
    pub publish_initial_window_seconds: u64,

    /// Poll interval after the initial window (default: 60)
    #[serde(default = "default_interval")]
    pub publish_interval_seconds: u64,
}

fn default_name() -> String {
    "Spark_Environment".to_string()
}
fn default_runtime() -> String {
    "1.3".to_string()
}
fn default_publish_timeout() -> u64 {
    1200
}
fn default_initial_interval() -> u64 {
    300
}
fn default_initial_window() -> u64 {
    600
}
fn default_interval() -> u64 {
    60
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: None,
            runtime_version: default_runtime(),
            publish_timeout_seconds: default_publish_timeout(),
            publish_initial_interval_seconds: default_initial_interval(),
            publish_initial_window_seconds: default_initial_window(),
            publish_interval_seconds: default_interval(),
        }
    }
}

impl EnvironmentSettings {
    /// Wait before the next poll, given the time already spent
    pub fn poll_interval(&self, elapsed_seconds: u64) -> u64 {
        let interval = if elapsed_seconds < self.publish_initial_window_seconds {
            self.publish_initial_interval_seconds
        } else {
            self.publish_interval_seconds
        };
        interval.max(1)
    }
}

/// Poll the publish state until it leaves `Running`
///
/// Returns `None` if the ceiling was reached first.
pub async fn wait_for_publish<E: EnvironmentService + ?Sized>(
    api: &E,
    workspace_id: &str,
    environment_id: &str,
    settings: &EnvironmentSettings,
) -> DeployResult<Option<String>> {
    let mut elapsed = 0;

    while elapsed < settings.publish_timeout_seconds {
        match api.publish_state(workspace_id, environment_id).await? {
            Some(state) if state != PUBLISH_RUNNING => return Ok(Some(state)),
            state => info!(state = ?state, elapsed_seconds = elapsed, "Environment still publishing"),
        }

        let interval = settings.poll_interval(elapsed);
        tokio::time::sleep(Duration::from_secs(interval)).await;
        elapsed += interval;
    }

    Ok(None)
}

/// Create or reuse, publish and set as default
#[instrument(skip(api, tables, run, settings, throttle), fields(environment = %settings.name))]
pub async fn deploy_environment<E: EnvironmentService + ?Sized>(
    api: &E,
    workspace_id: &str,
    tables: &mut ItemTables,
    run: &mut DeploymentRun,
    settings: &EnvironmentSettings,
    throttle: &Throttle,
) -> DeployResult<()> {
    let key = ItemKey::new(ArtifactType::Environment, settings.name.clone());

    let environment_id = match tables.existing(&key) {
        Some(item) => {
            info!(live_id = %item.id, "Reusing existing environment");
            item.id.clone()
        }
        None => {
            throttle.admit("create environment").await;
            let id = api
                .create_environment(workspace_id, &settings.name, settings.description.as_deref())
                .await?;
            info!(live_id = %id, "Environment created");
            tables.record_deployed(RemoteItem::new(id.clone(), settings.name.clone(), ArtifactType::Environment));
            id
        }
    };
    run.record(ArtifactType::Environment, settings.name.clone(), environment_id.clone());

    throttle.admit("publish environment").await;
    api.publish_environment(workspace_id, &environment_id).await?;

    match wait_for_publish(api, workspace_id, &environment_id, settings).await? {
        None => {
            warn!(
                timeout_seconds = settings.publish_timeout_seconds,
                "Environment publish did not finish in time, default not changed"
            );
            Ok(())
        }
        Some(state) if state.eq_ignore_ascii_case(PUBLISH_SUCCESS) => {
            throttle.admit("set default environment").await;
            api.set_default_environment(workspace_id, &settings.name, &settings.runtime_version)
                .await?;
            info!(runtime = %settings.runtime_version, "Environment set as workspace default");
            Ok(())
        }
        Some(state) => Err(DeployError::EnvironmentPublishFailed {
            name: settings.name.clone(),
            state,
        }),
    }
}
