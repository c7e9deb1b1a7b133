//! Identifier resolution between the repository and the live workspace.
//!
//! Two tables are kept side by side:
//! - repository: `(type, logical id)` -> entry, built from `.platform` files
//! - deployed: `(type, live id)` -> remote item, built from the item listing
//!   and updated as the run creates, renames and deletes items
//!
//! Lookups return `Option`; "not found" is never an error.

use std::collections::HashMap;

use indexmap::IndexMap;

use super::error::{DeployError, DeployResult};
use crate::domain::{ArtifactType, ItemKey, LocalArtifact, RemoteItem};

/// Which table an identifier should be looked up in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    /// Id is a logical id from the repository
    Repository,

    /// Id is a live id from the workspace
    Deployed,
}

/// A repository item as seen by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    pub artifact_type: ArtifactType,
    pub display_name: String,
    pub logical_id: String,
}

/// Resolves a referenced id to the display name of its target
pub trait Resolve {
    fn resolve(
        &self,
        artifact_type: ArtifactType,
        id: &str,
        source: LookupSource,
    ) -> DeployResult<Option<String>>;
}

/// Repository and deployed lookup tables
#[derive(Debug, Clone, Default)]
pub struct ItemTables {
    repository: IndexMap<ItemKey, RepositoryEntry>,
    deployed: HashMap<ItemKey, RemoteItem>,
    deployed_by_name: HashMap<ItemKey, String>,
}

impl ItemTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build both tables at once
    pub fn build(artifacts: &[LocalArtifact], items: &[RemoteItem]) -> DeployResult<Self> {
        let mut tables = Self::new();
        for artifact in artifacts {
            tables.add_repository(artifact)?;
        }
        tables.set_deployed(items);
        Ok(tables)
    }

    /// Register a repository artifact; logical ids must be unique per type
    pub fn add_repository(&mut self, artifact: &LocalArtifact) -> DeployResult<()> {
        let key = ItemKey::new(artifact.artifact_type, artifact.logical_id.clone());

        if let Some(existing) = self.repository.get(&key) {
            if existing.display_name != artifact.display_name {
                return Err(DeployError::InvalidArtifact {
                    path: artifact.folder.display().to_string(),
                    reason: format!(
                        "logical id {} is already used by {} '{}'",
                        artifact.logical_id, artifact.artifact_type, existing.display_name
                    ),
                });
            }
        }

        self.repository.insert(
            key,
            RepositoryEntry {
                artifact_type: artifact.artifact_type,
                display_name: artifact.display_name.clone(),
                logical_id: artifact.logical_id.clone(),
            },
        );
        Ok(())
    }

    /// Replace the deployed table with a fresh listing
    pub fn set_deployed(&mut self, items: &[RemoteItem]) {
        self.deployed.clear();
        self.deployed_by_name.clear();
        for item in items {
            self.record_deployed(item.clone());
        }
    }

    /// Insert or replace one deployed item
    pub fn record_deployed(&mut self, item: RemoteItem) {
        let name_key = item.name_key();
        if let Some(previous) = self.deployed_by_name.get(&name_key) {
            self.deployed
                .remove(&ItemKey::new(item.artifact_type, previous.clone()));
        }
        self.deployed_by_name.insert(name_key, item.id.clone());
        self.deployed
            .insert(ItemKey::new(item.artifact_type, item.id.clone()), item);
    }

    /// Drop a deployed item (after deletion)
    pub fn forget_deployed(&mut self, artifact_type: ArtifactType, live_id: &str) {
        if let Some(item) = self.deployed.remove(&ItemKey::new(artifact_type, live_id)) {
            let name_key = item.name_key();
            if self.deployed_by_name.get(&name_key) == Some(&item.id) {
                self.deployed_by_name.remove(&name_key);
            }
        }
    }

    /// Live id of a deployed item by `(type, display name)`
    pub fn live_id(&self, artifact_type: ArtifactType, display_name: &str) -> Option<&str> {
        self.deployed_by_name
            .get(&ItemKey::new(artifact_type, display_name))
            .map(String::as_str)
    }

    /// Existing remote item with the given name key
    pub fn existing(&self, key: &ItemKey) -> Option<&RemoteItem> {
        let live_id = self.deployed_by_name.get(key)?;
        self.deployed
            .get(&ItemKey::new(key.artifact_type, live_id.clone()))
    }

    /// Deployed items of one type
    pub fn deployed_of(&self, artifact_type: ArtifactType) -> Vec<&RemoteItem> {
        let mut items: Vec<&RemoteItem> = self
            .deployed
            .values()
            .filter(|i| i.artifact_type == artifact_type)
            .collect();
        items.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        items
    }

    /// Repository entries in registration order
    pub fn repository_entries(&self) -> impl Iterator<Item = &RepositoryEntry> {
        self.repository.values()
    }

    /// Live id for the repository item carrying `logical_id`
    pub fn live_id_for_logical(&self, artifact_type: ArtifactType, logical_id: &str) -> Option<&str> {
        let entry = self
            .repository
            .get(&ItemKey::new(artifact_type, logical_id))?;
        self.live_id(entry.artifact_type, &entry.display_name)
    }
}

impl Resolve for ItemTables {
    fn resolve(
        &self,
        artifact_type: ArtifactType,
        id: &str,
        source: LookupSource,
    ) -> DeployResult<Option<String>> {
        let key = ItemKey::new(artifact_type, id);
        let name = match source {
            LookupSource::Repository => self.repository.get(&key).map(|e| e.display_name.clone()),
            LookupSource::Deployed => self.deployed.get(&key).map(|i| i.display_name.clone()),
        };
        Ok(name)
    }
}
