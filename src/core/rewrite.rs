//! Content rewrites applied before items are uploaded.
//!
//! - Pipelines: dataset connection references are pointed at the live
//!   connections for their category, linked services get the target
//!   workspace id, Kusto linked services get endpoint and database.
//! - Notebooks: the `# META` header is re-bound to a live lakehouse.
//!
//! Both operate on parsed JSON, never on regex matches.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::error::{DeployError, DeployResult};
use crate::adapters::ConnectionDirectory;

/// Maps a connection category to the display name of a live connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMapping {
    /// Category, e.g. "Azure Blob Storage"
    #[serde(rename = "type")]
    pub category: String,

    pub connection_name: String,
}

/// Which connection category a dataset belongs to
pub fn connection_category(dataset_settings: &Value) -> Option<&'static str> {
    let location_type = dataset_settings
        .pointer("/typeProperties/location/type")
        .and_then(Value::as_str);
    let dataset_type = dataset_settings.get("type").and_then(Value::as_str);

    match (location_type, dataset_type) {
        (Some("AzureBlobStorageLocation"), _) => Some("Azure Blob Storage"),
        (_, Some("SqlServerTable")) => Some("SQL Server"),
        (_, Some("LakehouseTable")) => Some("Fabric Lakehouse"),
        (Some("AzureDataLakeStorageLocation"), _) => Some("Azure Data Lake Storage"),
        (_, Some("AzureSqlTable")) => Some("Azure SQL Database"),
        _ => None,
    }
}

/// Kusto settings injected into `KustoDatabase` linked services
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KustoTarget {
    pub endpoint: Option<String>,
    pub database_id: Option<String>,
}

/// Live connection ids by category, resolved once per document
pub type ConnectionIds = HashMap<String, String>;

/// Visit every object in the document, depth first
fn walk_objects<F>(node: &Value, f: &mut F)
where
    F: FnMut(&Map<String, Value>),
{
    match node {
        Value::Object(map) => {
            f(map);
            for child in map.values() {
                walk_objects(child, f);
            }
        }
        Value::Array(items) => {
            for child in items {
                walk_objects(child, f);
            }
        }
        _ => {}
    }
}

fn walk_objects_mut<F>(node: &mut Value, f: &mut F)
where
    F: FnMut(&mut Map<String, Value>),
{
    match node {
        Value::Object(map) => {
            f(map);
            for child in map.values_mut() {
                walk_objects_mut(child, f);
            }
        }
        Value::Array(items) => {
            for child in items {
                walk_objects_mut(child, f);
            }
        }
        _ => {}
    }
}

/// Look up the live connection id of every category used in `document`
///
/// Categories without a configured mapping, and connections that cannot be
/// found or looked up, are logged and left out.
pub async fn resolve_connections<C: ConnectionDirectory + ?Sized>(
    document: &Value,
    mappings: &[ConnectionMapping],
    directory: &C,
) -> ConnectionIds {
    let mut categories = Vec::new();
    walk_objects(document, &mut |map| {
        if let Some(category) = map.get("datasetSettings").and_then(rewritable_dataset_category) {
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
    });

    let mut ids = ConnectionIds::new();
    for category in categories {
        let Some(mapping) = mappings.iter().find(|m| m.category == category) else {
            debug!(category, "No connection configured for category");
            continue;
        };

        match directory.find_connection_id(&mapping.connection_name).await {
            Ok(Some(id)) => {
                ids.insert(category.to_string(), id);
            }
            Ok(None) => {
                warn!(category, connection = %mapping.connection_name, "Could not find connection id");
            }
            Err(e) => {
                warn!(category, connection = %mapping.connection_name, error = %e, "Connection lookup failed");
            }
        }
    }

    ids
}

/// Point connection references and linked services at the target workspace
pub fn rewrite_connections(
    document: &mut Value,
    connection_ids: &ConnectionIds,
    workspace_id: &str,
    kusto: &KustoTarget,
) {
    walk_objects_mut(document, &mut |map| {
        if let Some(settings) = map.get_mut("datasetSettings") {
            let category = rewritable_dataset_category(settings);
            if let Some(id) = category.and_then(|c| connection_ids.get(c)) {
                if let Some(references) = settings
                    .get_mut("externalReferences")
                    .and_then(Value::as_object_mut)
                {
                    references.insert("connection".to_string(), Value::String(id.clone()));
                    info!(category = category.unwrap_or_default(), connection_id = %id, "Updated dataset connection");
                }
            }

            if let Some(type_properties) = settings
                .pointer_mut("/linkedService/properties/typeProperties")
                .and_then(Value::as_object_mut)
            {
                type_properties.insert("workspaceId".to_string(), Value::String(workspace_id.to_string()));
            }
        }

        if let Some(properties) = map
            .get_mut("linkedService")
            .and_then(|ls| ls.get_mut("properties"))
        {
            let is_kusto = properties.get("type").and_then(Value::as_str) == Some("KustoDatabase");
            if let Some(type_properties) = properties
                .get_mut("typeProperties")
                .and_then(Value::as_object_mut)
                .filter(|_| is_kusto)
            {
                type_properties.insert("workspaceId".to_string(), Value::String(workspace_id.to_string()));
                if let Some(endpoint) = &kusto.endpoint {
                    type_properties.insert("endpoint".to_string(), Value::String(endpoint.clone()));
                }
                if let Some(database_id) = &kusto.database_id {
                    type_properties.insert("database".to_string(), Value::String(database_id.clone()));
                }
            }
        }
    });
}

/// Category of dataset settings that carry a connection reference
fn rewritable_dataset_category(settings: &Value) -> Option<&'static str> {
    if settings.get("typeProperties").is_some() && settings.get("externalReferences").is_some() {
        connection_category(settings)
    } else {
        None
    }
}

/// Serialize with four-space indentation, the layout used for uploads
pub fn to_pretty_json(document: &Value) -> DeployResult<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    document
        .serialize(&mut serializer)
        .map_err(|e| DeployError::UnexpectedResponse {
            operation: "serialize definition".to_string(),
            reason: e.to_string(),
        })?;

    String::from_utf8(buffer).map_err(|e| DeployError::UnexpectedResponse {
        operation: "serialize definition".to_string(),
        reason: e.to_string(),
    })
}

/// Notebook lakehouse binding settings (the `notebook_binding` config section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookBindingSettings {
    /// Lakehouse bound when a notebook names none or an unknown one (default: "Bronze")
    #[serde(default = "default_lakehouse")]
    pub default_lakehouse: String,

    /// Target folders containing this bind only to the default lakehouse
    #[serde(default = "default_dedicated_marker")]
    pub dedicated_folder_marker: String,

    /// Target folders containing this borrow the default lakehouse from another workspace
    #[serde(default = "default_borrowed_marker")]
    pub borrowed_folder_marker: String,

    /// Marker in the name of the workspace the default lakehouse is borrowed from
    #[serde(default = "default_borrowed_workspace_marker")]
    pub borrowed_workspace_marker: String,
}

fn default_lakehouse() -> String {
    "Bronze".to_string()
}
fn default_dedicated_marker() -> String {
    "Data_Ingestion".to_string()
}
fn default_borrowed_marker() -> String {
    "Data_Non_Security".to_string()
}
fn default_borrowed_workspace_marker() -> String {
    "-bronze".to_string()
}

impl Default for NotebookBindingSettings {
    fn default() -> Self {
        Self {
            default_lakehouse: default_lakehouse(),
            dedicated_folder_marker: default_dedicated_marker(),
            borrowed_folder_marker: default_borrowed_marker(),
            borrowed_workspace_marker: default_borrowed_workspace_marker(),
        }
    }
}

/// How notebooks in a target folder pick their lakehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderCategory {
    /// Only the default lakehouse of this workspace
    Dedicated,

    /// Default lakehouse from another workspace, the rest from this one
    Borrowed,

    /// Whatever lakehouse the notebook already names
    Standard,
}

impl NotebookBindingSettings {
    pub fn category(&self, target_folder: &str) -> FolderCategory {
        if !self.dedicated_folder_marker.is_empty() && target_folder.contains(&self.dedicated_folder_marker) {
            FolderCategory::Dedicated
        } else if !self.borrowed_folder_marker.is_empty() && target_folder.contains(&self.borrowed_folder_marker) {
            FolderCategory::Borrowed
        } else {
            FolderCategory::Standard
        }
    }
}

/// A live lakehouse a notebook can be bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LakehouseRef {
    pub id: String,
    pub workspace_id: String,
}

/// Lakehouses available for binding, by display name
pub type LakehouseCatalog = IndexMap<String, LakehouseRef>;

/// Range of lines forming the first `# META { ... }` block
fn metadata_block(lines: &[&str]) -> Option<(usize, usize)> {
    fn meta_body(line: &str) -> Option<&str> {
        let rest = line.trim_start().strip_prefix("# META")?;
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            Some(rest)
        } else {
            None
        }
    }

    let start = lines
        .iter()
        .position(|line| meta_body(line).is_some_and(|body| body.trim_start().starts_with('{')))?;
    let end = lines[start..]
        .iter()
        .position(|line| meta_body(line).is_none())
        .map(|offset| start + offset)
        .unwrap_or(lines.len());

    Some((start, end))
}

/// Re-bind a notebook's default lakehouse
///
/// Returns `None` when the content is left as is: no metadata block, no
/// lakehouse to bind, or a lakehouse missing from the catalog.
pub fn bind_notebook(
    content: &str,
    catalog: &LakehouseCatalog,
    category: FolderCategory,
    settings: &NotebookBindingSettings,
) -> Option<String> {
    let lines: Vec<&str> = content.split('\n').collect();
    let Some((start, end)) = metadata_block(&lines) else {
        warn!("No metadata block found in notebook content, skipping lakehouse binding");
        return None;
    };

    let json_text: String = lines[start..end]
        .iter()
        .map(|line| {
            line.trim_start()
                .trim_start_matches("# META")
                .trim_end_matches('\r')
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut metadata: Value = match serde_json::from_str(&json_text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Notebook metadata block is not valid JSON, skipping lakehouse binding");
            return None;
        }
    };

    let current = metadata
        .pointer("/dependencies/lakehouse/default_lakehouse_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let lakehouse_name = if (current.is_empty() || !catalog.contains_key(&current))
        && category != FolderCategory::Standard
    {
        settings.default_lakehouse.clone()
    } else {
        current
    };

    if lakehouse_name.is_empty() {
        debug!("Notebook has no default lakehouse");
        return None;
    }

    let Some(lakehouse) = catalog.get(&lakehouse_name) else {
        warn!(lakehouse = %lakehouse_name, "Lakehouse not found, skipping binding");
        return None;
    };

    let binding = serde_json::json!({
        "default_lakehouse": lakehouse.id,
        "default_lakehouse_name": lakehouse_name,
        "default_lakehouse_workspace_id": lakehouse.workspace_id,
        "known_lakehouses": [{ "id": lakehouse.id }]
    });

    let root = metadata.as_object_mut()?;
    let dependencies = root
        .entry("dependencies")
        .or_insert_with(|| Value::Object(Map::new()));
    if !dependencies.is_object() {
        *dependencies = Value::Object(Map::new());
    }
    dependencies
        .as_object_mut()?
        .insert("lakehouse".to_string(), binding);

    // CRLF sources keep their '\r' on every split line; the new block must match
    let cr = if content.contains("\r\n") { "\r" } else { "" };
    let rendered = serde_json::to_string_pretty(&metadata).ok()?;
    let block: Vec<String> = rendered
        .lines()
        .map(|line| format!("# META {}{}", line, cr))
        .collect();

    let mut output: Vec<String> = Vec::with_capacity(lines.len() + block.len());
    output.extend(lines[..start].iter().map(|l| l.to_string()));
    output.extend(block);
    output.extend(lines[end..].iter().map(|l| l.to_string()));

    info!(lakehouse = %lakehouse_name, live_id = %lakehouse.id, "Bound notebook to lakehouse");
    Some(output.join("\n"))
}
