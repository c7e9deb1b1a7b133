//! Reference scanner for pipeline definitions.
//!
//! Walks a definition document and collects the pipelines it invokes.
//! Two activity shapes are recognised:
//!
//! ```json
//! { "type": "ExecutePipeline", "typeProperties": { "pipeline": { "referenceName": "<id>" } } }
//! { "type": "InvokePipeline",  "typeProperties": { "pipelineId": "<id>" } }
//! ```
//!
//! Raw ids are turned into display names through a [`Resolve`]; ids that do
//! not resolve are dropped (they impose no ordering).

use indexmap::IndexSet;
use serde_json::Value;

use super::error::{DeployError, DeployResult};
use super::resolver::{LookupSource, Resolve};
use crate::domain::ArtifactType;

/// Activity shapes that reference another pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityShape {
    ExecutePipeline,
    InvokePipeline,
}

impl ActivityShape {
    fn from_kind(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "executepipeline" => Some(Self::ExecutePipeline),
            "invokepipeline" => Some(Self::InvokePipeline),
            _ => None,
        }
    }

    /// JSON pointer to the referenced id inside the activity
    fn id_pointer(&self) -> &'static str {
        match self {
            Self::ExecutePipeline => "/typeProperties/pipeline/referenceName",
            Self::InvokePipeline => "/typeProperties/pipelineId",
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ExecutePipeline => "ExecutePipeline",
            Self::InvokePipeline => "InvokePipeline",
        }
    }
}

/// Collect the raw ids referenced anywhere in `document`, in first-seen order
pub fn referenced_ids(document: &Value) -> DeployResult<Vec<String>> {
    let mut ids = IndexSet::new();
    visit(document, &mut ids)?;
    Ok(ids.into_iter().collect())
}

fn visit(node: &Value, ids: &mut IndexSet<String>) -> DeployResult<()> {
    match node {
        Value::Object(map) => {
            let shape = map
                .iter()
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("type"))
                .and_then(|(_, kind)| kind.as_str())
                .and_then(ActivityShape::from_kind);

            if let Some(shape) = shape {
                let id = node
                    .pointer(shape.id_pointer())
                    .and_then(Value::as_str)
                    .ok_or_else(|| DeployError::MalformedReference {
                        shape: shape.name().to_string(),
                        field: shape.id_pointer().trim_start_matches('/').replace('/', "."),
                    })?;
                ids.insert(id.to_string());
            }

            for child in map.values() {
                visit(child, ids)?;
            }
        }
        Value::Array(items) => {
            for child in items {
                visit(child, ids)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Display names of the artifacts referenced by `document`
pub fn scan_references<R: Resolve + ?Sized>(
    document: &Value,
    artifact_type: ArtifactType,
    resolver: &R,
    source: LookupSource,
) -> DeployResult<Vec<String>> {
    let mut names = IndexSet::new();

    for id in referenced_ids(document)? {
        if let Some(name) = resolver.resolve(artifact_type, &id, source)? {
            names.insert(name);
        }
    }

    Ok(names.into_iter().collect())
}
