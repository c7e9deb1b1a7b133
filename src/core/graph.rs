//! Dependency graph and deterministic topological ordering.
//!
//! Edges point from a referenced artifact to the artifact that references
//! it: the referenced one must be created first and deleted last.
//!
//! Ordering uses Kahn's algorithm with a FIFO queue. Nodes enter the queue
//! in insertion order, so identical input always yields identical output.

use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use super::error::{DeployError, DeployResult};
use super::resolver::{LookupSource, Resolve};
use super::scanner::scan_references;
use crate::domain::LocalArtifact;

/// What the order is going to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    /// Referenced artifacts first
    ForCreation,

    /// Dependents first, restricted to the batch
    ForDeletion,
}

/// "Must come before" graph over artifact display names
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// referenced -> artifacts that reference it
    edges: IndexMap<String, Vec<String>>,

    in_degree: IndexMap<String, usize>,

    /// The artifacts being sorted (the deletion candidates in deletion mode)
    batch: IndexSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, referenced names)` pairs
    ///
    /// In creation mode references to names outside the batch are ignored.
    /// In deletion mode they become zero in-degree nodes so chains leaving
    /// the batch still constrain the order; they are filtered out when sorting.
    pub fn from_references<I, S>(entries: I, mode: SortMode) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let entries: Vec<(String, Vec<String>)> = entries
            .into_iter()
            .map(|(name, refs)| (name.into(), refs))
            .collect();

        let mut graph = Self::new();
        for (name, _) in &entries {
            graph.batch.insert(name.clone());
        }

        let mut outside = IndexSet::new();
        for (name, references) in &entries {
            graph.in_degree.entry(name.clone()).or_insert(0);

            for referenced in references {
                if !graph.batch.contains(referenced) {
                    match mode {
                        SortMode::ForCreation => {
                            debug!(artifact = %name, reference = %referenced, "Reference outside batch, no ordering constraint");
                            continue;
                        }
                        SortMode::ForDeletion => {
                            outside.insert(referenced.clone());
                        }
                    }
                }
                graph.add_edge(referenced, name);
            }
        }

        for name in outside {
            graph.in_degree.entry(name).or_insert(0);
        }

        graph
    }

    /// Build by scanning each artifact's definition for references
    pub fn build<R: Resolve + ?Sized>(
        artifacts: &[LocalArtifact],
        resolver: &R,
        source: LookupSource,
        mode: SortMode,
    ) -> DeployResult<Self> {
        let mut entries = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let references = match &artifact.definition {
                Some(document) => {
                    scan_references(document, artifact.artifact_type, resolver, source)?
                }
                None => Vec::new(),
            };
            entries.push((artifact.display_name.clone(), references));
        }

        Ok(Self::from_references(entries, mode))
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        *self.in_degree.entry(to.to_string()).or_insert(0) += 1;
    }

    pub fn node_count(&self) -> usize {
        self.in_degree.len()
    }

    /// Artifacts that must come after `name`
    pub fn dependents(&self, name: &str) -> &[String] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topologically sort the graph
    ///
    /// # Errors
    ///
    /// Returns `CycleDetected` (with no partial order) if any node could not
    /// be emitted.
    pub fn sort(&self, mode: SortMode) -> DeployResult<Vec<String>> {
        let mut in_degree = self.in_degree.clone();

        let mut queue: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(name, _)| name.clone())
            .collect();

        let mut sorted = Vec::with_capacity(in_degree.len());

        while let Some(name) = queue.pop_front() {
            for neighbor in self.dependents(&name) {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(neighbor.clone());
                    }
                }
            }
            sorted.push(name);
        }

        if sorted.len() != in_degree.len() {
            let nodes = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(name, _)| name.clone())
                .collect();
            return Err(DeployError::CycleDetected { nodes });
        }

        if mode == SortMode::ForDeletion {
            sorted.retain(|name| self.batch.contains(name));
            sorted.reverse();
        }

        Ok(sorted)
    }
}

/// Scan, build and sort in one step
pub fn sort_artifacts<R: Resolve + ?Sized>(
    artifacts: &[LocalArtifact],
    resolver: &R,
    source: LookupSource,
    mode: SortMode,
) -> DeployResult<Vec<String>> {
    DependencyGraph::build(artifacts, resolver, source, mode)?.sort(mode)
}
