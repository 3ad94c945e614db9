//! In-memory control graph
//!
//! Holds standards, their controls and the mapping edges between controls.
//! Edge writes are grouped per source control into an [`EdgeBatch`] that is
//! validated as a whole before anything changes, so a batch is either fully
//! applied or rejected.

use super::control::{Control, Standard};
use super::edge::{current_timestamp, EdgeDraft, MappingEdge, RelationKind, ReviewStatus};
use super::types::{ControlId, EdgeId, StandardId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Errors that can occur during graph operations
#[derive(Error, Debug, PartialEq)]
pub enum GraphError {
    #[error("Standard {0} not found")]
    StandardNotFound(StandardId),

    #[error("Control {0} not found")]
    ControlNotFound(ControlId),

    #[error("Control {0} already exists")]
    ControlAlreadyExists(ControlId),

    #[error("Edge {0} not found")]
    EdgeNotFound(EdgeId),

    #[error("Edge {edge} does not start at control {source_control}")]
    EdgeNotOwned { edge: EdgeId, source_control: ControlId },

    #[error("Edge {0} is already superseded")]
    EdgeAlreadySuperseded(EdgeId),

    #[error("Edge revision of {control} moved from {expected} to {actual}")]
    RevisionMismatch {
        control: ControlId,
        expected: u64,
        actual: u64,
    },

    #[error("More than one active {kind} edge from {source_control} to {target}")]
    DuplicateActiveEdge {
        source_control: ControlId,
        target: ControlId,
        kind: RelationKind,
    },

    #[error("Confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// All edge changes for one source control, applied atomically
#[derive(Debug, Clone, Default)]
pub struct EdgeBatch {
    pub source: ControlId,
    /// Edge revision of `source` the batch was planned against
    pub base_revision: u64,
    /// Active edges to mark superseded
    pub retire: Vec<EdgeId>,
    /// New edges to create
    pub create: Vec<EdgeDraft>,
    /// Review status changes on active edges
    pub review: Vec<(EdgeId, ReviewStatus)>,
}

impl EdgeBatch {
    pub fn new(source: ControlId, base_revision: u64) -> Self {
        EdgeBatch {
            source,
            base_revision,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.retire.is_empty() && self.create.is_empty() && self.review.is_empty()
    }
}

/// Edges of one source control together with their revision
#[derive(Debug, Clone)]
pub struct EdgeSnapshot {
    pub source: ControlId,
    pub revision: u64,
    /// All outgoing edges, active and superseded, in creation order
    pub edges: Vec<MappingEdge>,
}

impl EdgeSnapshot {
    pub fn active(&self) -> impl Iterator<Item = &MappingEdge> {
        self.edges.iter().filter(|e| e.is_active())
    }

    /// Active edges from the snapshot's source to `target`
    pub fn active_to<'a>(&'a self, target: &'a ControlId) -> impl Iterator<Item = &'a MappingEdge> {
        self.active().filter(move |e| &e.target == target)
    }
}

/// A validated batch: the final state of every edge it touches
#[derive(Debug, Clone)]
pub struct PreparedCommit {
    pub source: ControlId,
    pub revision: u64,
    /// Final state of every created, retired or reviewed edge
    pub edges: Vec<MappingEdge>,
    pub created: Vec<EdgeId>,
    pub retired: Vec<EdgeId>,
    pub reviewed: Vec<EdgeId>,
    next_edge_id: u64,
}

/// Outcome of an applied batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    pub revision: u64,
    pub created: Vec<EdgeId>,
    pub retired: Vec<EdgeId>,
    pub reviewed: Vec<EdgeId>,
}

/// Counts over the whole graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub standards: usize,
    pub controls: usize,
    pub active_edges: usize,
    pub superseded_edges: usize,
}

/// In-memory control graph
///
/// - standards: StandardId -> Standard
/// - controls: ControlId -> Control
/// - standard_index: StandardId -> ordered ControlIds
/// - edges: arena, EdgeId n lives at index n - 1
/// - outgoing / incoming: ControlId -> Vec<EdgeId> (adjacency lists)
/// - revisions: ControlId -> number of committed batches for that source
#[derive(Debug, Default)]
pub struct GraphStore {
    standards: BTreeMap<StandardId, Standard>,

    controls: HashMap<ControlId, Control>,

    standard_index: HashMap<StandardId, BTreeSet<ControlId>>,

    edges: Vec<MappingEdge>,

    outgoing: HashMap<ControlId, Vec<EdgeId>>,

    incoming: HashMap<ControlId, Vec<EdgeId>>,

    revisions: HashMap<ControlId, u64>,

    next_edge_id: u64,
}

impl GraphStore {
    /// Create a new empty graph store
    pub fn new() -> Self {
        GraphStore {
            edges: Vec::with_capacity(4096),
            next_edge_id: 1,
            ..Default::default()
        }
    }

    /// Register a standard; re-registering replaces name and version
    pub fn insert_standard(&mut self, standard: Standard) {
        self.standard_index.entry(standard.id.clone()).or_default();
        self.standards.insert(standard.id.clone(), standard);
    }

    /// Add a control to an already registered standard
    pub fn insert_control(&mut self, control: Control) -> GraphResult<()> {
        if !self.standards.contains_key(&control.standard) {
            return Err(GraphError::StandardNotFound(control.standard.clone()));
        }
        if self.controls.contains_key(&control.id) {
            return Err(GraphError::ControlAlreadyExists(control.id.clone()));
        }

        self.standard_index
            .entry(control.standard.clone())
            .or_default()
            .insert(control.id.clone());
        self.controls.insert(control.id.clone(), control);
        Ok(())
    }

    pub fn get_standard(&self, id: &StandardId) -> Option<&Standard> {
        self.standards.get(id)
    }

    pub fn standards(&self) -> Vec<&Standard> {
        self.standards.values().collect()
    }

    pub fn get_control(&self, id: &ControlId) -> Option<&Control> {
        self.controls.get(id)
    }

    pub fn has_control(&self, id: &ControlId) -> bool {
        self.controls.contains_key(id)
    }

    /// Controls of a standard, ordered by control id
    pub fn controls_in_standard(&self, standard: &StandardId) -> GraphResult<Vec<&Control>> {
        let ids = self
            .standard_index
            .get(standard)
            .ok_or_else(|| GraphError::StandardNotFound(standard.clone()))?;
        Ok(ids.iter().filter_map(|id| self.controls.get(id)).collect())
    }

    pub fn get_edge(&self, id: EdgeId) -> Option<&MappingEdge> {
        let idx = id.as_u64().checked_sub(1)? as usize;
        self.edges.get(idx)
    }

    fn get_edge_mut(&mut self, id: EdgeId) -> Option<&mut MappingEdge> {
        let idx = id.as_u64().checked_sub(1)? as usize;
        self.edges.get_mut(idx)
    }

    /// All edges leaving a control, including superseded ones
    pub fn get_outgoing_edges(&self, control: &ControlId) -> Vec<&MappingEdge> {
        self.outgoing
            .get(control)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    /// All edges pointing at a control, including superseded ones
    pub fn get_incoming_edges(&self, control: &ControlId) -> Vec<&MappingEdge> {
        self.incoming
            .get(control)
            .map(|ids| ids.iter().filter_map(|&id| self.get_edge(id)).collect())
            .unwrap_or_default()
    }

    /// Number of committed batches for a source control
    pub fn revision(&self, control: &ControlId) -> u64 {
        self.revisions.get(control).copied().unwrap_or(0)
    }

    pub fn snapshot(&self, control: &ControlId) -> GraphResult<EdgeSnapshot> {
        if !self.has_control(control) {
            return Err(GraphError::ControlNotFound(control.clone()));
        }
        Ok(EdgeSnapshot {
            source: control.clone(),
            revision: self.revision(control),
            edges: self.get_outgoing_edges(control).into_iter().cloned().collect(),
        })
    }

    /// Validate a batch and compute the resulting edge states without applying them
    pub fn prepare(&self, batch: EdgeBatch) -> GraphResult<PreparedCommit> {
        let source = batch.source;
        if !self.has_control(&source) {
            return Err(GraphError::ControlNotFound(source));
        }

        let actual = self.revision(&source);
        if actual != batch.base_revision {
            return Err(GraphError::RevisionMismatch {
                control: source,
                expected: batch.base_revision,
                actual,
            });
        }

        let now = current_timestamp();
        let mut touched: Vec<MappingEdge> = Vec::new();
        let mut retired_ids = HashSet::new();

        for id in &batch.retire {
            let edge = self.owned_active_edge(*id, &source)?;
            if !retired_ids.insert(*id) {
                return Err(GraphError::EdgeAlreadySuperseded(*id));
            }
            let mut edge = edge.clone();
            edge.mark_superseded(now);
            touched.push(edge);
        }

        let mut reviewed = Vec::new();
        for (id, status) in &batch.review {
            if retired_ids.contains(id) {
                return Err(GraphError::EdgeAlreadySuperseded(*id));
            }
            let mut edge = self.owned_active_edge(*id, &source)?.clone();
            edge.status = *status;
            touched.push(edge);
            reviewed.push(*id);
        }

        // Active (target, kind) pairs that survive the retirements
        let mut active: HashSet<(ControlId, RelationKind)> = self
            .get_outgoing_edges(&source)
            .into_iter()
            .filter(|e| e.is_active() && !retired_ids.contains(&e.id))
            .map(|e| (e.target.clone(), e.kind))
            .collect();

        let mut next_edge_id = self.next_edge_id;
        let mut created = Vec::new();
        for draft in batch.create {
            if draft.source != source {
                return Err(GraphError::ControlNotFound(draft.source));
            }
            if !self.has_control(&draft.target) {
                return Err(GraphError::ControlNotFound(draft.target));
            }
            if !draft.confidence.is_finite() || !(0.0..=1.0).contains(&draft.confidence) {
                return Err(GraphError::InvalidConfidence(draft.confidence));
            }
            if !active.insert((draft.target.clone(), draft.kind)) {
                return Err(GraphError::DuplicateActiveEdge {
                    source_control: source,
                    target: draft.target,
                    kind: draft.kind,
                });
            }

            let id = EdgeId::new(next_edge_id);
            next_edge_id += 1;
            touched.push(draft.into_edge(id, now));
            created.push(id);
        }

        let revision = if touched.is_empty() { actual } else { actual + 1 };

        Ok(PreparedCommit {
            source,
            revision,
            edges: touched,
            created,
            retired: batch.retire,
            reviewed,
            next_edge_id,
        })
    }

    /// Install a prepared commit
    ///
    /// The commit must come from [`GraphStore::prepare`] on this store with no
    /// other write in between.
    pub fn apply(&mut self, prepared: PreparedCommit) -> CommitReceipt {
        for edge in prepared.edges {
            if let Some(existing) = self.get_edge_mut(edge.id) {
                *existing = edge;
            } else {
                self.install_edge(edge);
            }
        }
        self.next_edge_id = self.next_edge_id.max(prepared.next_edge_id);
        self.revisions.insert(prepared.source, prepared.revision);

        CommitReceipt {
            revision: prepared.revision,
            created: prepared.created,
            retired: prepared.retired,
            reviewed: prepared.reviewed,
        }
    }

    /// Validate and apply a batch in one step
    pub fn commit(&mut self, batch: EdgeBatch) -> GraphResult<CommitReceipt> {
        let prepared = self.prepare(batch)?;
        Ok(self.apply(prepared))
    }

    /// Insert an edge loaded from storage during recovery
    pub fn insert_recovered_edge(&mut self, edge: MappingEdge) -> GraphResult<()> {
        if !self.has_control(&edge.source) {
            return Err(GraphError::ControlNotFound(edge.source));
        }
        if !self.has_control(&edge.target) {
            return Err(GraphError::ControlNotFound(edge.target));
        }
        if edge.is_active()
            && self
                .get_outgoing_edges(&edge.source)
                .iter()
                .any(|e| e.is_active() && e.target == edge.target && e.kind == edge.kind)
        {
            return Err(GraphError::DuplicateActiveEdge {
                source_control: edge.source,
                target: edge.target,
                kind: edge.kind,
            });
        }

        self.next_edge_id = self.next_edge_id.max(edge.id.as_u64() + 1);
        self.install_edge(edge);
        Ok(())
    }

    /// Restore the revision counter of a source control during recovery
    pub fn set_recovered_revision(&mut self, control: ControlId, revision: u64) {
        self.revisions.insert(control, revision);
    }

    pub fn statistics(&self) -> GraphStatistics {
        let active_edges = self.edges.iter().filter(|e| e.is_active()).count();
        GraphStatistics {
            standards: self.standards.len(),
            controls: self.controls.len(),
            active_edges,
            superseded_edges: self.edges.len() - active_edges,
        }
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn owned_active_edge(&self, id: EdgeId, source: &ControlId) -> GraphResult<&MappingEdge> {
        let edge = self.get_edge(id).ok_or(GraphError::EdgeNotFound(id))?;
        if &edge.source != source {
            return Err(GraphError::EdgeNotOwned {
                edge: id,
                source_control: source.clone(),
            });
        }
        if !edge.is_active() {
            return Err(GraphError::EdgeAlreadySuperseded(id));
        }
        Ok(edge)
    }

    fn install_edge(&mut self, edge: MappingEdge) {
        let idx = (edge.id.as_u64() - 1) as usize;
        self.outgoing.entry(edge.source.clone()).or_default().push(edge.id);
        self.incoming.entry(edge.target.clone()).or_default().push(edge.id);

        if idx >= self.edges.len() {
            // Recovery may deliver ids out of order; placeholders are overwritten below
            while self.edges.len() < idx {
                let filler = self.edges.len() as u64 + 1;
                self.edges.push(placeholder_edge(EdgeId::new(filler)));
            }
            self.edges.push(edge);
        } else {
            self.edges[idx] = edge;
        }
    }
}

// Superseded filler for arena slots whose edge has not been recovered yet.
fn placeholder_edge(id: EdgeId) -> MappingEdge {
    use super::edge::{MappingMethod, VerifierIdentity};
    MappingEdge {
        id,
        source: ControlId::new(""),
        target: ControlId::new(""),
        kind: RelationKind::Unrelated,
        confidence: 0.0,
        rationale: String::new(),
        previous_rationale: None,
        verifier: VerifierIdentity::new("", ""),
        method: MappingMethod::Llm,
        status: ReviewStatus::Unreviewed,
        low_trust: false,
        similarity: None,
        similarity_category: None,
        created_at: 0,
        superseded: true,
        superseded_at: None,
    }
}
