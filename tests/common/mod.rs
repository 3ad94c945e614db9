//! Stub services and fixtures shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use controlmap::config::RunConfig;
use controlmap::embed::{EmbedError, EmbedResult, EmbeddingCache, EmbeddingService};
use controlmap::graph::{
    CommitReceipt, Control, ControlId, EdgeBatch, EdgeId, EdgeSnapshot, GraphStatistics,
    MappingEdge, Standard, StandardId, VerifierIdentity,
};
use controlmap::pipeline::{CancelSignal, MappingPipeline};
use controlmap::repository::{
    ControlRepository, GraphRepository, RepositoryError, RepositoryResult,
};
use controlmap::retry::RetryPolicy;
use controlmap::verify::{VerificationPrompt, VerificationService, VerifyError, VerifyResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MODEL_VERSION: &str = "stub-embed-v1";

/// Embeds known texts to fixed vectors and counts every call
pub struct StubEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    failing: Mutex<HashSet<String>>,
    cancels: Mutex<Option<(String, CancelSignal)>>,
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Arc<Self> {
        let vectors = [
            ("Account Management", vec![1.0, 0.0, 0.0]),
            ("Access Enforcement", vec![0.0, 1.0, 0.0]),
            ("Event Logging", vec![0.0, 0.2, 1.0]),
            ("Identities and credentials are managed", vec![0.9, 0.1, 0.0]),
            ("Access permissions are managed", vec![0.1, 1.0, 0.0]),
            ("The network is monitored", vec![0.0, 0.0, 1.0]),
        ]
        .into_iter()
        .map(|(text, vector)| (text.to_string(), vector))
        .collect();

        Arc::new(Self {
            vectors,
            failing: Mutex::new(HashSet::new()),
            cancels: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    /// Make requests for `text` fail as unavailable
    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    /// Trip `signal` when `text` is embedded
    pub fn cancel_on(&self, text: &str, signal: CancelSignal) {
        *self.cancels.lock().unwrap() = Some((text.to_string(), signal));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for StubEmbedder {
    async fn embed(&self, text: &str, _model_version: &str) -> EmbedResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((trigger, signal)) = self.cancels.lock().unwrap().as_ref() {
            if trigger == text {
                signal.cancel();
            }
        }
        if self.failing.lock().unwrap().contains(text) {
            return Err(EmbedError::Unavailable("connection refused".to_string()));
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.3, 0.3, 0.3]))
    }
}

/// Answers prompts from per-pair scripts; the last scripted reply repeats
pub struct StubVerifier {
    scripts: Mutex<HashMap<(String, String), VecDeque<VerifyResult<String>>>>,
    delays: Mutex<HashMap<String, u64>>,
    cancel_on_first_call: Mutex<Option<CancelSignal>>,
    down: Mutex<bool>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl StubVerifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            cancel_on_first_call: Mutex::new(None),
            down: Mutex::new(false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, source: &str, target: &str, replies: Vec<VerifyResult<String>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert((source.to_string(), target.to_string()), replies.into());
    }

    /// Always answer `reply` for the pair
    pub fn answer(&self, source: &str, target: &str, reply: String) {
        self.script(source, target, vec![Ok(reply)]);
    }

    /// Delay replies about `target`
    pub fn delay(&self, target: &str, millis: u64) {
        self.delays.lock().unwrap().insert(target.to_string(), millis);
    }

    pub fn cancel_on_first_call(&self, signal: CancelSignal) {
        *self.cancel_on_first_call.lock().unwrap() = Some(signal);
    }

    pub fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Targets in the order their calls completed
    pub fn completion_order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    fn next_reply(&self, pair: &(String, String)) -> VerifyResult<String> {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(pair) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Ok(reply("unrelated", 0.9)),
        }
    }
}

/// Control ids named in a verification prompt
pub fn pair_of(prompt: &VerificationPrompt) -> (String, String) {
    let id_after = |marker: &str| {
        prompt
            .user
            .lines()
            .find_map(|line| line.strip_prefix(marker))
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap_or_default()
            .to_string()
    };
    (id_after("SOURCE control "), id_after("TARGET control "))
}

#[async_trait]
impl VerificationService for StubVerifier {
    async fn complete(&self, prompt: &VerificationPrompt) -> VerifyResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            if let Some(signal) = self.cancel_on_first_call.lock().unwrap().as_ref() {
                signal.cancel();
            }
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let pair = pair_of(prompt);
        let delay = self.delays.lock().unwrap().get(&pair.1).copied().unwrap_or(1);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.order.lock().unwrap().push(pair.1.clone());

        if *self.down.lock().unwrap() {
            return Err(VerifyError::Unavailable("connection refused".to_string()));
        }
        self.next_reply(&pair)
    }

    fn identity(&self) -> VerifierIdentity {
        VerifierIdentity::new("stub-llm", "1.0")
    }
}

/// A well-formed verifier reply
pub fn reply(kind: &str, confidence: f64) -> String {
    format!(
        r#"{{"relation": "{}", "confidence": {}, "rationale": "{} at {}"}}"#,
        kind, confidence, kind, confidence
    )
}

/// Repository wrapper that rejects the first `conflicts` edge writes as stale
pub struct ConflictingRepository {
    inner: Arc<GraphRepository>,
    conflicts: AtomicUsize,
    writes: AtomicUsize,
}

impl ConflictingRepository {
    pub fn new(inner: Arc<GraphRepository>, conflicts: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            conflicts: AtomicUsize::new(conflicts),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlRepository for ConflictingRepository {
    async fn get_standard(&self, id: &StandardId) -> RepositoryResult<Standard> {
        self.inner.get_standard(id).await
    }

    async fn get_controls(&self, standard: &StandardId) -> RepositoryResult<Vec<Control>> {
        self.inner.get_controls(standard).await
    }

    async fn get_control(&self, id: &ControlId) -> RepositoryResult<Control> {
        self.inner.get_control(id).await
    }

    async fn get_edge(&self, id: EdgeId) -> RepositoryResult<MappingEdge> {
        self.inner.get_edge(id).await
    }

    async fn snapshot_edges(&self, control: &ControlId) -> RepositoryResult<EdgeSnapshot> {
        self.inner.snapshot_edges(control).await
    }

    async fn write_edges(&self, batch: EdgeBatch) -> RepositoryResult<CommitReceipt> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::WriteConflict {
                control: batch.source.clone(),
                expected: batch.base_revision,
                actual: batch.base_revision + 1,
            });
        }
        self.inner.write_edges(batch).await
    }

    async fn statistics(&self) -> RepositoryResult<GraphStatistics> {
        self.inner.statistics().await
    }
}

/// NIST source controls and CSF targets; each source has one close target
pub async fn seeded_repository() -> Arc<GraphRepository> {
    let repo = Arc::new(GraphRepository::new());
    seed(&repo).await;
    repo
}

pub async fn seed(repo: &GraphRepository) {
    repo.import_standard(
        Standard::new("NIST", "NIST SP 800-53", "rev5"),
        vec![
            Control::new("AC-2", "NIST", "Account Management").with_category("Access Control"),
            Control::new("AC-3", "NIST", "Access Enforcement").with_category("Access Control"),
            Control::new("AU-2", "NIST", "Event Logging").with_category("Audit"),
        ],
    )
    .await
    .unwrap();
    repo.import_standard(
        Standard::new("CSF", "NIST Cybersecurity Framework", "1.1"),
        vec![
            Control::new("PR.AC-1", "CSF", "Identities and credentials are managed"),
            Control::new("PR.AC-4", "CSF", "Access permissions are managed"),
            Control::new("DE.CM-1", "CSF", "The network is monitored"),
        ],
    )
    .await
    .unwrap();
}

/// Each NIST control answered with its natural CSF counterpart
pub fn script_defaults(verifier: &StubVerifier) {
    verifier.answer("AC-2", "PR.AC-1", reply("equivalent", 0.82));
    verifier.answer("AC-3", "PR.AC-4", reply("narrower", 0.74));
    verifier.answer("AU-2", "DE.CM-1", reply("related", 0.66));
}

pub fn run_config() -> RunConfig {
    RunConfig {
        embedding_model_version: MODEL_VERSION.to_string(),
        target_standards: vec![StandardId::new("CSF")],
        verification_retry: RetryPolicy::immediate(2),
        embedding_retry: RetryPolicy::immediate(1),
        ..Default::default()
    }
}

pub fn cache(embedder: Arc<StubEmbedder>) -> Arc<EmbeddingCache> {
    Arc::new(EmbeddingCache::new(embedder, 4).with_retry(RetryPolicy::immediate(1)))
}

pub fn pipeline(
    repo: Arc<dyn ControlRepository>,
    embedder: Arc<StubEmbedder>,
    verifier: Arc<StubVerifier>,
    config: RunConfig,
) -> MappingPipeline {
    MappingPipeline::new(repo, cache(embedder), verifier, config)
}

/// At most one active edge per (target, kind) and confidences within [0, 1]
pub async fn assert_edge_invariants(repo: &dyn ControlRepository, controls: &[&str]) {
    for control in controls {
        let edges = repo.get_edges(&ControlId::new(*control)).await.unwrap();
        let mut seen = HashSet::new();
        for edge in edges.iter().filter(|e| e.is_active()) {
            assert!(
                seen.insert((edge.target.clone(), edge.kind)),
                "duplicate active edge {} -> {} ({})",
                edge.source,
                edge.target,
                edge.kind
            );
        }
        for edge in &edges {
            assert!((0.0..=1.0).contains(&edge.confidence));
        }
    }
}
