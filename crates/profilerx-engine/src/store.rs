//! The profile store: active workflows, closed history, rolling averages.
//!
//! [`ProfileStore`] is explicitly constructed and injected; there is no
//! process-wide instance. All state sits behind one `parking_lot::Mutex` and
//! every public operation is a single short critical section. Memory is
//! sampled inside that section.
//!
//! # Persistence
//!
//! Saving the current history is split in two: the history is serialized
//! under the state lock and stamped with a generation number, then written
//! after the lock is released through a separate writer lock. A payload
//! whose generation is not newer than the last one written is dropped, so a
//! stale snapshot can never overwrite a newer one. Archive operations keep
//! the state lock held across their I/O (lock order is always state, then
//! writer).
//!
//! # History bound
//!
//! Appending to a history that already holds `max_history` profiles first
//! archives the full history (one archive) and clears it, then appends. If
//! that archive cannot be written the oldest profiles are dropped instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use profilerx_core::{
    AverageTable, Clock, MemorySample, MemorySampler, MethodCallRecord, NodeIo, NodeProfile,
    RollingAverage, WorkflowProfile, WorkflowStatus,
};
use profilerx_storage::{Payload, ProfileStorage, StorageError};

use crate::config::ProfilerConfig;

/// Label of the single workflow-level rolling average.
pub const WORKFLOW_LABEL: &str = "workflow";

const SUPERSEDED_REASON: &str = "superseded by a new start_workflow";

/// Everything `get_stats` reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Active workflows, oldest start first.
    pub current: IndexMap<String, WorkflowProfile>,
    /// The most recently closed workflow.
    pub latest: Option<WorkflowProfile>,
    pub node_averages: BTreeMap<String, RollingAverage>,
    pub workflow_averages: RollingAverage,
    /// The last `stats_window` closed workflows, oldest first.
    pub history: Vec<WorkflowProfile>,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    /// Insertion-ordered, so the last entry is the most recent start.
    pub(crate) active: IndexMap<String, WorkflowProfile>,
    pub(crate) history: Vec<WorkflowProfile>,
    pub(crate) node_averages: AverageTable,
    pub(crate) workflow_averages: AverageTable,
    generation: u64,
}

/// A serialized history snapshot waiting to be written.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    generation: u64,
    payload: Payload,
}

pub struct ProfileStore {
    max_history: usize,
    stats_window: usize,
    storage: Arc<dyn ProfileStorage>,
    sampler: Arc<dyn MemorySampler>,
    clock: Arc<dyn Clock>,
    pub(crate) state: Mutex<StoreState>,
    /// Generation of the last history snapshot handed to storage.
    writer: Mutex<u64>,
}

impl ProfileStore {
    /// Builds a store and loads the current history from `storage`.
    ///
    /// A history that cannot be read is logged and replaced by an empty one.
    /// Only the newest `max_history` profiles are kept, and both average
    /// tables are re-seeded from what was loaded.
    pub fn open(
        config: &ProfilerConfig,
        storage: Arc<dyn ProfileStorage>,
        sampler: Arc<dyn MemorySampler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let max_history = config.max_history.max(1);
        let mut history = match storage.load_history() {
            Ok(history) => history,
            Err(e) => {
                tracing::error!(error = %e, "failed to load profiling history, starting empty");
                Vec::new()
            }
        };
        if history.len() > max_history {
            let excess = history.len() - max_history;
            tracing::warn!(excess, max_history, "loaded history exceeds bound, dropping oldest");
            history.drain(..excess);
        }

        let mut state = StoreState {
            history,
            ..StoreState::default()
        };
        reseed_averages(&mut state);
        tracing::debug!(
            profiles = state.history.len(),
            node_types = state.node_averages.label_count(),
            "profile store opened"
        );

        ProfileStore {
            max_history,
            stats_window: config.stats_window.max(1),
            storage,
            sampler,
            clock,
            state: Mutex::new(state),
            writer: Mutex::new(0),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ProfileStorage> {
        &self.storage
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    // -------------------------------------------------------------------
    // Workflow lifecycle
    // -------------------------------------------------------------------

    /// Opens an active profile for `prompt_id`.
    ///
    /// An already-active profile with the same id is closed as aborted and
    /// moved to history before the new one is opened.
    pub fn start_workflow(&self, prompt_id: &str) {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let pending = match state.active.shift_remove(prompt_id) {
            Some(stale) => {
                tracing::warn!(prompt_id, "workflow already active, superseding it");
                let closed = self.close_aborted(stale, SUPERSEDED_REASON, now);
                self.append_history(&mut state, closed)
            }
            None => None,
        };
        state
            .active
            .insert(prompt_id.to_string(), WorkflowProfile::new(prompt_id, now));
        drop(state);

        tracing::debug!(prompt_id, "workflow started");
        self.flush(pending);
    }

    /// Closes an active profile and moves it to history.
    ///
    /// Returns the closed profile, or `None` if `prompt_id` is not active.
    pub fn end_workflow(&self, prompt_id: &str) -> Option<WorkflowProfile> {
        let now = self.clock.now_ms();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(mut profile) = state.active.shift_remove(prompt_id) else {
            tracing::warn!(prompt_id, "end_workflow for unknown workflow");
            return None;
        };

        profile.end_time = Some(now);
        profile.total_vram_peak = self.device_peak();
        profile.total_ram_peak = self.sample().host_bytes;
        let duration = profile.duration().unwrap_or(0.0);
        profile.averages = Some(state.workflow_averages.update(
            WORKFLOW_LABEL,
            duration,
            &[
                ("vram_peak", profile.total_vram_peak as f64),
                ("ram_peak", profile.total_ram_peak as f64),
            ],
        ));
        profile.status = WorkflowStatus::Completed;

        let pending = self.append_history(state, profile.clone());
        drop(guard);

        tracing::debug!(
            prompt_id,
            duration_ms = duration,
            nodes = profile.nodes.len(),
            "workflow completed"
        );
        self.flush(pending);
        Some(profile)
    }

    /// Force-closes an active profile as aborted.
    ///
    /// The workflow rolling average is left untouched.
    pub fn abort_workflow(&self, prompt_id: &str, reason: &str) -> Option<WorkflowProfile> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let Some(profile) = state.active.shift_remove(prompt_id) else {
            tracing::warn!(prompt_id, "abort_workflow for unknown workflow");
            return None;
        };
        let closed = self.close_aborted(profile, reason, now);
        let pending = self.append_history(&mut state, closed.clone());
        drop(state);

        self.flush(pending);
        Some(closed)
    }

    /// Aborts every active workflow started more than `older_than` ago and
    /// returns their ids.
    pub fn abort_stale_workflows(&self, older_than: Duration) -> Vec<String> {
        let now = self.clock.now_ms();
        let cutoff = now - older_than.as_secs_f64() * 1_000.0;
        let reason = format!("no end_workflow within {:?}", older_than);

        let mut state = self.state.lock();
        let stale: Vec<String> = state
            .active
            .values()
            .filter(|p| p.start_time < cutoff)
            .map(|p| p.prompt_id.clone())
            .collect();

        let mut pending = None;
        for prompt_id in &stale {
            if let Some(profile) = state.active.shift_remove(prompt_id) {
                let closed = self.close_aborted(profile, &reason, now);
                pending = self.append_history(&mut state, closed).or(pending);
            }
        }
        drop(state);

        self.flush(pending);
        stale
    }

    // -------------------------------------------------------------------
    // Node lifecycle
    // -------------------------------------------------------------------

    /// Opens a node profile within an active workflow.
    ///
    /// Starting a node id that already has a profile restarts it.
    pub fn start_node(&self, prompt_id: &str, node_id: &str, node_type: &str, inputs: &NodeIo) {
        let input_sizes = inputs.shapes();
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        let Some(profile) = state.active.get_mut(prompt_id) else {
            tracing::warn!(prompt_id, node_id, "start_node for unknown workflow");
            return;
        };

        self.sampler.reset_device_peak();
        let sample = self.sample();
        let node = NodeProfile::new(
            node_id,
            node_type,
            now,
            sample.device_bytes,
            sample.host_bytes,
            input_sizes,
        );
        if profile.nodes.insert(node_id.to_string(), node).is_some() {
            tracing::debug!(prompt_id, node_id, "node restarted");
        }
        profile.execution_order.push(node_id.to_string());
    }

    /// Finalizes a started node.
    pub fn end_node(&self, prompt_id: &str, node_id: &str, outputs: &NodeIo, cache_hit: bool) {
        let output_sizes = outputs.shapes();
        let now = self.clock.now_ms();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(profile) = state.active.get_mut(prompt_id) else {
            tracing::warn!(prompt_id, node_id, "end_node for unknown workflow");
            return;
        };
        let Some(node) = profile.nodes.get_mut(node_id) else {
            tracing::warn!(prompt_id, node_id, "end_node for node that was never started");
            return;
        };
        if node.is_finalized() {
            tracing::warn!(prompt_id, node_id, "end_node for node that already ended");
            return;
        }

        let sample = self.sample();
        let peak = self.device_peak();
        node.end_time = Some(now);
        node.vram_after = Some(sample.device_bytes);
        node.ram_after = Some(sample.host_bytes);
        node.vram_peak = Some(peak.saturating_sub(node.vram_before));
        node.output_sizes = output_sizes;
        node.cache_hit = cache_hit;

        let duration = node.duration().unwrap_or(0.0);
        let extras = [
            ("vram_usage", node.vram_delta().unwrap_or(0.0)),
            ("ram_usage", node.ram_delta().unwrap_or(0.0)),
        ];
        node.averages = Some(state.node_averages.update(&node.node_type, duration, &extras));

        if cache_hit {
            profile.cache_hits += 1;
        } else {
            profile.cache_misses += 1;
        }
    }

    /// Attaches an error message to a node. The node stays open.
    pub fn record_error(&self, prompt_id: &str, node_id: &str, message: &str) {
        let mut state = self.state.lock();
        let Some(node) = state
            .active
            .get_mut(prompt_id)
            .and_then(|p| p.nodes.get_mut(node_id))
        else {
            tracing::warn!(prompt_id, node_id, "record_error for unknown workflow or node");
            return;
        };
        node.error = Some(message.to_string());
        tracing::error!(prompt_id, node_id, node_type = %node.node_type, message, "node failed");
    }

    /// Appends a traced method call to an active workflow.
    pub fn attach_method_call(&self, prompt_id: &str, record: MethodCallRecord) {
        let mut state = self.state.lock();
        match state.active.get_mut(prompt_id) {
            Some(profile) => profile.method_calls.push(record),
            None => tracing::debug!(prompt_id, "method call for inactive workflow dropped"),
        }
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// The most recently started workflow that is still active.
    pub fn current_workflow(&self) -> Option<String> {
        self.state.lock().active.keys().last().cloned()
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        let state = self.state.lock();
        let window_start = state.history.len().saturating_sub(self.stats_window);
        StatsSnapshot {
            current: state.active.clone(),
            latest: state.history.last().cloned(),
            node_averages: state.node_averages.to_map(),
            workflow_averages: state
                .workflow_averages
                .get(WORKFLOW_LABEL)
                .cloned()
                .unwrap_or_else(RollingAverage::zero),
            history: state.history[window_start..].to_vec(),
        }
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// A copy of the full current history, oldest first.
    pub fn history(&self) -> Vec<WorkflowProfile> {
        self.state.lock().history.clone()
    }

    pub fn active_len(&self) -> usize {
        self.state.lock().active.len()
    }

    pub fn node_average(&self, node_type: &str) -> Option<RollingAverage> {
        self.state.lock().node_averages.get(node_type).cloned()
    }

    pub fn workflow_average(&self) -> Option<RollingAverage> {
        self.state.lock().workflow_averages.get(WORKFLOW_LABEL).cloned()
    }

    /// Forgets all in-memory state. Storage is not touched.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let generation = state.generation;
        *state = StoreState {
            generation,
            ..StoreState::default()
        };
        tracing::debug!("profile store reset");
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn sample(&self) -> MemorySample {
        self.sampler.sample().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "memory sample unavailable, recording zero");
            MemorySample::default()
        })
    }

    fn device_peak(&self) -> u64 {
        self.sampler.device_peak().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "device peak unavailable, recording zero");
            0
        })
    }

    fn close_aborted(&self, mut profile: WorkflowProfile, reason: &str, now: f64) -> WorkflowProfile {
        profile.end_time = Some(now);
        profile.total_vram_peak = self.device_peak();
        profile.total_ram_peak = self.sample().host_bytes;
        profile.status = WorkflowStatus::Aborted;
        profile.abort_reason = Some(reason.to_string());
        tracing::warn!(prompt_id = %profile.prompt_id, reason, "workflow aborted");
        profile
    }

    /// Appends a closed profile, archiving first when the history is full.
    fn append_history(
        &self,
        state: &mut StoreState,
        profile: WorkflowProfile,
    ) -> Option<PendingWrite> {
        if state.history.len() >= self.max_history {
            match self.archive_locked(state) {
                Ok(Some(name)) => {
                    tracing::info!(archive = %name, max_history = self.max_history, "history full, archived")
                }
                Ok(None) => {}
                Err(e) => {
                    let excess = state.history.len() + 1 - self.max_history;
                    tracing::error!(error = %e, dropped = excess, "auto-archive failed, dropping oldest profiles");
                    state.history.drain(..excess);
                }
            }
        }
        state.history.push(profile);
        self.snapshot(state)
    }

    /// Writes the full history to a new archive and clears it.
    ///
    /// Must be called with the state lock held. On failure nothing changes.
    pub(crate) fn archive_locked(
        &self,
        state: &mut StoreState,
    ) -> Result<Option<String>, StorageError> {
        if state.history.is_empty() {
            return Ok(None);
        }
        let payload = Payload::encode(&state.history)?;
        let name = self.storage.create_archive(&payload)?;
        let archived = state.history.len();
        state.history.clear();
        if let Err(e) = self.write_locked(state) {
            tracing::error!(error = %e, "failed to persist emptied history");
        }
        tracing::debug!(archive = %name, profiles = archived, "history archived");
        Ok(Some(name))
    }

    /// Serializes the current history under the state lock.
    pub(crate) fn snapshot(&self, state: &mut StoreState) -> Option<PendingWrite> {
        state.generation += 1;
        match Payload::encode(&state.history) {
            Ok(payload) => Some(PendingWrite {
                generation: state.generation,
                payload,
            }),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize profiling history");
                None
            }
        }
    }

    /// Snapshots and writes immediately. Used while the state lock is held.
    pub(crate) fn write_locked(&self, state: &mut StoreState) -> Result<(), StorageError> {
        let payload = Payload::encode(&state.history)?;
        state.generation += 1;
        self.write(PendingWrite {
            generation: state.generation,
            payload,
        })
    }

    fn write(&self, pending: PendingWrite) -> Result<(), StorageError> {
        let mut last = self.writer.lock();
        if pending.generation <= *last {
            tracing::debug!(generation = pending.generation, "skipping stale history snapshot");
            return Ok(());
        }
        *last = pending.generation;
        self.storage.write_history(&pending.payload)
    }

    /// Writes a snapshot taken earlier, logging any failure.
    fn flush(&self, pending: Option<PendingWrite>) {
        let Some(pending) = pending else {
            return;
        };
        if let Err(e) = self.write(pending) {
            tracing::error!(error = %e, "failed to persist profiling history");
        }
    }
}

/// Rebuilds both average tables from closed history.
fn reseed_averages(state: &mut StoreState) {
    for profile in &state.history {
        for node in profile.nodes.values() {
            if let Some(duration) = node.duration() {
                state.node_averages.update(
                    &node.node_type,
                    duration,
                    &[
                        ("vram_usage", node.vram_delta().unwrap_or(0.0)),
                        ("ram_usage", node.ram_delta().unwrap_or(0.0)),
                    ],
                );
            }
        }
        if profile.status == WorkflowStatus::Completed {
            if let Some(duration) = profile.duration() {
                state.workflow_averages.update(
                    WORKFLOW_LABEL,
                    duration,
                    &[
                        ("vram_peak", profile.total_vram_peak as f64),
                        ("ram_peak", profile.total_ram_peak as f64),
                    ],
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use profilerx_core::{FixedSampler, ManualClock, NodeValue};
    use profilerx_storage::InMemoryStore;

    pub(crate) struct Harness {
        pub store: Arc<ProfileStore>,
        pub storage: Arc<InMemoryStore>,
        pub sampler: Arc<FixedSampler>,
        pub clock: Arc<ManualClock>,
    }

    pub(crate) fn harness(max_history: usize) -> Harness {
        harness_with(Arc::new(InMemoryStore::new()), max_history)
    }

    pub(crate) fn harness_with(storage: Arc<InMemoryStore>, max_history: usize) -> Harness {
        let sampler = Arc::new(FixedSampler::new(1_000, 10_000));
        let clock = Arc::new(ManualClock::new(1_700_000_000_000.0));
        let config = ProfilerConfig::default().with_max_history(max_history);
        let store = Arc::new(ProfileStore::open(
            &config,
            storage.clone(),
            sampler.clone(),
            clock.clone(),
        ));
        Harness {
            store,
            storage,
            sampler,
            clock,
        }
    }

    fn tensor_outputs() -> NodeIo {
        NodeIo::from(vec![NodeValue::tensor(&[1, 3, 512, 512])])
    }

    /// Runs one workflow whose single node takes `node_ms`.
    pub(crate) fn run_simple(h: &Harness, prompt_id: &str, node_ms: f64) -> WorkflowProfile {
        h.store.start_workflow(prompt_id);
        h.store.start_node(prompt_id, "n1", "TypeA", &NodeIo::Empty);
        h.clock.advance(node_ms);
        h.store.end_node(prompt_id, "n1", &tensor_outputs(), false);
        h.store.end_workflow(prompt_id).unwrap()
    }

    #[test]
    fn single_node_workflow_is_recorded() {
        let h = harness(100);
        run_simple(&h, "p1", 5.0);

        let history = h.store.history();
        let last = history.last().unwrap();
        let node = &last.nodes["n1"];
        assert!(!node.cache_hit);
        assert_eq!(last.cache_misses, 1);
        assert_eq!(last.cache_hits, 0);
        assert_eq!(last.status, WorkflowStatus::Completed);
        assert_eq!(node.output_sizes["output_0"], vec![1, 3, 512, 512]);
        assert_eq!(h.store.node_average("TypeA").unwrap().count, 1);
    }

    #[test]
    fn node_average_is_mean_of_durations() {
        let h = harness(100);
        for (i, ms) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            run_simple(&h, &format!("p{}", i), ms);
        }
        let avg = h.store.node_average("TypeA").unwrap();
        assert_eq!(avg.count, 3);
        assert!((avg.total_time - 20.0).abs() < 1e-9);
        assert_eq!(avg.min_time, 10.0);
        assert_eq!(avg.max_time, 30.0);
    }

    #[test]
    fn cache_counts_match_node_count() {
        let h = harness(100);
        h.store.start_workflow("p");
        for i in 0..5 {
            let id = format!("n{}", i);
            h.store.start_node("p", &id, "T", &NodeIo::Empty);
            h.store.end_node("p", &id, &NodeIo::Empty, i % 2 == 0);
        }
        let closed = h.store.end_workflow("p").unwrap();
        assert_eq!(closed.cache_hits + closed.cache_misses, 5);
        assert_eq!(closed.cache_hits, 3);
        assert_eq!(closed.execution_order.len(), 5);
    }

    #[test]
    fn history_overflow_archives_once_and_keeps_latest() {
        let h = harness(2);
        run_simple(&h, "a", 1.0);
        run_simple(&h, "b", 1.0);
        assert!(h.storage.list_archives().unwrap().is_empty());
        run_simple(&h, "c", 1.0);

        let archives = h.storage.list_archives().unwrap();
        assert_eq!(archives.len(), 1);
        let archived = h.storage.read_archive(&archives[0].name).unwrap();
        let ids: Vec<_> = archived.iter().map(|p| p.prompt_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let history = h.store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prompt_id, "c");
        assert_eq!(h.storage.load_history().unwrap().len(), 1);
    }

    #[test]
    fn failed_auto_archive_drops_oldest() {
        let h = harness(2);
        run_simple(&h, "a", 1.0);
        run_simple(&h, "b", 1.0);
        h.storage.reject_writes(true);
        run_simple(&h, "c", 1.0);

        let ids: Vec<_> = h.store.history().into_iter().map(|p| p.prompt_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let h = harness(10);
        assert!(h.store.end_workflow("ghost").is_none());
        h.store.start_node("ghost", "n", "T", &NodeIo::Empty);
        h.store.end_node("ghost", "n", &NodeIo::Empty, true);
        h.store.record_error("ghost", "n", "boom");
        assert_eq!(h.store.active_len(), 0);
        assert_eq!(h.store.history_len(), 0);
        assert_eq!(h.storage.history_writes(), 0);
    }

    #[test]
    fn end_node_twice_keeps_first_timing() {
        let h = harness(10);
        h.store.start_workflow("p");
        h.store.start_node("p", "n", "T", &NodeIo::Empty);
        h.clock.advance(4.0);
        h.store.end_node("p", "n", &NodeIo::Empty, false);
        h.clock.advance(100.0);
        h.store.end_node("p", "n", &NodeIo::Empty, true);

        let closed = h.store.end_workflow("p").unwrap();
        assert_eq!(closed.nodes["n"].duration(), Some(4.0));
        assert_eq!(closed.cache_misses, 1);
        assert_eq!(closed.cache_hits, 0);
    }

    #[test]
    fn record_error_does_not_close_node() {
        let h = harness(10);
        h.store.start_workflow("p");
        h.store.start_node("p", "n", "T", &NodeIo::Empty);
        h.store.record_error("p", "n", "out of memory");
        h.store.end_node("p", "n", &NodeIo::Empty, false);
        let closed = h.store.end_workflow("p").unwrap();
        let node = &closed.nodes["n"];
        assert_eq!(node.error.as_deref(), Some("out of memory"));
        assert!(node.is_finalized());
    }

    #[test]
    fn memory_fields_come_from_sampler() {
        let h = harness(10);
        h.store.start_workflow("p");
        h.sampler.set_device(2_000);
        h.store.start_node("p", "n", "T", &NodeIo::Empty);
        h.sampler.set_device(5_000);
        h.sampler.set_device(3_000);
        h.sampler.set_host(12_000);
        h.store.end_node("p", "n", &NodeIo::Empty, false);
        let closed = h.store.end_workflow("p").unwrap();

        let node = &closed.nodes["n"];
        assert_eq!(node.vram_before, 2_000);
        assert_eq!(node.vram_after, Some(3_000));
        assert_eq!(node.vram_peak, Some(3_000));
        assert_eq!(node.ram_before, 10_000);
        assert_eq!(node.ram_after, Some(12_000));
        assert_eq!(closed.total_vram_peak, 5_000);
        assert_eq!(closed.total_ram_peak, 12_000);

        let avg = node.averages.as_ref().unwrap();
        assert_eq!(avg.mean_of("vram_usage"), 1_000.0);
        assert_eq!(avg.mean_of("ram_usage"), 2_000.0);
    }

    #[test]
    fn duplicate_start_supersedes_stale_profile() {
        let h = harness(10);
        h.store.start_workflow("p");
        h.store.start_node("p", "n", "T", &NodeIo::Empty);
        h.store.start_workflow("p");

        let history = h.store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, WorkflowStatus::Aborted);
        assert_eq!(history[0].abort_reason.as_deref(), Some(SUPERSEDED_REASON));
        assert_eq!(history[0].execution_order, vec!["n".to_string()]);
        assert_eq!(h.store.active_len(), 1);
        assert!(h.store.get_stats().current["p"].nodes.is_empty());
    }

    #[test]
    fn abort_closes_without_touching_workflow_average() {
        let h = harness(10);
        run_simple(&h, "done", 5.0);
        h.store.start_workflow("p");
        let aborted = h.store.abort_workflow("p", "host crashed").unwrap();
        assert_eq!(aborted.status, WorkflowStatus::Aborted);
        assert_eq!(aborted.abort_reason.as_deref(), Some("host crashed"));
        assert!(aborted.end_time.is_some());
        assert_eq!(h.store.workflow_average().unwrap().count, 1);
        assert!(h.store.abort_workflow("p", "again").is_none());
        assert_eq!(h.store.history_len(), 2);
    }

    #[test]
    fn stale_workflows_are_aborted() {
        let h = harness(10);
        h.store.start_workflow("old");
        h.clock.advance(60_000.0);
        h.store.start_workflow("fresh");
        h.clock.advance(1_000.0);

        let aborted = h.store.abort_stale_workflows(Duration::from_secs(30));
        assert_eq!(aborted, vec!["old".to_string()]);
        assert_eq!(h.store.current_workflow().as_deref(), Some("fresh"));
        assert_eq!(h.store.history()[0].status, WorkflowStatus::Aborted);
    }

    #[test]
    fn current_workflow_tracks_latest_start() {
        let h = harness(10);
        assert!(h.store.current_workflow().is_none());
        h.store.start_workflow("a");
        h.store.start_workflow("b");
        assert_eq!(h.store.current_workflow().as_deref(), Some("b"));
        h.store.end_workflow("b");
        assert_eq!(h.store.current_workflow().as_deref(), Some("a"));
    }

    #[test]
    fn stats_window_limits_history() {
        let h = harness(100);
        for i in 0..15 {
            run_simple(&h, &format!("p{}", i), 1.0);
        }
        h.store.start_workflow("live");
        let stats = h.store.get_stats();
        assert_eq!(stats.history.len(), 10);
        assert_eq!(stats.history[0].prompt_id, "p5");
        assert_eq!(stats.latest.unwrap().prompt_id, "p14");
        assert!(stats.current.contains_key("live"));
        assert_eq!(stats.workflow_averages.count, 15);
        assert_eq!(stats.node_averages["TypeA"].count, 15);
    }

    #[test]
    fn reopen_restores_history_and_averages() {
        let storage = Arc::new(InMemoryStore::new());
        let first = harness_with(storage.clone(), 10);
        run_simple(&first, "a", 10.0);
        run_simple(&first, "b", 30.0);

        let second = harness_with(storage, 10);
        assert_eq!(second.store.history_len(), 2);
        let avg = second.store.node_average("TypeA").unwrap();
        assert_eq!(avg.count, 2);
        assert!((avg.total_time - 20.0).abs() < 1e-9);
        assert_eq!(second.store.workflow_average().unwrap().count, 2);
    }

    #[test]
    fn reopen_truncates_to_bound() {
        let storage = Arc::new(InMemoryStore::new());
        let first = harness_with(storage.clone(), 10);
        for i in 0..5 {
            run_simple(&first, &format!("p{}", i), 1.0);
        }
        let second = harness_with(storage, 3);
        let ids: Vec<_> = second.store.history().into_iter().map(|p| p.prompt_id).collect();
        assert_eq!(ids, vec!["p2", "p3", "p4"]);
    }

    #[test]
    fn persistence_failure_keeps_memory_authoritative() {
        let h = harness(10);
        h.storage.reject_writes(true);
        run_simple(&h, "a", 1.0);
        assert_eq!(h.store.history_len(), 1);
        assert!(h.storage.load_history().unwrap().is_empty());

        h.storage.reject_writes(false);
        run_simple(&h, "b", 1.0);
        assert_eq!(h.storage.load_history().unwrap().len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let h = harness(10);
        run_simple(&h, "a", 1.0);
        h.store.start_workflow("b");
        h.store.reset();
        assert_eq!(h.store.history_len(), 0);
        assert_eq!(h.store.active_len(), 0);
        assert!(h.store.node_average("TypeA").is_none());
    }

    #[test]
    fn concurrent_workflows_respect_bound() {
        let h = harness(7);
        std::thread::scope(|scope| {
            for t in 0..4 {
                let store = &h.store;
                scope.spawn(move || {
                    for i in 0..10 {
                        let id = format!("t{}-{}", t, i);
                        store.start_workflow(&id);
                        store.start_node(&id, "n", "T", &NodeIo::Empty);
                        store.end_node(&id, "n", &NodeIo::Empty, false);
                        store.end_workflow(&id);
                        assert!(store.history_len() <= 7);
                    }
                });
            }
        });

        let archived: usize = h
            .storage
            .list_archives()
            .unwrap()
            .iter()
            .map(|a| h.storage.read_archive(&a.name).unwrap().len())
            .sum();
        assert_eq!(archived + h.store.history_len(), 40);
        assert_eq!(h.store.node_average("T").unwrap().count, 40);
    }
}
