//! Host-facing ingestion API.
//!
//! [`HostAdapter`] is what a compute-graph engine calls while it executes.
//! Every entry point contains panics raised inside the profiler and turns
//! them into an error log plus a safe default, so instrumentation can never
//! change what the host observes. Panics raised by the host's own closures
//! (in [`run_workflow`](HostAdapter::run_workflow) and
//! [`run_node`](HostAdapter::run_node)) are not caught.

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use profilerx_core::{Clock, MemorySampler, NodeIo, SystemClock, WorkflowProfile};
use profilerx_storage::{JsonFileStore, ProfileStorage};

use crate::config::ProfilerConfig;
use crate::error::EngineError;
use crate::store::ProfileStore;
use crate::tracer::MethodCallTracer;

/// What a node closure hands back to [`HostAdapter::run_node`].
#[derive(Debug)]
pub struct NodeOutcome<T> {
    pub value: T,
    pub outputs: NodeIo,
    pub cache_hit: bool,
}

impl<T> NodeOutcome<T> {
    pub fn computed(value: T, outputs: NodeIo) -> Self {
        NodeOutcome {
            value,
            outputs,
            cache_hit: false,
        }
    }

    pub fn cached(value: T, outputs: NodeIo) -> Self {
        NodeOutcome {
            value,
            outputs,
            cache_hit: true,
        }
    }
}

#[derive(Clone)]
pub struct HostAdapter {
    store: Arc<ProfileStore>,
    tracer: Arc<MethodCallTracer>,
}

impl HostAdapter {
    pub fn new(store: Arc<ProfileStore>, tracer: Arc<MethodCallTracer>) -> Self {
        HostAdapter { store, tracer }
    }

    /// Opens the file-backed store under `config.data_dir` with the configured
    /// sampler and the system clock.
    pub fn open(config: &ProfilerConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let storage: Arc<dyn ProfileStorage> = Arc::new(JsonFileStore::open(&config.data_dir)?);
        Ok(Self::with_parts(
            config,
            storage,
            config.build_sampler(),
            Arc::new(SystemClock),
        ))
    }

    /// Assembles an adapter from explicit capabilities.
    pub fn with_parts(
        config: &ProfilerConfig,
        storage: Arc<dyn ProfileStorage>,
        sampler: Arc<dyn MemorySampler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(ProfileStore::open(config, storage, sampler, clock));
        let tracer = Arc::new(MethodCallTracer::new(
            store.clone(),
            config.max_trace_executions,
            config.tracing_enabled,
        ));
        HostAdapter { store, tracer }
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    pub fn tracer(&self) -> &Arc<MethodCallTracer> {
        &self.tracer
    }

    pub fn start_workflow(&self, prompt_id: &str) {
        contained("start_workflow", (), || {
            self.store.start_workflow(prompt_id);
            self.tracer.begin_execution(prompt_id);
        })
    }

    pub fn end_workflow(&self, prompt_id: &str) -> Option<WorkflowProfile> {
        contained("end_workflow", None, || {
            let profile = self.store.end_workflow(prompt_id);
            self.finish_execution_for(prompt_id);
            profile
        })
    }

    pub fn abort_workflow(&self, prompt_id: &str, reason: &str) -> Option<WorkflowProfile> {
        contained("abort_workflow", None, || {
            let profile = self.store.abort_workflow(prompt_id, reason);
            self.finish_execution_for(prompt_id);
            profile
        })
    }

    pub fn abort_stale_workflows(&self, older_than: Duration) -> Vec<String> {
        contained("abort_stale_workflows", Vec::new(), || {
            let aborted = self.store.abort_stale_workflows(older_than);
            for prompt_id in &aborted {
                self.finish_execution_for(prompt_id);
            }
            aborted
        })
    }

    pub fn start_node(&self, prompt_id: &str, node_id: &str, node_type: &str, inputs: &NodeIo) {
        contained("start_node", (), || {
            self.store.start_node(prompt_id, node_id, node_type, inputs)
        })
    }

    pub fn end_node(&self, prompt_id: &str, node_id: &str, outputs: &NodeIo, cache_hit: bool) {
        contained("end_node", (), || {
            self.store.end_node(prompt_id, node_id, outputs, cache_hit)
        })
    }

    pub fn record_error(&self, prompt_id: &str, node_id: &str, message: &str) {
        contained("record_error", (), || {
            self.store.record_error(prompt_id, node_id, message)
        })
    }

    /// Runs a whole workflow between `start_workflow` and `end_workflow`.
    ///
    /// If `f` returns `Err` the workflow is aborted with the error text as
    /// reason. The result is returned as-is.
    pub fn run_workflow<T, E, F>(&self, prompt_id: &str, f: F) -> Result<T, E>
    where
        E: Display,
        F: FnOnce() -> Result<T, E>,
    {
        self.start_workflow(prompt_id);
        let result = f();
        match &result {
            Ok(_) => {
                self.end_workflow(prompt_id);
            }
            Err(e) => {
                self.abort_workflow(prompt_id, &e.to_string());
            }
        }
        result
    }

    /// Runs one node between `start_node` and `end_node`.
    ///
    /// If `f` returns `Err` the error text is recorded on the node, which is
    /// then ended as a miss with no outputs.
    pub fn run_node<T, E, F>(
        &self,
        prompt_id: &str,
        node_id: &str,
        node_type: &str,
        inputs: &NodeIo,
        f: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnOnce() -> Result<NodeOutcome<T>, E>,
    {
        self.start_node(prompt_id, node_id, node_type, inputs);
        match f() {
            Ok(outcome) => {
                self.end_node(prompt_id, node_id, &outcome.outputs, outcome.cache_hit);
                Ok(outcome.value)
            }
            Err(e) => {
                self.record_error(prompt_id, node_id, &e.to_string());
                self.end_node(prompt_id, node_id, &NodeIo::Empty, false);
                Err(e)
            }
        }
    }

    fn finish_execution_for(&self, prompt_id: &str) {
        self.tracer.finish_execution(prompt_id);
    }
}

/// Runs `f`, converting a panic into an error log and `fallback`.
fn contained<T>(operation: &'static str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            tracing::error!(operation, panic = %panic_message(payload.as_ref()), "profiler fault contained");
            fallback
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use profilerx_core::{
        FixedSampler, ManualClock, MemorySample, NodeValue, SamplerError, WorkflowStatus,
    };
    use profilerx_storage::InMemoryStore;

    fn adapter_with(sampler: Arc<dyn MemorySampler>, tracing: bool) -> (HostAdapter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000.0));
        let config = ProfilerConfig::default().with_tracing(tracing);
        let adapter = HostAdapter::with_parts(
            &config,
            Arc::new(InMemoryStore::new()),
            sampler,
            clock.clone(),
        );
        (adapter, clock)
    }

    fn adapter() -> (HostAdapter, Arc<ManualClock>) {
        adapter_with(Arc::new(FixedSampler::new(0, 0)), true)
    }

    /// Fails every reading by panicking, standing in for a broken runtime
    /// binding.
    struct PanickingSampler;

    impl MemorySampler for PanickingSampler {
        fn sample(&self) -> Result<MemorySample, SamplerError> {
            panic!("driver went away")
        }
    }

    struct FailingSampler;

    impl MemorySampler for FailingSampler {
        fn sample(&self) -> Result<MemorySample, SamplerError> {
            Err(SamplerError::Unavailable("no device".into()))
        }
    }

    #[test]
    fn run_helpers_bracket_host_work() {
        let (adapter, clock) = adapter();
        let outputs = NodeIo::from(vec![NodeValue::tensor(&[2, 4])]);

        let result: Result<u32, String> = adapter.run_workflow("p", || {
            let a = adapter.run_node("p", "n1", "Load", &NodeIo::Empty, || {
                clock.advance(5.0);
                Ok::<_, String>(NodeOutcome::computed(1, outputs.clone()))
            })?;
            let b = adapter.run_node("p", "n2", "Load", &NodeIo::Empty, || {
                Ok::<_, String>(NodeOutcome::cached(2, NodeIo::Empty))
            })?;
            Ok(a + b)
        });
        assert_eq!(result, Ok(3));

        let profile = adapter.store().history().pop().unwrap();
        assert_eq!(profile.status, WorkflowStatus::Completed);
        assert_eq!(profile.cache_hits, 1);
        assert_eq!(profile.cache_misses, 1);
        assert_eq!(profile.nodes["n1"].output_sizes["output_0"], vec![2, 4]);
        assert_eq!(profile.nodes["n1"].duration(), Some(5.0));
    }

    #[test]
    fn failing_node_records_error_and_aborts_workflow() {
        let (adapter, _clock) = adapter();
        let result: Result<(), String> = adapter.run_workflow("p", || {
            adapter.run_node("p", "n1", "Sampler", &NodeIo::Empty, || {
                Err::<NodeOutcome<()>, _>("CUDA out of memory".to_string())
            })
        });
        assert_eq!(result, Err("CUDA out of memory".to_string()));

        let profile = adapter.store().history().pop().unwrap();
        assert_eq!(profile.status, WorkflowStatus::Aborted);
        assert_eq!(profile.abort_reason.as_deref(), Some("CUDA out of memory"));
        assert_eq!(profile.nodes["n1"].error.as_deref(), Some("CUDA out of memory"));
        assert!(profile.nodes["n1"].is_finalized());
    }

    #[test]
    fn instrumentation_panics_never_reach_the_host() {
        let (adapter, _clock) = adapter_with(Arc::new(PanickingSampler), false);
        adapter.start_workflow("p");
        adapter.start_node("p", "n", "T", &NodeIo::Empty);
        adapter.end_node("p", "n", &NodeIo::Empty, false);
        assert!(adapter.end_workflow("p").is_none());

        let value: Result<i32, String> = adapter.run_workflow("q", || Ok(9));
        assert_eq!(value, Ok(9));
    }

    #[test]
    fn sampler_errors_degrade_to_zero() {
        let (adapter, _clock) = adapter_with(Arc::new(FailingSampler), false);
        adapter.start_workflow("p");
        adapter.start_node("p", "n", "T", &NodeIo::Empty);
        adapter.end_node("p", "n", &NodeIo::Empty, false);
        let profile = adapter.end_workflow("p").unwrap();
        assert_eq!(profile.total_vram_peak, 0);
        assert_eq!(profile.nodes["n"].vram_peak, Some(0));
        assert_eq!(profile.cache_misses, 1);
    }

    #[test]
    fn workflow_drives_tracer_execution_window() {
        let (adapter, clock) = adapter();
        adapter.start_workflow("p");
        assert_eq!(adapter.tracer().current_execution().as_deref(), Some("p"));
        adapter.tracer().trace("execute", Some("PromptExecutor"), || clock.advance(2.0));
        let profile = adapter.end_workflow("p").unwrap();

        assert!(adapter.tracer().current_execution().is_none());
        assert_eq!(profile.method_calls.len(), 1);
        let executions = adapter.tracer().executions();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].method_calls[0].method, "PromptExecutor.execute");
    }

    #[test]
    fn stale_workflows_close_their_execution_window() {
        let (adapter, clock) = adapter();
        adapter.start_workflow("hung");
        clock.advance(120_000.0);
        let aborted = adapter.abort_stale_workflows(Duration::from_secs(60));
        assert_eq!(aborted, vec!["hung".to_string()]);
        assert!(adapter.tracer().current_execution().is_none());
        assert_eq!(adapter.tracer().executions().len(), 1);
    }

    #[test]
    fn open_uses_data_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = ProfilerConfig::default()
            .with_data_dir(dir.path())
            .with_tracing(false);
        let adapter = HostAdapter::open(&config).unwrap();
        adapter.start_workflow("p");
        adapter.end_workflow("p");
        assert!(dir.path().join("profiling_history.json").exists());
        assert!(dir.path().join("archives").is_dir());
    }
}
