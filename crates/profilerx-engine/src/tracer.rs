//! Method-call tracing with per-thread call stacks.
//!
//! [`MethodCallTracer::trace`] pushes a frame onto the calling thread's stack
//! and returns the closure's value untouched. An RAII guard pops the frame on
//! every exit path (normal return, `Err`, panic unwind), updates the
//! per-method [`MethodStats`] and, when a workflow is active, records a
//! [`MethodCallRecord`] both in the tracer's current [`ExecutionTrace`] and in
//! the workflow's profile.
//!
//! Stacks live in a `thread_local!` map keyed by tracer instance, so two
//! tracers in one process (tests, embedded hosts) never see each other's
//! frames. When disabled, tracing is a single atomic load and a direct call.
//!
//! # Execution windows
//!
//! One window is open per prompt id, and [`begin_execution`] binds it to the
//! calling thread. A call is recorded in the window bound to its thread; a
//! thread with no bound window (a host worker pool, say) falls back to the
//! most recently opened window. Concurrent workflows driven from separate
//! threads therefore keep separate traces.
//!
//! [`begin_execution`]: MethodCallTracer::begin_execution

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use profilerx_core::{CallContext, ExecutionTrace, MethodCallRecord, MethodStats, TraceLog};
use profilerx_storage::{Payload, StorageError};

use crate::store::ProfileStore;

static NEXT_TRACER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CALL_STACKS: RefCell<HashMap<u64, Vec<String>>> = RefCell::new(HashMap::new());
    /// Prompt id of the execution window each tracer bound to this thread.
    static BOUND_EXECUTIONS: RefCell<HashMap<u64, String>> = RefCell::new(HashMap::new());
}

type QueueSizeSource = Arc<dyn Fn() -> Option<usize> + Send + Sync>;

pub struct MethodCallTracer {
    id: u64,
    enabled: AtomicBool,
    stats: DashMap<String, MethodStats>,
    /// Open windows by prompt id, oldest first.
    open: Mutex<IndexMap<String, ExecutionTrace>>,
    executions: Mutex<Vec<ExecutionTrace>>,
    max_executions: usize,
    queue_size_source: RwLock<Option<QueueSizeSource>>,
    store: Arc<ProfileStore>,
}

impl MethodCallTracer {
    /// Creates a tracer attached to `store`, seeded from the persisted
    /// method-trace log.
    pub fn new(store: Arc<ProfileStore>, max_executions: usize, enabled: bool) -> Self {
        let log = store.storage().load_traces().unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to load method traces, starting empty");
            TraceLog::default()
        });
        let stats: DashMap<String, MethodStats> = log.method_stats.into_iter().collect();
        let mut executions = log.executions;
        let max_executions = max_executions.max(1);
        if executions.len() > max_executions {
            executions.drain(..executions.len() - max_executions);
        }

        MethodCallTracer {
            id: NEXT_TRACER_ID.fetch_add(1, Ordering::Relaxed),
            enabled: AtomicBool::new(enabled),
            stats,
            open: Mutex::new(IndexMap::new()),
            executions: Mutex::new(executions),
            max_executions,
            queue_size_source: RwLock::new(None),
            store,
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        tracing::info!("method call tracing enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        tracing::info!("method call tracing disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Installs a callback consulted for `queue_size` when a call's context
    /// does not carry one.
    pub fn set_queue_size_source<F>(&self, source: F)
    where
        F: Fn() -> Option<usize> + Send + Sync + 'static,
    {
        *self.queue_size_source.write() = Some(Arc::new(source));
    }

    // -------------------------------------------------------------------
    // Tracing entry points
    // -------------------------------------------------------------------

    /// Times `f` as `class.method` (or `method`).
    pub fn trace<T>(&self, method: &str, class: Option<&str>, f: impl FnOnce() -> T) -> T {
        self.trace_with(method, class, CallContext::default(), f)
    }

    /// Like [`trace`](Self::trace), with adapter-supplied context fields.
    pub fn trace_with<T>(
        &self,
        method: &str,
        class: Option<&str>,
        context: CallContext,
        f: impl FnOnce() -> T,
    ) -> T {
        if !self.is_enabled() {
            return f();
        }
        let _frame = self.enter(qualify(method, class), context);
        f()
    }

    /// Times a fallible call; an `Err` marks the record as failed.
    pub fn trace_result<T, E>(
        &self,
        method: &str,
        class: Option<&str>,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        if !self.is_enabled() {
            return f();
        }
        let mut frame = self.enter(qualify(method, class), CallContext::default());
        let result = f();
        frame.failed = result.is_err();
        result
    }

    /// Returns `f` wrapped so every invocation is traced.
    pub fn wrap<A, R, F>(
        self: &Arc<Self>,
        method: &str,
        class: Option<&str>,
        f: F,
    ) -> impl Fn(A) -> R + Send + Sync
    where
        F: Fn(A) -> R + Send + Sync,
    {
        let tracer = Arc::clone(self);
        let name = qualify(method, class);
        move |arg| {
            if !tracer.is_enabled() {
                return f(arg);
            }
            let _frame = tracer.enter(name.clone(), CallContext::default());
            f(arg)
        }
    }

    // -------------------------------------------------------------------
    // Execution window
    // -------------------------------------------------------------------

    /// Opens an execution window for `prompt_id` and binds it to the
    /// calling thread.
    pub fn begin_execution(&self, prompt_id: &str) {
        if !self.is_enabled() {
            return;
        }
        let now = self.store.clock().now_ms();
        let previous = self
            .open
            .lock()
            .insert(prompt_id.to_string(), ExecutionTrace::new(prompt_id, now));
        if let Some(mut previous) = previous {
            tracing::warn!(prompt_id, "execution window restarted before it finished");
            previous.close(now);
            self.push_execution(previous);
        }
        let _ = BOUND_EXECUTIONS.try_with(|bound| {
            bound.borrow_mut().insert(self.id, prompt_id.to_string());
        });
    }

    /// The prompt id whose window receives calls made on this thread.
    pub fn current_execution(&self) -> Option<String> {
        let open = self.open.lock();
        let bound = BOUND_EXECUTIONS
            .try_with(|bound| bound.borrow().get(&self.id).cloned())
            .ok()
            .flatten();
        match bound {
            Some(prompt_id) if open.contains_key(&prompt_id) => Some(prompt_id),
            _ => open.keys().last().cloned(),
        }
    }

    /// Closes the window of `prompt_id`, appends it to the trace log and
    /// persists the log. Other open windows are untouched.
    pub fn finish_execution(&self, prompt_id: &str) -> Option<ExecutionTrace> {
        let mut execution = self.open.lock().shift_remove(prompt_id)?;
        let _ = BOUND_EXECUTIONS.try_with(|bound| {
            let mut bound = bound.borrow_mut();
            if bound.get(&self.id).map(String::as_str) == Some(prompt_id) {
                bound.remove(&self.id);
            }
        });
        execution.close(self.store.clock().now_ms());
        self.push_execution(execution.clone());
        if let Err(e) = self.persist() {
            tracing::error!(error = %e, "failed to persist method traces");
        }
        tracing::debug!(
            prompt_id = %execution.prompt_id,
            calls = execution.method_calls.len(),
            "execution trace closed"
        );
        Some(execution)
    }

    // -------------------------------------------------------------------
    // Queries and persistence
    // -------------------------------------------------------------------

    /// Per-method statistics. Empty while tracing is disabled.
    pub fn method_stats(&self) -> BTreeMap<String, MethodStats> {
        if !self.is_enabled() {
            return BTreeMap::new();
        }
        self.stats_snapshot()
    }

    /// Closed executions kept in the trace log, oldest first.
    pub fn executions(&self) -> Vec<ExecutionTrace> {
        self.executions.lock().clone()
    }

    /// Writes `{executions, method_stats}` to the trace store.
    pub fn persist(&self) -> Result<(), StorageError> {
        let log = TraceLog {
            executions: self.executions.lock().clone(),
            method_stats: self.stats_snapshot(),
        };
        let payload = Payload::encode(&log)?;
        self.store.storage().write_traces(&payload)
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    fn stats_snapshot(&self) -> BTreeMap<String, MethodStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn push_execution(&self, execution: ExecutionTrace) {
        let mut executions = self.executions.lock();
        executions.push(execution);
        if executions.len() > self.max_executions {
            let excess = executions.len() - self.max_executions;
            executions.drain(..excess);
        }
    }

    fn enter(&self, name: String, context: CallContext) -> Frame<'_> {
        let (depth, parent) = CALL_STACKS.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            let stack = stacks.entry(self.id).or_default();
            let parent = stack.last().cloned();
            stack.push(name.clone());
            (stack.len(), parent)
        });
        Frame {
            tracer: self,
            name,
            start_time: self.store.clock().now_ms(),
            depth,
            parent,
            context,
            failed: false,
        }
    }

    fn leave(&self, frame: &Frame<'_>, failed: bool) {
        // The thread-local may already be gone during thread teardown.
        let _ = CALL_STACKS.try_with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            if let Some(stack) = stacks.get_mut(&self.id) {
                stack.pop();
                if stack.is_empty() {
                    stacks.remove(&self.id);
                }
            }
        });

        let duration = (self.store.clock().now_ms() - frame.start_time).max(0.0);
        self.stats
            .entry(frame.name.clone())
            .or_insert_with(MethodStats::zero)
            .record(duration);

        let in_execution = self.current_execution();
        let Some(prompt_id) = in_execution.or_else(|| self.store.current_workflow()) else {
            return;
        };

        let queue_size = frame.context.queue_size.or_else(|| self.sample_queue_size());
        let current = std::thread::current();
        let record = MethodCallRecord {
            method: frame.name.clone(),
            start_time: frame.start_time,
            duration,
            stack_depth: frame.depth,
            parent: frame.parent.clone(),
            queue_size,
            is_cache_hit: frame.context.is_cache_hit,
            thread: Some(
                current
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{:?}", current.id())),
            ),
            failed,
        };

        if let Some(execution) = self.open.lock().get_mut(&prompt_id) {
            execution.method_calls.push(record.clone());
        }
        self.store.attach_method_call(&prompt_id, record);
    }

    /// Asks the host's queue size callback for the queue depth.
    ///
    /// Runs inside `Frame::drop`, so a callback that panics is contained here
    /// and reads as unknown. While the thread is already unwinding the callback
    /// is not called at all.
    fn sample_queue_size(&self) -> Option<usize> {
        if std::thread::panicking() {
            return None;
        }
        let source = self.queue_size_source.read().clone()?;
        match panic::catch_unwind(AssertUnwindSafe(|| source())) {
            Ok(size) => size,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(panic = %message, "queue size callback panicked, recording no queue size");
                None
            }
        }
    }
}

/// One open tracked call. Dropping it records the call.
struct Frame<'a> {
    tracer: &'a MethodCallTracer,
    name: String,
    start_time: f64,
    depth: usize,
    parent: Option<String>,
    context: CallContext,
    failed: bool,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        let failed = self.failed || std::thread::panicking();
        self.tracer.leave(self, failed);
    }
}

fn qualify(method: &str, class: Option<&str>) -> String {
    match class {
        Some(class) => format!("{}.{}", class, method),
        None => method.to_string(),
    }
}
