//! Method-call tracing records.
//!
//! These are the records produced by the method-call tracer: one
//! [`MethodCallRecord`] per completed tracked call, aggregated
//! [`MethodStats`] per qualified method name, and the persisted
//! [`TraceLog`] (`{executions, method_stats}`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One completed tracked call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCallRecord {
    /// Qualified name, `Class.method` when a class was given.
    pub method: String,
    /// Milliseconds since the Unix epoch.
    pub start_time: f64,
    /// Milliseconds.
    pub duration: f64,
    /// 1 for an outermost tracked call.
    pub stack_depth: usize,
    /// The enclosing tracked call on the same thread.
    pub parent: Option<String>,
    #[serde(default)]
    pub queue_size: Option<usize>,
    #[serde(default)]
    pub is_cache_hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// The call returned an error or unwound.
    #[serde(default)]
    pub failed: bool,
}

/// Contextual fields an adapter may attach to a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallContext {
    pub queue_size: Option<usize>,
    pub is_cache_hit: Option<bool>,
}

impl CallContext {
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = Some(size);
        self
    }

    pub fn with_cache_hit(mut self, hit: bool) -> Self {
        self.is_cache_hit = Some(hit);
        self
    }
}

/// Aggregate timing for one qualified method name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodStats {
    pub total_calls: u64,
    /// Sum of durations in milliseconds.
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub avg_time: f64,
}

impl Default for MethodStats {
    fn default() -> Self {
        MethodStats::zero()
    }
}

impl MethodStats {
    /// The zero-valued record inserted for a method seen for the first time.
    pub fn zero() -> Self {
        MethodStats {
            total_calls: 0,
            total_time: 0.0,
            min_time: 0.0,
            max_time: 0.0,
            avg_time: 0.0,
        }
    }

    pub fn record(&mut self, duration: f64) {
        let duration = if duration.is_finite() && duration >= 0.0 {
            duration
        } else {
            tracing::warn!(duration, "rejected invalid call duration, clamping to 0");
            0.0
        };
        if self.total_calls == 0 {
            self.min_time = duration;
            self.max_time = duration;
        } else {
            self.min_time = self.min_time.min(duration);
            self.max_time = self.max_time.max(duration);
        }
        self.total_calls += 1;
        self.total_time += duration;
        self.avg_time = self.total_time / self.total_calls as f64;
    }
}

/// The tracer's record of one execution window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub prompt_id: String,
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub method_calls: Vec<MethodCallRecord>,
}

impl ExecutionTrace {
    pub fn new(prompt_id: impl Into<String>, start_time: f64) -> Self {
        ExecutionTrace {
            prompt_id: prompt_id.into(),
            start_time,
            end_time: None,
            total_time: 0.0,
            method_calls: Vec::new(),
        }
    }

    /// Stamps the end of the window.
    pub fn close(&mut self, end_time: f64) {
        self.end_time = Some(end_time);
        self.total_time = (end_time - self.start_time).max(0.0);
    }
}

/// The persisted method-trace store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceLog {
    #[serde(default)]
    pub executions: Vec<ExecutionTrace>,
    #[serde(default)]
    pub method_stats: BTreeMap<String, MethodStats>,
}
