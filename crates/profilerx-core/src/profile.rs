//! Workflow and node profile records.
//!
//! Field names serialize in camelCase (`promptId`, `executionOrder`, ...) so
//! history and archive files stay readable by existing dashboards. Every
//! field added after the first release carries a serde default, so older
//! files still load.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::average::RollingAverage;
use crate::error::CoreError;
use crate::trace::MethodCallRecord;

/// Output key (`output_0`, or the host's input name) to shape descriptor.
pub type ShapeMap = IndexMap<String, Vec<usize>>;

/// Lifecycle state of a [`WorkflowProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Active,
    Completed,
    /// Force-closed by `abort_workflow`; timings may be partial.
    Aborted,
}

/// Metrics for one execution of a compute graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProfile {
    pub prompt_id: String,
    /// Milliseconds since the Unix epoch.
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub nodes: IndexMap<String, NodeProfile>,
    #[serde(default)]
    pub execution_order: Vec<String>,
    #[serde(default)]
    pub total_vram_peak: u64,
    #[serde(default)]
    pub total_ram_peak: u64,
    #[serde(default)]
    pub cache_hits: u64,
    #[serde(default)]
    pub cache_misses: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averages: Option<RollingAverage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method_calls: Vec<MethodCallRecord>,
    #[serde(default = "completed_status")]
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

// Records written before `status` existed were only ever persisted once closed.
fn completed_status() -> WorkflowStatus {
    WorkflowStatus::Completed
}

impl WorkflowProfile {
    /// Creates an active profile started at `start_time`.
    pub fn new(prompt_id: impl Into<String>, start_time: f64) -> Self {
        WorkflowProfile {
            prompt_id: prompt_id.into(),
            start_time,
            end_time: None,
            nodes: IndexMap::new(),
            execution_order: Vec::new(),
            total_vram_peak: 0,
            total_ram_peak: 0,
            cache_hits: 0,
            cache_misses: 0,
            averages: None,
            method_calls: Vec::new(),
            status: WorkflowStatus::Active,
            abort_reason: None,
        }
    }

    /// Wall time in milliseconds, if closed.
    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| (end - self.start_time).max(0.0))
    }

    /// Structural checks applied to records read back from disk.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: &str| CoreError::InvalidProfile {
            prompt_id: self.prompt_id.clone(),
            reason: reason.to_string(),
        };
        if self.prompt_id.is_empty() {
            return Err(invalid("empty promptId"));
        }
        if !self.start_time.is_finite() {
            return Err(invalid("non-finite startTime"));
        }
        if let Some(end) = self.end_time {
            if !end.is_finite() {
                return Err(invalid("non-finite endTime"));
            }
        }
        if let Some(missing) = self
            .execution_order
            .iter()
            .find(|id| !self.nodes.contains_key(id.as_str()))
        {
            return Err(invalid(&format!("executionOrder names unknown node '{}'", missing)));
        }
        Ok(())
    }
}

/// Metrics for one node within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeProfile {
    pub node_id: String,
    pub node_type: String,
    pub start_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub vram_before: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_after: Option<u64>,
    /// Peak device allocation above `vram_before` during the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_peak: Option<u64>,
    #[serde(default)]
    pub ram_before: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_after: Option<u64>,
    #[serde(default)]
    pub input_sizes: ShapeMap,
    #[serde(default)]
    pub output_sizes: ShapeMap,
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averages: Option<RollingAverage>,
}

impl NodeProfile {
    pub fn new(
        node_id: impl Into<String>,
        node_type: impl Into<String>,
        start_time: f64,
        vram_before: u64,
        ram_before: u64,
        input_sizes: ShapeMap,
    ) -> Self {
        NodeProfile {
            node_id: node_id.into(),
            node_type: node_type.into(),
            start_time,
            end_time: None,
            vram_before,
            vram_after: None,
            vram_peak: None,
            ram_before,
            ram_after: None,
            input_sizes,
            output_sizes: ShapeMap::new(),
            cache_hit: false,
            error: None,
            averages: None,
        }
    }

    /// True once `end_node` has finalized this node.
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Device bytes allocated (or freed, if negative) across the node.
    pub fn vram_delta(&self) -> Option<f64> {
        self.vram_after
            .map(|after| after as f64 - self.vram_before as f64)
    }

    /// Host bytes allocated (or freed, if negative) across the node.
    pub fn ram_delta(&self) -> Option<f64> {
        self.ram_after.map(|after| after as f64 - self.ram_before as f64)
    }
}
