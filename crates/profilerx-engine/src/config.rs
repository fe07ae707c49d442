//! Profiler configuration.
//!
//! Every knob has a default and can be overridden with a `PROFILERX_*`
//! environment variable:
//!
//! | Variable | Default |
//! |---|---|
//! | `PROFILERX_DATA_DIR` | `./data` |
//! | `PROFILERX_MAX_HISTORY` | `10000` |
//! | `PROFILERX_STATS_WINDOW` | `10` |
//! | `PROFILERX_MAX_TRACE_EXECUTIONS` | `1000` |
//! | `PROFILERX_TRACING` | `false` |
//! | `PROFILERX_SAMPLER` | `process` |

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use profilerx_core::{MemorySampler, NullSampler, ProcessSampler};

use crate::error::EngineError;

pub const ENV_DATA_DIR: &str = "PROFILERX_DATA_DIR";
pub const ENV_MAX_HISTORY: &str = "PROFILERX_MAX_HISTORY";
pub const ENV_STATS_WINDOW: &str = "PROFILERX_STATS_WINDOW";
pub const ENV_MAX_TRACE_EXECUTIONS: &str = "PROFILERX_MAX_TRACE_EXECUTIONS";
pub const ENV_TRACING: &str = "PROFILERX_TRACING";
pub const ENV_SAMPLER: &str = "PROFILERX_SAMPLER";

/// Which memory sampler to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerKind {
    /// Host RSS of this process; device memory reads as zero.
    #[default]
    Process,
    /// Everything reads as zero.
    None,
}

impl FromStr for SamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(SamplerKind::Process),
            "none" | "null" | "off" => Ok(SamplerKind::None),
            other => Err(format!("unknown sampler '{}', expected 'process' or 'none'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerConfig {
    /// Root of `profiling_history.json`, `method_traces.json` and `archives/`.
    pub data_dir: PathBuf,
    /// Closed profiles kept in the current history before auto-archiving.
    pub max_history: usize,
    /// Closed profiles returned by `get_stats`.
    pub stats_window: usize,
    /// Executions kept in the method-trace log.
    pub max_trace_executions: usize,
    /// Initial state of the method-call tracer.
    pub tracing_enabled: bool,
    pub sampler: SamplerKind,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        ProfilerConfig {
            data_dir: PathBuf::from("./data"),
            max_history: 10_000,
            stats_window: 10,
            max_trace_executions: 1_000,
            tracing_enabled: false,
            sampler: SamplerKind::Process,
        }
    }
}

impl ProfilerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ProfilerConfig::default();
        let config = ProfilerConfig {
            data_dir: lookup(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_history: parse_or(&lookup, ENV_MAX_HISTORY, defaults.max_history)?,
            stats_window: parse_or(&lookup, ENV_STATS_WINDOW, defaults.stats_window)?,
            max_trace_executions: parse_or(
                &lookup,
                ENV_MAX_TRACE_EXECUTIONS,
                defaults.max_trace_executions,
            )?,
            tracing_enabled: match lookup(ENV_TRACING) {
                Some(raw) => parse_flag(ENV_TRACING, &raw)?,
                None => defaults.tracing_enabled,
            },
            sampler: parse_or(&lookup, ENV_SAMPLER, defaults.sampler)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.tracing_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let positive = [
            (ENV_MAX_HISTORY, self.max_history),
            (ENV_STATS_WINDOW, self.stats_window),
            (ENV_MAX_TRACE_EXECUTIONS, self.max_trace_executions),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(EngineError::invalid_config(key, "0", "must be at least 1"));
            }
        }
        Ok(())
    }

    /// Instantiates the configured sampler, falling back to zeros when the
    /// process table cannot be read.
    pub fn build_sampler(&self) -> Arc<dyn MemorySampler> {
        match self.sampler {
            SamplerKind::None => Arc::new(NullSampler),
            SamplerKind::Process => match ProcessSampler::new() {
                Ok(sampler) => Arc::new(sampler),
                Err(e) => {
                    tracing::warn!(error = %e, "process sampler unavailable, memory will read as zero");
                    Arc::new(NullSampler)
                }
            },
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, EngineError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| EngineError::invalid_config(key, raw.as_str(), e.to_string())),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, EngineError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(EngineError::invalid_config(key, raw, "expected a boolean")),
    }
}
