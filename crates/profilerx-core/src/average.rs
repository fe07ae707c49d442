//! Incremental mean/min/max/count accumulators.
//!
//! A [`RollingAverage`] never retains samples: the n-th observation folds
//! into the running mean as `(mean * (n - 1) + x) / n`. An [`AverageTable`]
//! keys accumulators by label (node type, or `"workflow"`), with explicit
//! get-or-insert-zero semantics on update.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Running statistics for one label.
///
/// `total_time` is the running *mean* duration in milliseconds, not a sum;
/// the field name is kept for compatibility with existing history files.
/// `means` carries additional named running means (memory usage, peaks).
/// Snapshots written by older releases named the mean `execution_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingAverage {
    pub count: u64,
    #[serde(alias = "execution_time")]
    pub total_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub means: BTreeMap<String, f64>,
}

impl Default for RollingAverage {
    fn default() -> Self {
        RollingAverage::zero()
    }
}

impl RollingAverage {
    /// The zero-valued accumulator inserted for an unseen label.
    pub fn zero() -> Self {
        RollingAverage {
            count: 0,
            total_time: 0.0,
            min_time: 0.0,
            max_time: 0.0,
            means: BTreeMap::new(),
        }
    }

    /// Folds one observation into the accumulator.
    ///
    /// `duration` must be a finite, non-negative number of milliseconds;
    /// anything else is clamped to zero with a warning. Each `(name, value)`
    /// pair in `extras` updates the named running mean the same way, except
    /// that negative values are kept (memory deltas may shrink).
    pub fn observe(&mut self, duration: f64, extras: &[(&str, f64)]) {
        let duration = sanitize_duration(duration);
        self.count += 1;
        let n = self.count as f64;

        if self.count == 1 {
            self.total_time = duration;
            self.min_time = duration;
            self.max_time = duration;
        } else {
            self.total_time = (self.total_time * (n - 1.0) + duration) / n;
            self.min_time = self.min_time.min(duration);
            self.max_time = self.max_time.max(duration);
        }

        for (name, value) in extras {
            let value = sanitize_extra(name, *value);
            match self.means.get_mut(*name) {
                Some(mean) if self.count > 1 => *mean = (*mean * (n - 1.0) + value) / n,
                Some(mean) => *mean = value,
                None => {
                    self.means.insert((*name).to_string(), value);
                }
            }
        }
    }

    /// Returns the named secondary mean, or 0 if never observed.
    pub fn mean_of(&self, name: &str) -> f64 {
        self.means.get(name).copied().unwrap_or(0.0)
    }
}

fn sanitize_duration(value: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        tracing::warn!(value, "rejected invalid duration sample, clamping to 0");
        0.0
    } else {
        value
    }
}

fn sanitize_extra(name: &str, value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        tracing::warn!(metric = name, value, "rejected non-finite sample, clamping to 0");
        0.0
    }
}

/// A set of [`RollingAverage`]s keyed by label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AverageTable {
    entries: BTreeMap<String, RollingAverage>,
}

impl AverageTable {
    pub fn new() -> Self {
        AverageTable::default()
    }

    /// Updates the accumulator for `label` and returns a snapshot of it.
    pub fn update(&mut self, label: &str, duration: f64, extras: &[(&str, f64)]) -> RollingAverage {
        let entry = self
            .entries
            .entry(label.to_string())
            .or_insert_with(RollingAverage::zero);
        entry.observe(duration, extras);
        entry.clone()
    }

    pub fn get(&self, label: &str) -> Option<&RollingAverage> {
        self.entries.get(label)
    }

    /// Number of labels seen so far.
    pub fn label_count(&self) -> usize {
        self.entries.len()
    }

    /// Copies the table out as a plain map (for stats snapshots).
    pub fn to_map(&self) -> BTreeMap<String, RollingAverage> {
        self.entries.clone()
    }
}
