//! Memory measurement capability.
//!
//! The engine never talks to an accelerator runtime directly. It asks an
//! injected [`MemorySampler`] for `(device_bytes, host_bytes)`, for the
//! device high-water mark, and to reset that mark at node boundaries.
//! Any [`SamplerError`] is degraded to zero by the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::error::SamplerError;

/// One reading of device and host memory, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySample {
    pub device_bytes: u64,
    pub host_bytes: u64,
}

/// Source of memory readings.
///
/// Implementations must be cheap and side-effect-free apart from
/// [`reset_device_peak`](MemorySampler::reset_device_peak); they are called
/// inside the profile store's critical section.
pub trait MemorySampler: Send + Sync {
    /// Current device and host usage.
    fn sample(&self) -> Result<MemorySample, SamplerError>;

    /// Highest device usage since the last reset.
    fn device_peak(&self) -> Result<u64, SamplerError> {
        self.sample().map(|s| s.device_bytes)
    }

    /// Starts a new device high-water-mark window.
    fn reset_device_peak(&self) {}
}

/// Reports zero for everything. The default when no runtime is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSampler;

impl MemorySampler for NullSampler {
    fn sample(&self) -> Result<MemorySample, SamplerError> {
        Ok(MemorySample::default())
    }
}

/// Host resident-set size of the current process via `sysinfo`.
///
/// Device figures are always zero; hosts with an accelerator supply their
/// own sampler.
pub struct ProcessSampler {
    system: Mutex<System>,
    pid: Pid,
}

impl ProcessSampler {
    pub fn new() -> Result<Self, SamplerError> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| SamplerError::Unavailable(e.to_string()))?;
        Ok(ProcessSampler {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

impl MemorySampler for ProcessSampler {
    fn sample(&self) -> Result<MemorySample, SamplerError> {
        let mut system = self.system.lock();
        if !system.refresh_process(self.pid) {
            return Err(SamplerError::Unavailable(format!(
                "process {} not found",
                self.pid
            )));
        }
        let host_bytes = system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or_else(|| SamplerError::Failed(format!("no memory info for {}", self.pid)))?;
        Ok(MemorySample {
            device_bytes: 0,
            host_bytes,
        })
    }
}

/// A sampler whose readings are set by hand. Tracks a device high-water mark
/// the way accelerator allocators do.
#[derive(Debug, Default)]
pub struct FixedSampler {
    device: AtomicU64,
    host: AtomicU64,
    peak: AtomicU64,
}

impl FixedSampler {
    pub fn new(device_bytes: u64, host_bytes: u64) -> Self {
        FixedSampler {
            device: AtomicU64::new(device_bytes),
            host: AtomicU64::new(host_bytes),
            peak: AtomicU64::new(device_bytes),
        }
    }

    pub fn set_device(&self, bytes: u64) {
        self.device.store(bytes, Ordering::SeqCst);
        self.peak.fetch_max(bytes, Ordering::SeqCst);
    }

    pub fn set_host(&self, bytes: u64) {
        self.host.store(bytes, Ordering::SeqCst);
    }
}

impl MemorySampler for FixedSampler {
    fn sample(&self) -> Result<MemorySample, SamplerError> {
        Ok(MemorySample {
            device_bytes: self.device.load(Ordering::SeqCst),
            host_bytes: self.host.load(Ordering::SeqCst),
        })
    }

    fn device_peak(&self) -> Result<u64, SamplerError> {
        Ok(self.peak.load(Ordering::SeqCst))
    }

    fn reset_device_peak(&self) {
        self.peak
            .store(self.device.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sampler_reports_zero() {
        let sample = NullSampler.sample().unwrap();
        assert_eq!(sample, MemorySample::default());
        assert_eq!(NullSampler.device_peak().unwrap(), 0);
    }

    #[test]
    fn fixed_sampler_tracks_peak_since_reset() {
        let sampler = FixedSampler::new(100, 1_000);
        sampler.set_device(500);
        sampler.set_device(200);
        assert_eq!(sampler.device_peak().unwrap(), 500);
        sampler.reset_device_peak();
        assert_eq!(sampler.device_peak().unwrap(), 200);
        sampler.set_device(300);
        assert_eq!(sampler.device_peak().unwrap(), 300);
    }

    #[test]
    fn process_sampler_reads_host_memory() {
        let sampler = ProcessSampler::new().unwrap();
        let sample = sampler.sample().unwrap();
        assert_eq!(sample.device_bytes, 0);
        assert!(sample.host_bytes > 0);
    }
}
