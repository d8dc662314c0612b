//! Device profiling for memory budget sizing
//!
//! The host is bucketed into a tier once at startup; each tier maps to a
//! fixed memory-tier budget.

use crate::types::StoreBudget;
use std::fmt;
use tracing::info;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// Raw host signals; either may be unavailable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceSignals {
    /// Memory the host can hand out now, not installed RAM
    pub available_memory_bytes: Option<u64>,
    pub cpu_cores: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTier {
    Low,
    Mid,
    High,
}

impl DeviceTier {
    /// Bucket a device; with no signals at all it lands in `Mid`
    pub fn classify(signals: DeviceSignals) -> Self {
        let memory = signals.available_memory_bytes;
        let cores = signals.cpu_cores;

        if memory.is_some_and(|m| m < 4 * GB) || cores.is_some_and(|c| c <= 2) {
            return DeviceTier::Low;
        }
        match (memory, cores) {
            (Some(m), Some(c)) if m >= 8 * GB && c >= 8 => DeviceTier::High,
            _ => DeviceTier::Mid,
        }
    }

    pub fn budget(&self) -> StoreBudget {
        match self {
            DeviceTier::Low => StoreBudget::new(50, 50 * MB),
            DeviceTier::Mid => StoreBudget::new(100, 100 * MB),
            DeviceTier::High => StoreBudget::new(200, 250 * MB),
        }
    }
}

impl fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTier::Low => write!(f, "low"),
            DeviceTier::Mid => write!(f, "mid"),
            DeviceTier::High => write!(f, "high"),
        }
    }
}

pub trait DeviceProfiler: Send + Sync {
    fn signals(&self) -> DeviceSignals;

    fn tier(&self) -> DeviceTier {
        DeviceTier::classify(self.signals())
    }

    fn recommended_entry_budget(&self) -> usize {
        self.tier().budget().max_entries
    }

    fn recommended_byte_budget(&self) -> u64 {
        self.tier().budget().max_bytes
    }

    fn budget(&self) -> StoreBudget {
        let signals = self.signals();
        let tier = DeviceTier::classify(signals);
        let budget = tier.budget();
        info!(
            tier = %tier,
            available_memory = ?signals.available_memory_bytes,
            cpu_cores = ?signals.cpu_cores,
            max_entries = budget.max_entries,
            max_bytes = budget.max_bytes,
            "Sized memory cache budget"
        );
        budget
    }
}

/// Reads the host via sysinfo
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProfiler;

impl DeviceProfiler for SystemProfiler {
    fn signals(&self) -> DeviceSignals {
        let available_memory_bytes = if sysinfo::IS_SUPPORTED_SYSTEM {
            let mut sys = sysinfo::System::new();
            sys.refresh_memory();
            Some(sys.available_memory()).filter(|m| *m > 0)
        } else {
            None
        };

        let cpu_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .ok();

        DeviceSignals {
            available_memory_bytes,
            cpu_cores,
        }
    }
}

/// Fixed signals, for tests and hosts where probing is unwanted
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProfiler {
    signals: DeviceSignals,
}

impl FixedProfiler {
    pub fn new(available_memory_bytes: Option<u64>, cpu_cores: Option<usize>) -> Self {
        Self {
            signals: DeviceSignals {
                available_memory_bytes,
                cpu_cores,
            },
        }
    }

    /// No signals at all
    pub fn headless() -> Self {
        Self::default()
    }
}

impl DeviceProfiler for FixedProfiler {
    fn signals(&self) -> DeviceSignals {
        self.signals
    }
}
