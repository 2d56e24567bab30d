use parking_lot::Mutex;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use super::ResourceSnapshot;
use crate::{Error, Result};

/// Source of system load readings.
pub trait LoadSampler: Send + Sync {
    /// Take one reading of CPU and memory utilisation.
    fn sample(&self) -> Result<ResourceSnapshot>;
}

/// Samples the host through `sysinfo`.
///
/// CPU usage is computed between consecutive refreshes, so the very first
/// reading after construction may under-report.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        system.refresh_cpu_all();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for SysinfoSampler {
    fn sample(&self) -> Result<ResourceSnapshot> {
        let mut system = self.system.lock();
        system.refresh_cpu_all();
        system.refresh_memory();

        let total_mem = system.total_memory();
        if total_mem == 0 {
            return Err(Error::Other("memory information unavailable".to_string()));
        }

        let cpu = system.global_cpu_usage();
        let memory = (system.used_memory() as f64 / total_mem as f64 * 100.0) as f32;
        Ok(ResourceSnapshot::new(cpu, memory))
    }
}
