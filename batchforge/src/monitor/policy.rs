use super::{MonitorConfig, ResourceSnapshot};

/// Worker-count recommendation from a load reading.
///
/// Scales down by one when either CPU or memory is above its high mark, and up
/// by one when both are below their low-water marks. Readings in between keep
/// the current size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerScalingPolicy {
    pub high_cpu_percent: f32,
    pub high_memory_percent: f32,
    pub low_cpu_percent: f32,
    pub low_memory_percent: f32,
}

impl WorkerScalingPolicy {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            high_cpu_percent: config.high_cpu_percent,
            high_memory_percent: config.high_memory_percent,
            low_cpu_percent: config.low_cpu_percent,
            low_memory_percent: config.low_memory_percent,
        }
    }

    /// Whether the reading is above either high mark.
    pub fn is_overloaded(&self, snapshot: &ResourceSnapshot) -> bool {
        snapshot.cpu_percent > self.high_cpu_percent
            || snapshot.memory_percent > self.high_memory_percent
    }

    /// Whether the reading is below both low-water marks.
    pub fn has_headroom(&self, snapshot: &ResourceSnapshot) -> bool {
        snapshot.cpu_percent < self.low_cpu_percent
            && snapshot.memory_percent < self.low_memory_percent
    }

    /// Recommended change to the worker count: -1, 0 or +1.
    pub fn delta(&self, snapshot: &ResourceSnapshot, current: usize, max: usize, min: usize) -> i32 {
        if self.is_overloaded(snapshot) {
            if current > min { -1 } else { 0 }
        } else if self.has_headroom(snapshot) && current < max {
            1
        } else {
            0
        }
    }
}

impl Default for WorkerScalingPolicy {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f32, memory: f32) -> ResourceSnapshot {
        ResourceSnapshot::new(cpu, memory)
    }

    #[test]
    fn test_high_cpu_scales_down() {
        let policy = WorkerScalingPolicy::default();
        assert_eq!(policy.delta(&snapshot(95.0, 40.0), 3, 4, 1), -1);
    }

    #[test]
    fn test_high_memory_scales_down() {
        let policy = WorkerScalingPolicy::default();
        assert_eq!(policy.delta(&snapshot(10.0, 90.0), 3, 4, 1), -1);
    }

    #[test]
    fn test_never_below_min() {
        let policy = WorkerScalingPolicy::default();
        assert_eq!(policy.delta(&snapshot(99.0, 99.0), 1, 4, 1), 0);
    }

    #[test]
    fn test_idle_scales_up_until_max() {
        let policy = WorkerScalingPolicy::default();
        assert_eq!(policy.delta(&snapshot(10.0, 20.0), 2, 4, 1), 1);
        assert_eq!(policy.delta(&snapshot(10.0, 20.0), 4, 4, 1), 0);
    }

    #[test]
    fn test_between_marks_holds() {
        let policy = WorkerScalingPolicy::default();
        assert_eq!(policy.delta(&snapshot(65.0, 20.0), 2, 4, 1), 0);
        assert_eq!(policy.delta(&snapshot(10.0, 70.0), 2, 4, 1), 0);
        // Exactly on the high mark is not overloaded.
        assert_eq!(policy.delta(&snapshot(80.0, 85.0), 2, 4, 1), 0);
    }
}
