//! Spare-worker scaling rule.
//!
//! Pure function of the current counters and the configured band, evaluated
//! by the pool supervisor on every tick.

use crate::config::WorkerConfig;

/// Idle/total worker counts at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    pub idle: usize,
    pub total: usize,
}

/// Bounds the pool keeps itself within.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingBand {
    pub min_spare: usize,
    pub max_spare: usize,
    pub max_workers: usize,
}

impl From<&WorkerConfig> for ScalingBand {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            min_spare: config.min_spare,
            max_spare: config.max_spare,
            max_workers: config.max_workers,
        }
    }
}

/// What the supervisor should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    Spawn(usize),
    Retire(usize),
    Hold,
}

pub fn evaluate(counters: PoolCounters, band: &ScalingBand) -> ScalingDecision {
    if counters.idle < band.min_spare && counters.total < band.max_workers {
        let wanted = band.min_spare - counters.idle;
        let room = band.max_workers - counters.total;
        ScalingDecision::Spawn(wanted.min(room))
    } else if counters.idle > band.max_spare {
        ScalingDecision::Retire(counters.idle - band.max_spare)
    } else {
        ScalingDecision::Hold
    }
}
