//! Measurement cycle token.
//!
//! Deep sleep discards RAM, so "where we are" in a measurement cycle is kept
//! in the persisted configuration as a single token instead of independent
//! booleans. Inconsistent combinations (published but never measured) are
//! not representable.

use serde::{Deserialize, Serialize};

/// The furthest pipeline phase finished in the current cycle.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// A new cycle; nothing finished yet.
    #[default]
    Idle,
    ConnectionTested,
    TimePrinted,
    SensorDataAcquired,
    Published,
}

impl CyclePhase {
    /// Pipeline order, first to last.
    pub const PIPELINE: [CyclePhase; 5] = [
        CyclePhase::Idle,
        CyclePhase::ConnectionTested,
        CyclePhase::TimePrinted,
        CyclePhase::SensorDataAcquired,
        CyclePhase::Published,
    ];

    /// The phase that has to be finished before this one may run.
    pub fn predecessor(self) -> Option<CyclePhase> {
        match self {
            CyclePhase::Idle => None,
            CyclePhase::ConnectionTested => Some(CyclePhase::Idle),
            CyclePhase::TimePrinted => Some(CyclePhase::ConnectionTested),
            CyclePhase::SensorDataAcquired => Some(CyclePhase::TimePrinted),
            CyclePhase::Published => Some(CyclePhase::SensorDataAcquired),
        }
    }

    pub fn next(self) -> Option<CyclePhase> {
        match self {
            CyclePhase::Idle => Some(CyclePhase::ConnectionTested),
            CyclePhase::ConnectionTested => Some(CyclePhase::TimePrinted),
            CyclePhase::TimePrinted => Some(CyclePhase::SensorDataAcquired),
            CyclePhase::SensorDataAcquired => Some(CyclePhase::Published),
            CyclePhase::Published => None,
        }
    }
}

/// Persisted progress of the current measurement cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleState {
    /// Furthest phase finished, successfully or not.
    pub phase: CyclePhase,

    /// First phase that failed; later phases skip their work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<CyclePhase>,
}

impl CycleState {
    /// True once `phase` has finished, whatever its outcome.
    pub fn has_finished(&self, phase: CyclePhase) -> bool {
        self.phase >= phase
    }

    /// True once `phase` has finished and neither it nor an earlier phase failed.
    pub fn has_succeeded(&self, phase: CyclePhase) -> bool {
        self.has_finished(phase) && self.failed_at.map_or(true, |failed| phase < failed)
    }

    pub fn is_aborted(&self) -> bool {
        self.failed_at.is_some()
    }

    /// Record `phase` as finished. Never moves the token backwards.
    pub fn finish(&mut self, phase: CyclePhase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }

    /// Record `phase` as finished with a failure.
    pub fn fail(&mut self, phase: CyclePhase) {
        self.finish(phase);
        if self.failed_at.map_or(true, |failed| phase < failed) {
            self.failed_at = Some(phase);
        }
    }

    pub fn reset(&mut self) {
        *self = CycleState::default();
    }

    /// The boolean progress flags derived from the token.
    pub fn flags(&self) -> ProgressFlags {
        ProgressFlags {
            tested_connection_cloud: self.has_succeeded(CyclePhase::ConnectionTested),
            printed_time: self.has_succeeded(CyclePhase::TimePrinted),
            got_sensor_data: self.has_succeeded(CyclePhase::SensorDataAcquired),
            published_to_cloud: self.has_succeeded(CyclePhase::Published),
        }
    }
}

/// Per-cycle progress flags, as exposed on the status interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressFlags {
    pub tested_connection_cloud: bool,
    pub printed_time: bool,
    pub got_sensor_data: bool,
    pub published_to_cloud: bool,
}

impl ProgressFlags {
    pub fn any(&self) -> bool {
        self.tested_connection_cloud || self.printed_time || self.got_sensor_data || self.published_to_cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order() {
        for pair in CyclePhase::PIPELINE.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert_eq!(pair[1].predecessor(), Some(pair[0]));
        }
        assert_eq!(CyclePhase::Published.next(), None);
    }

    #[test]
    fn test_finish_never_moves_backwards() {
        let mut state = CycleState::default();
        state.finish(CyclePhase::TimePrinted);
        state.finish(CyclePhase::ConnectionTested);
        assert_eq!(state.phase, CyclePhase::TimePrinted);
    }

    #[test]
    fn test_failure_clears_later_flags() {
        let mut state = CycleState::default();
        state.finish(CyclePhase::ConnectionTested);
        state.finish(CyclePhase::TimePrinted);
        state.fail(CyclePhase::SensorDataAcquired);
        state.finish(CyclePhase::Published);

        let flags = state.flags();
        assert!(flags.tested_connection_cloud);
        assert!(flags.printed_time);
        assert!(!flags.got_sensor_data);
        assert!(!flags.published_to_cloud);
        assert!(state.has_finished(CyclePhase::Published));
        assert!(state.is_aborted());
    }

    #[test]
    fn test_reset_clears_all_flags() {
        let mut state = CycleState::default();
        state.finish(CyclePhase::Published);
        assert!(state.flags().any());

        state.reset();
        assert!(!state.flags().any());
        assert_eq!(state.phase, CyclePhase::Idle);
    }

    #[test]
    fn test_serialized_form() {
        let mut state = CycleState::default();
        state.finish(CyclePhase::SensorDataAcquired);
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json, serde_json::json!({"phase": "sensor_data_acquired"}));
    }
}
