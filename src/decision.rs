// src/decision.rs
//
// Hysteresis between the baseline program and the per-direction
// escalation programs. Escalation happens on a single congested cycle;
// returning to baseline needs `downgrade_cycles` clear cycles in a row.

use crate::types::{Config, ProgramId, BASELINE_PROGRAM};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Switch to the program favouring the direction at this priority index.
    Escalate { direction: usize },
    /// Clear streak reached the threshold, back to baseline.
    Downgrade,
    /// Nothing congested, streak still building (or already at baseline).
    ClearStreak,
    /// Mixed load, or the congested direction is already favoured.
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub next: ProgramId,
    pub outcome: Outcome,
    /// Value of the clear-cycle counter after this decision.
    pub clear_cycles: u32,
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    threshold: f64,
    downgrade_cycles: u32,
    /// Escalation program per direction, in priority order.
    programs: Vec<ProgramId>,
    clear_cycles: u32,
}

impl DecisionEngine {
    pub fn new(threshold: f64, downgrade_cycles: u32, programs: Vec<ProgramId>) -> Self {
        Self {
            threshold,
            downgrade_cycles,
            programs,
            clear_cycles: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.analysis.congestion_threshold,
            config.analysis.downgrade_cycles,
            config.directions.iter().map(|d| d.program).collect(),
        )
    }

    pub fn clear_cycles(&self) -> u32 {
        self.clear_cycles
    }

    /// Pure transition: depends only on `(current, clear_cycles, loads)`.
    /// `loads[i]` is the congestion value of direction `i`.
    pub fn evaluate(&self, current: ProgramId, loads: &[f64]) -> Decision {
        let congested: Vec<bool> = (0..self.programs.len())
            .map(|i| loads.get(i).copied().unwrap_or(0.0) > self.threshold)
            .collect();

        if let Some(direction) = (0..self.programs.len())
            .find(|&i| congested[i] && self.programs[i] != current)
        {
            return Decision {
                next: self.programs[direction],
                outcome: Outcome::Escalate { direction },
                clear_cycles: 0,
            };
        }

        if congested.iter().any(|&c| c) {
            return Decision {
                next: current,
                outcome: Outcome::Hold,
                clear_cycles: 0,
            };
        }

        let streak = self.clear_cycles.saturating_add(1);
        if streak >= self.downgrade_cycles && current != BASELINE_PROGRAM {
            Decision {
                next: BASELINE_PROGRAM,
                outcome: Outcome::Downgrade,
                clear_cycles: 0,
            }
        } else {
            Decision {
                next: current,
                outcome: Outcome::ClearStreak,
                clear_cycles: streak,
            }
        }
    }

    /// Evaluate and commit the counter. Exactly one transition at most.
    pub fn decide(&mut self, current: ProgramId, loads: &[f64]) -> Decision {
        let decision = self.evaluate(current, loads);
        debug!(
            "loads={:?}, thr={}, clear_cycles {} -> {}",
            loads, self.threshold, self.clear_cycles, decision.clear_cycles
        );
        self.clear_cycles = decision.clear_cycles;

        if decision.next != current {
            info!(
                "Decision: switch from {} to {} ({:?})",
                current, decision.next, decision.outcome
            );
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: ProgramId = 1;
    const B: ProgramId = 2;

    fn engine(downgrade_cycles: u32) -> DecisionEngine {
        DecisionEngine::new(5.0, downgrade_cycles, vec![A, B])
    }

    #[test]
    fn test_escalates_to_a() {
        let mut e = engine(3);
        assert_eq!(e.decide(0, &[8.0, 1.0]).next, A);
    }

    #[test]
    fn test_escalates_to_b() {
        let mut e = engine(3);
        assert_eq!(e.decide(0, &[1.0, 8.0]).next, B);
        assert_eq!(e.decide(A, &[1.0, 8.0]).next, B);
    }

    #[test]
    fn test_a_has_priority() {
        let mut e = engine(3);
        let d = e.decide(0, &[9.0, 9.0]);
        assert_eq!(d.next, A);
        assert_eq!(d.outcome, Outcome::Escalate { direction: 0 });
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut e = engine(3);
        let d = e.decide(0, &[5.0, 5.0]);
        assert_eq!(d.next, 0);
        assert_eq!(d.outcome, Outcome::ClearStreak);
    }

    #[test]
    fn test_evaluate_is_pure() {
        let e = engine(3);
        let first = e.evaluate(A, &[1.0, 1.0]);
        let second = e.evaluate(A, &[1.0, 1.0]);
        assert_eq!(first, second);
        assert_eq!(e.clear_cycles(), 0);
    }

    #[test]
    fn test_downgrade_after_streak() {
        let n = 4;
        let mut e = engine(n);
        for i in 1..n {
            let d = e.decide(A, &[0.0, 0.0]);
            assert_eq!(d.next, A);
            assert_eq!(e.clear_cycles(), i);
        }
        let d = e.decide(A, &[0.0, 0.0]);
        assert_eq!(d.next, 0);
        assert_eq!(d.outcome, Outcome::Downgrade);
        assert_eq!(e.clear_cycles(), 0);
    }

    #[test]
    fn test_congested_cycle_resets_streak() {
        let n = 3;
        let mut e = engine(n);
        let mut current = A;

        current = e.decide(current, &[0.0, 0.0]).next;
        current = e.decide(current, &[0.0, 0.0]).next;
        assert_eq!(e.clear_cycles(), 2);

        current = e.decide(current, &[9.0, 0.0]).next;
        assert_eq!(current, A);
        assert_eq!(e.clear_cycles(), 0);

        for _ in 0..n - 1 {
            current = e.decide(current, &[0.0, 0.0]).next;
        }
        assert_eq!(current, A);
    }

    #[test]
    fn test_escalation_resets_streak() {
        let mut e = engine(3);
        e.decide(0, &[0.0, 0.0]);
        e.decide(0, &[0.0, 0.0]);
        assert_eq!(e.clear_cycles(), 2);

        let d = e.decide(0, &[9.0, 0.0]);
        assert_eq!(d.next, A);
        assert_eq!(e.clear_cycles(), 0);

        assert_eq!(e.decide(A, &[0.0, 0.0]).next, A);
        assert_eq!(e.decide(A, &[0.0, 0.0]).next, A);
    }

    #[test]
    fn test_mixed_load_holds() {
        let mut e = engine(3);
        e.decide(B, &[0.0, 0.0]);
        let d = e.decide(B, &[0.0, 7.0]);
        assert_eq!(d.next, B);
        assert_eq!(d.outcome, Outcome::Hold);
        assert_eq!(e.clear_cycles(), 0);
    }

    #[test]
    fn test_baseline_never_downgrades() {
        let mut e = engine(2);
        for _ in 0..5 {
            let d = e.decide(0, &[0.0, 0.0]);
            assert_eq!(d.next, 0);
            assert_eq!(d.outcome, Outcome::ClearStreak);
        }
    }

    #[test]
    fn test_reference_scenario() {
        let mut e = engine(3);
        let mut current = 0;
        let cycles = [
            ((8.0, 1.0), A, 0),
            ((8.0, 1.0), A, 0),
            ((1.0, 1.0), A, 1),
            ((1.0, 1.0), A, 2),
            ((1.0, 1.0), 0, 0),
        ];
        for ((a, b), expected, counter) in cycles {
            current = e.decide(current, &[a, b]).next;
            assert_eq!(current, expected);
            assert_eq!(e.clear_cycles(), counter);
        }
    }
}
