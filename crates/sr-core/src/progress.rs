//! Weighted completed-units-over-total-units progress.
//!
//! Each phase owns a fixed share of the bar; inside a phase progress moves
//! by whole units (one image, one clip, one assembly step). Units only ever
//! complete, so the percentage never decreases. A running job is capped
//! below 100; only the completion update reports [`COMPLETE`].

use crate::job::Phase;

pub const COMPLETE: f32 = 100.0;
pub const MAX_RUNNING: f32 = 99.0;

pub fn weight(phase: Phase) -> f32 {
    match phase {
        Phase::Speech => 10.0,
        Phase::Prompts => 5.0,
        Phase::Images => 30.0,
        Phase::Clips => 45.0,
        Phase::Assembly => 10.0,
    }
}

fn slot(phase: Phase) -> usize {
    match phase {
        Phase::Speech => 0,
        Phase::Prompts => 1,
        Phase::Images => 2,
        Phase::Clips => 3,
        Phase::Assembly => 4,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressTracker {
    totals: [usize; 5],
    done: [usize; 5],
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            totals: [1; 5],
            done: [0; 5],
        }
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size a phase before any of its units complete.
    pub fn set_total(&mut self, phase: Phase, units: usize) {
        let i = slot(phase);
        self.totals[i] = units.max(1).max(self.done[i]);
    }

    pub fn complete_unit(&mut self, phase: Phase) -> f32 {
        let i = slot(phase);
        if self.done[i] < self.totals[i] {
            self.done[i] += 1;
        }
        self.percent()
    }

    pub fn done(&self, phase: Phase) -> usize {
        self.done[slot(phase)]
    }

    pub fn percent(&self) -> f32 {
        let raw: f32 = Phase::ALL
            .iter()
            .map(|&phase| {
                let i = slot(phase);
                weight(phase) * self.done[i] as f32 / self.totals[i] as f32
            })
            .sum();
        raw.min(MAX_RUNNING)
    }
}
