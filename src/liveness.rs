// Liveness clock for the watched scheduler
//
// The probe stamps `last_alive_at` every time it gets a turn; the checker
// compares the gap against the freeze and hard thresholds. Only a probe
// stamp can end a freeze episode.

use serde::Serialize;

/// Stall thresholds in milliseconds (both compared with a strict `>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub freeze_timeout_ms: u64,
    pub hard_timeout_ms: u64,
}

/// What a checker tick concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Gap is within tolerance
    Responsive,
    /// RESPONSIVE -> FROZEN happened on this tick
    FreezeDetected,
    /// Was already frozen before this tick
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Check {
    pub elapsed_ms: u64,
    pub verdict: Verdict,
    /// Frozen and past the hard threshold; recovery is due if the guard allows
    pub hard_stall: bool,
}

/// A freeze episode closed by a probe stamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedEpisode {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl ClosedEpisode {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Point-in-time copy of the liveness clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LivenessView {
    pub last_alive_ms: u64,
    pub responsive: bool,
    pub frozen_since_ms: Option<u64>,
    pub elapsed_ms: u64,
}

/// `frozen_since` is `Some` exactly when `responsive` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessState {
    last_alive_at: u64,
    responsive: bool,
    frozen_since: Option<u64>,
}

impl LivenessState {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_alive_at: now_ms,
            responsive: true,
            frozen_since: None,
        }
    }

    /// Re-arm after a restart
    pub fn reset(&mut self, now_ms: u64) {
        *self = Self::new(now_ms);
    }

    /// Probe stamp. Returns the closed episode if this stamp ended a freeze.
    pub fn mark_alive(&mut self, now_ms: u64) -> Option<ClosedEpisode> {
        self.last_alive_at = now_ms;

        if self.responsive {
            return None;
        }

        self.responsive = true;
        self.frozen_since.take().map(|start_ms| ClosedEpisode {
            start_ms,
            end_ms: now_ms,
        })
    }

    /// Checker tick
    pub fn evaluate(&mut self, now_ms: u64, thresholds: Thresholds) -> Check {
        let elapsed_ms = now_ms.saturating_sub(self.last_alive_at);

        let verdict = if !self.responsive {
            Verdict::Frozen
        } else if elapsed_ms > thresholds.freeze_timeout_ms {
            self.responsive = false;
            self.frozen_since = Some(self.last_alive_at);
            Verdict::FreezeDetected
        } else {
            Verdict::Responsive
        };

        Check {
            elapsed_ms,
            verdict,
            hard_stall: !self.responsive && elapsed_ms > thresholds.hard_timeout_ms,
        }
    }

    pub fn is_responsive(&self) -> bool {
        self.responsive
    }

    pub fn last_alive_at(&self) -> u64 {
        self.last_alive_at
    }

    pub fn frozen_since(&self) -> Option<u64> {
        self.frozen_since
    }

    pub fn view(&self, now_ms: u64) -> LivenessView {
        LivenessView {
            last_alive_ms: self.last_alive_at,
            responsive: self.responsive,
            frozen_since_ms: self.frozen_since,
            elapsed_ms: now_ms.saturating_sub(self.last_alive_at),
        }
    }

    /// Get liveness status as a string for diagnostics
    pub fn status_line(&self, now_ms: u64, thresholds: Thresholds) -> String {
        format!(
            "last alive: {}ms ago (freeze: {}ms, hard: {}ms), responsive: {}{}",
            now_ms.saturating_sub(self.last_alive_at),
            thresholds.freeze_timeout_ms,
            thresholds.hard_timeout_ms,
            self.responsive,
            match self.frozen_since {
                Some(since) => format!(", frozen for {}ms", now_ms.saturating_sub(since)),
                None => String::new(),
            }
        )
    }
}
