// SPDX-License-Identifier: GPL-3.0-only

//! Orientation and dimension watcher
//!
//! Rotating a phone changes the camera's frame size a few frames after the
//! orientation signal, and readings jitter while the sensor reconfigures. The
//! watcher polls the track's dimensions as a bounded state machine:
//!
//! ```text
//! Polling(attempt, last, stable_count) ──► Settled(dimensions)
//!                  │
//!                  └──────────────────────► Unsettled
//! ```
//!
//! A change counts only after `required_stable_readings` identical readings
//! that differ from the last known-good dimensions. A settled change bumps the
//! reapply counter so the controller rebuilds the pipeline at the new size.

use crate::backends::track::TrackHandle;
use crate::constants::orientation::{MAX_ATTEMPTS, POLL_INTERVAL, REQUIRED_STABLE_READINGS};
use crate::media::frame::Dimensions;
use crate::pipelines::session::SessionContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Polling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityConfig {
    pub poll_interval: Duration,
    pub required_stable_readings: u32,
    pub max_attempts: u32,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            required_stable_readings: REQUIRED_STABLE_READINGS,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// State of one bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling {
        attempt: u32,
        last: Option<Dimensions>,
        stable_count: u32,
    },
    /// Dimensions settled on a value different from the baseline
    Settled(Dimensions),
    /// Attempts ran out without a settled change
    Unsettled,
}

impl PollState {
    pub fn is_done(&self) -> bool {
        !matches!(self, PollState::Polling { .. })
    }
}

/// Tracks the last known-good frame dimensions of a track
#[derive(Debug, Clone)]
pub struct DimensionWatcher {
    config: StabilityConfig,
    baseline: Option<Dimensions>,
}

impl DimensionWatcher {
    pub fn new(config: StabilityConfig, baseline: Option<Dimensions>) -> Self {
        Self {
            config: StabilityConfig {
                required_stable_readings: config.required_stable_readings.max(1),
                max_attempts: config.max_attempts.max(1),
                ..config
            },
            baseline,
        }
    }

    pub fn baseline(&self) -> Option<Dimensions> {
        self.baseline
    }

    pub fn config(&self) -> &StabilityConfig {
        &self.config
    }

    /// Initial state of a poll
    pub fn begin(&self) -> PollState {
        PollState::Polling {
            attempt: 0,
            last: None,
            stable_count: 0,
        }
    }

    /// Advance a poll by one reading
    pub fn step(&self, state: PollState, reading: Option<Dimensions>) -> PollState {
        let PollState::Polling {
            attempt,
            last,
            stable_count,
        } = state
        else {
            return state;
        };

        let attempt = attempt + 1;
        let stable_count = match reading {
            Some(_) if reading == last => stable_count + 1,
            Some(_) => 1,
            None => 0,
        };

        match reading {
            Some(dims)
                if stable_count >= self.config.required_stable_readings
                    && Some(dims) != self.baseline =>
            {
                PollState::Settled(dims)
            }
            _ if attempt >= self.config.max_attempts => PollState::Unsettled,
            _ => PollState::Polling {
                attempt,
                last: reading,
                stable_count,
            },
        }
    }

    /// Poll the track until its dimensions settle or attempts run out
    ///
    /// Returns the new dimensions on a settled change and adopts them as the
    /// baseline.
    pub async fn poll(&mut self, track: &dyn TrackHandle) -> Option<Dimensions> {
        let mut state = self.begin();
        loop {
            state = self.step(state, track.frame_dimensions());
            match state {
                PollState::Settled(dims) => {
                    info!(from = ?self.baseline, to = %dims, "Frame dimensions settled");
                    self.baseline = Some(dims);
                    return Some(dims);
                }
                PollState::Unsettled => {
                    debug!(
                        attempts = self.config.max_attempts,
                        "Frame dimensions did not change"
                    );
                    return None;
                }
                PollState::Polling { .. } => {
                    if !track.is_live() {
                        return None;
                    }
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

/// Turn orientation signals into bounded dimension polls
///
/// Only runs on mobile devices; returns `None` elsewhere. Signals that arrive
/// during a poll are coalesced into it. The task ends when the signal sender
/// is dropped.
pub fn spawn_orientation_listener(
    session: Arc<SessionContext>,
    track: Arc<dyn TrackHandle>,
    mut signals: mpsc::Receiver<()>,
) -> Option<JoinHandle<()>> {
    if !session.device().is_mobile {
        debug!("Not a mobile device, orientation listener not started");
        return None;
    }

    let mut watcher = DimensionWatcher::new(session.settings().stability, track.frame_dimensions());
    Some(tokio::spawn(async move {
        while signals.recv().await.is_some() {
            if let Some(dims) = watcher.poll(track.as_ref()).await {
                debug!(dimensions = %dims, "Requesting pipeline rebuild");
                session.request_reapply();
            }
            while signals.try_recv().is_ok() {}
        }
        debug!("Orientation listener stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VGA: Dimensions = Dimensions {
        width: 640,
        height: 480,
    };
    const HD: Dimensions = Dimensions {
        width: 1280,
        height: 720,
    };

    fn watcher(required: u32, max_attempts: u32) -> DimensionWatcher {
        DimensionWatcher::new(
            StabilityConfig {
                poll_interval: Duration::from_millis(1),
                required_stable_readings: required,
                max_attempts,
            },
            Some(VGA),
        )
    }

    fn run(watcher: &DimensionWatcher, readings: &[Option<Dimensions>]) -> Vec<PollState> {
        let mut state = watcher.begin();
        readings
            .iter()
            .map(|&reading| {
                state = watcher.step(state, reading);
                state
            })
            .collect()
    }

    #[test]
    fn settles_after_required_identical_readings() {
        let w = watcher(3, 30);
        let states = run(&w, &[Some(VGA), Some(VGA), Some(VGA), Some(HD), Some(HD), Some(HD)]);
        assert!(states[..5].iter().all(|s| !s.is_done()));
        assert_eq!(states[5], PollState::Settled(HD));
    }

    #[test]
    fn jitter_resets_the_stable_count() {
        let w = watcher(2, 30);
        let states = run(&w, &[Some(HD), Some(VGA), Some(HD), None, Some(HD), Some(HD)]);
        assert!(states[..5].iter().all(|s| !s.is_done()));
        assert_eq!(states[5], PollState::Settled(HD));
    }

    #[test]
    fn unchanged_dimensions_never_settle() {
        let w = watcher(2, 4);
        let states = run(&w, &[Some(VGA); 4]);
        assert_eq!(states[3], PollState::Unsettled);
    }

    #[test]
    fn finished_states_are_terminal() {
        let w = watcher(1, 5);
        assert_eq!(w.step(PollState::Unsettled, Some(HD)), PollState::Unsettled);
        assert_eq!(w.step(PollState::Settled(HD), Some(VGA)), PollState::Settled(HD));
    }
}
