//! Operator-forced winning numbers.
//!
//! Every node polls the backend independently of its role. The current
//! [`OverrideMode`] selects the [`WinningNumberProvider`] the round engine
//! asks for outcomes, and the client coordinator pins incoming results to it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{BackendError, GameBackend},
    state::{
        game::{GameState, SpinResult},
        manual_override::{ManualOverride, OverrideMode},
        state_machine::GamePhase,
        wheel::{self, PocketColor},
    },
};

/// Decides the outcome of a spin.
pub trait WinningNumberProvider: Send + Sync {
    /// Outcome given what the wheel would have produced.
    fn winning_number(&self, proposed: u8) -> u8;
    /// Whether outcomes are forced.
    fn is_forced(&self) -> bool;
}

/// The wheel decides.
pub struct AutomaticProvider;

impl WinningNumberProvider for AutomaticProvider {
    fn winning_number(&self, proposed: u8) -> u8 {
        proposed
    }

    fn is_forced(&self) -> bool {
        false
    }
}

/// The operator decides.
pub struct ManualProvider {
    number: u8,
}

impl WinningNumberProvider for ManualProvider {
    fn winning_number(&self, _proposed: u8) -> u8 {
        self.number
    }

    fn is_forced(&self) -> bool {
        true
    }
}

/// Per-node override state machine: `Automatic` or `Manual(number, color, draw)`.
pub struct OverrideTracker {
    mode: watch::Sender<OverrideMode>,
    draw: watch::Sender<Option<u64>>,
}

impl OverrideTracker {
    /// Start in automatic mode.
    pub fn new() -> Self {
        let (mode, _rx) = watch::channel(OverrideMode::Automatic);
        let (draw, _rx) = watch::channel(None);
        Self { mode, draw }
    }

    /// Current mode.
    pub fn mode(&self) -> OverrideMode {
        self.mode.borrow().clone()
    }

    /// Latest draw number any report carried.
    pub fn draw_number(&self) -> Option<u64> {
        *self.draw.borrow()
    }

    /// Watch mode changes.
    pub fn subscribe(&self) -> watch::Receiver<OverrideMode> {
        self.mode.subscribe()
    }

    /// Fold a backend report into the state machine. Returns whether the mode
    /// changed; reapplying the same report is a no-op.
    pub fn apply(&self, report: ManualOverride) -> bool {
        if report.draw_number.is_some() {
            self.draw.send_replace(report.draw_number);
        }
        let next = match report.active_number() {
            Some(number) => OverrideMode::Manual {
                number,
                color: report.forced_color.unwrap_or_else(|| PocketColor::of(number)),
                draw_number: report.draw_number,
            },
            None => OverrideMode::Automatic,
        };

        let changed = self.mode.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });

        if changed {
            match &next {
                OverrideMode::Manual {
                    number,
                    color,
                    draw_number,
                } => info!(number, %color, draw = ?draw_number, "manual winning number active"),
                OverrideMode::Automatic => {
                    info!(draw = ?report.draw_number, "automatic mode restored")
                }
            }
        }
        changed
    }

    /// Provider matching the current mode.
    pub fn provider(&self) -> Arc<dyn WinningNumberProvider> {
        match self.mode.borrow().forced_number() {
            Some(number) => Arc::new(ManualProvider { number }),
            None => Arc::new(AutomaticProvider),
        }
    }

    /// Pin the result and landing slot of an in-flight spin to the forced
    /// number. Returns whether `state` was rewritten.
    pub fn enforce(&self, state: &mut GameState) -> bool {
        let Some(number) = self.mode.borrow().forced_number() else {
            return false;
        };

        let mut rewritten = false;
        if state.game_phase != GamePhase::Betting {
            let landing = wheel::pocket_index(number);
            if state.wheel_animation.ball_landing_number.is_some()
                && state.wheel_animation.ball_landing_number != Some(landing)
            {
                state.wheel_animation.ball_landing_number = Some(landing);
                rewritten = true;
            }
        }
        if state.game_phase == GamePhase::Results
            && state.spin_result.winning_number.is_some()
            && state.spin_result.winning_number != Some(number)
        {
            let display_time = state.spin_result.result_display_time.unwrap_or(state.last_update);
            state.spin_result = SpinResult::for_number(number, display_time);
            state.current_number = Some(number);
            rewritten = true;
        }
        rewritten
    }
}

impl Default for OverrideTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic backend check feeding an [`OverrideTracker`].
pub struct ForcedNumberPoller {
    tracker: Arc<OverrideTracker>,
    backend: Arc<dyn GameBackend>,
    period: Duration,
    paused: watch::Sender<bool>,
    healthy: AtomicBool,
}

impl ForcedNumberPoller {
    /// Poll `backend` every `period`.
    pub fn new(tracker: Arc<OverrideTracker>, backend: Arc<dyn GameBackend>, period: Duration) -> Self {
        let (paused, _rx) = watch::channel(false);
        Self {
            tracker,
            backend,
            period,
            paused,
            healthy: AtomicBool::new(true),
        }
    }

    /// Whether the last check reached a backend endpoint.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Stop polling until [`ForcedNumberPoller::resume`].
    pub fn pause(&self) {
        if !self.paused.send_replace(true) {
            debug!("forced-number polling paused");
        }
    }

    /// Resume polling; the next check runs immediately.
    pub fn resume(&self) {
        if self.paused.send_replace(false) {
            debug!("forced-number polling resumed");
        }
    }

    /// One check: primary endpoint, then fallback. Returns whether the mode changed.
    pub async fn poll_once(&self) -> bool {
        let report = match self.backend.fetch_primary_override().await {
            Ok(report) => Ok(report),
            Err(err) => {
                log_failure(&err, "primary forced-number check failed; trying fallback");
                self.backend.fetch_fallback_override().await
            }
        };

        match report {
            Ok(report) => {
                self.healthy.store(true, Ordering::Relaxed);
                self.tracker.apply(report)
            }
            Err(err) => {
                self.healthy.store(false, Ordering::Relaxed);
                log_failure(&err, "forced-number check failed; keeping cached override");
                false
            }
        }
    }

    /// Poll until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut paused = self.paused.subscribe();

        loop {
            ticker.tick().await;
            let is_paused = *paused.borrow_and_update();
            if is_paused {
                if paused.wait_for(|paused| !*paused).await.is_err() {
                    return;
                }
                ticker.reset();
            }
            self.poll_once().await;
        }
    }
}

fn log_failure(err: &BackendError, message: &'static str) {
    if matches!(err, BackendError::MissingEndpoint { .. }) {
        debug!(error = %err, message);
    } else {
        warn!(error = %err, message);
    }
}
