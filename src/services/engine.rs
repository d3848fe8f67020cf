//! Autonomous round loop of a master display.
//!
//! The engine only renders; whoever observes the surface turns its changes
//! into sync messages. Client displays suppress it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rand::Rng;
use tokio::{
    sync::Mutex,
    time::{MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    config::RoundConfig,
    display::{DisplayResult, DisplaySurface, ResultView, WheelLanding},
    dto::now_millis,
    services::forced_number::OverrideTracker,
    state::{
        analytics::{AnalyticsData, trim_spin_log},
        game::RecentNumbers,
        state_machine::GamePhase,
        wheel::{self, MAX_NUMBER},
    },
};

/// Countdown, spin, reveal, repeat.
pub struct RoundEngine {
    display: Arc<dyn DisplaySurface>,
    overrides: Arc<OverrideTracker>,
    timings: RoundConfig,
    warning_threshold_secs: u64,
    suppressed: AtomicBool,
    history: Mutex<RecentNumbers>,
    spin_log: Mutex<Vec<u8>>,
}

impl RoundEngine {
    /// Engine drawing on `display`; the roll history starts from what the
    /// display already shows.
    pub fn new(
        display: Arc<dyn DisplaySurface>,
        overrides: Arc<OverrideTracker>,
        timings: RoundConfig,
        warning_threshold_secs: u64,
    ) -> Self {
        let history = display
            .roll_history()
            .map(RecentNumbers::from_numbers)
            .unwrap_or_else(|err| {
                warn!(error = %err, "roll history unreadable; starting empty");
                RecentNumbers::default()
            });
        let spin_log = history.numbers().into_iter().rev().collect();
        Self {
            display,
            overrides,
            timings,
            warning_threshold_secs,
            suppressed: AtomicBool::new(false),
            history: Mutex::new(history),
            spin_log: Mutex::new(spin_log),
        }
    }

    /// Disable every local decision; this display only mirrors.
    pub fn suppress(&self) {
        if !self.suppressed.swap(true, Ordering::SeqCst) {
            info!("local round engine suppressed");
        }
    }

    /// Whether [`RoundEngine::suppress`] was called.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Replace the spin log (oldest first) and redraw the analytics panels.
    pub async fn load_spin_log(&self, spins: Vec<u8>) -> AnalyticsData {
        let data = AnalyticsData::from_spins(&spins);
        *self.spin_log.lock().await = data.all_spins.clone();
        self.render(self.display.set_analytics_data(&data));
        data
    }

    /// Play rounds until suppressed.
    pub async fn run(self: Arc<Self>) {
        while !self.is_suppressed() {
            self.play_round().await;
        }
        debug!("round loop stopped");
    }

    /// One full round: countdown, spin, reveal, back to betting.
    pub async fn play_round(&self) {
        if self.skip("round") {
            return;
        }
        self.render(self.display.set_game_phase(GamePhase::Betting));
        self.render(self.display.set_betting_enabled(true));

        self.countdown().await;
        if self.skip("spin") {
            return;
        }
        let number = self.spin().await;
        if self.skip("result") {
            return;
        }
        self.reveal(number).await;
    }

    async fn countdown(&self) {
        let total = self.timings.round_duration.as_secs();
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for remaining in (0..=total).rev() {
            ticker.tick().await;
            if self.skip("countdown") {
                return;
            }
            let text = wheel::format_timer(remaining * 1000);
            let warning = remaining <= self.warning_threshold_secs;
            self.render(self.display.set_timer_text(&text, warning));
        }
    }

    async fn spin(&self) -> u8 {
        self.render(self.display.activate_spin_control());
        self.render(self.display.set_betting_enabled(false));
        self.render(self.display.set_game_phase(GamePhase::Spinning));

        let proposed = rand::rng().random_range(0..=MAX_NUMBER);
        let number = self.overrides.provider().winning_number(proposed);
        let duration = self.timings.wheel_animation_duration;
        let landing = WheelLanding::for_number(number, now_millis(), duration.as_millis() as u64);
        debug!(number, pocket = landing.pocket, "wheel spinning");
        self.render(self.display.show_wheel(landing));

        sleep(duration).await;
        number
    }

    async fn reveal(&self, spun: u8) {
        // an override issued mid-spin still decides the revealed number
        let number = self.overrides.provider().winning_number(spun);
        if number != spun {
            debug!(spun, number, "override applied during spin");
        }

        self.render(self.display.hide_wheel());
        self.render(self.display.set_game_phase(GamePhase::Results));

        let history = {
            let mut history = self.history.lock().await;
            history.push_latest(number);
            history.clone()
        };
        let data = {
            let mut spin_log = self.spin_log.lock().await;
            spin_log.push(number);
            trim_spin_log(&mut spin_log);
            AnalyticsData::from_spins(&spin_log)
        };
        self.render(self.display.set_roll_history(&history));
        self.render(self.display.set_analytics_data(&data));
        self.render(self.display.show_result(&ResultView::for_number(number)));
        info!(number, color = %wheel::PocketColor::of(number), "round settled");

        sleep(self.timings.result_display_duration).await;
        self.render(self.display.hide_result());
        self.render(self.display.set_game_phase(GamePhase::Betting));
        self.render(self.display.set_betting_enabled(true));
    }

    fn skip(&self, step: &'static str) -> bool {
        let suppressed = self.is_suppressed();
        if suppressed {
            debug!(step, "suppressed local round step");
        }
        suppressed
    }

    fn render(&self, result: DisplayResult) {
        if let Err(err) = result {
            warn!(error = %err, "display update skipped");
        }
    }
}
