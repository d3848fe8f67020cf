//! Rendering surface of a display node.
//!
//! [`DisplaySurface`] stands where the page DOM stood: the round engine and
//! the client coordinator render through it, and the master reads its
//! current content back when capturing state.

pub mod observer;
pub mod scene;

use serde::Serialize;
use thiserror::Error;

use crate::state::{
    analytics::{AnalyticsData, AnalyticsVisibility},
    game::RecentNumbers,
    state_machine::GamePhase,
    wheel::{self, HighLow, OddEven, PocketColor},
};

/// Identifiers of the elements a surface exposes.
pub mod elements {
    /// Countdown text.
    pub const TIMER: &str = "timer";
    /// Spin trigger control.
    pub const SPIN_CONTROL: &str = "spin-control";
    /// Betting inputs.
    pub const BETTING_AREA: &str = "betting-area";
    /// Root node carrying `data-game-phase`.
    pub const GAME_ROOT: &str = "game-root";
    /// Wheel and ball container.
    pub const WHEEL: &str = "wheel";
    /// Result alert.
    pub const RESULT_ALERT: &str = "result-alert";
    /// Recent results strip.
    pub const ROLL_HISTORY: &str = "roll-history";
    /// Analytics side panels.
    pub const ANALYTICS_PANELS: &str = "analytics-panels";
}

/// Raised when an expected element is absent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    /// The element is not present on the surface.
    #[error("display element `{0}` not found")]
    MissingElement(&'static str),
}

/// Result alias for display operations.
pub type DisplayResult<T = ()> = Result<T, DisplayError>;

/// Parameters of one wheel spin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelLanding {
    /// Number the ball lands on.
    pub winning_number: u8,
    /// Index of that number in the wheel layout.
    pub pocket: usize,
    /// Final rotation of the ball container.
    pub degrees: f64,
    /// Unix ms at which the spin started.
    pub start_time: u64,
    /// Spin length in ms.
    pub duration: u64,
}

impl WheelLanding {
    /// Landing parameters for `number`.
    pub fn for_number(number: u8, start_time: u64, duration: u64) -> Self {
        let pocket = wheel::pocket_index(number);
        Self {
            winning_number: number,
            pocket,
            degrees: wheel::landing_degrees(pocket),
            start_time,
            duration,
        }
    }
}

/// Text and styling of the result alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    /// Winning number.
    pub number: u8,
    /// Its colour.
    pub color: PocketColor,
    /// High/low label, `None` for zero.
    #[serde(serialize_with = "crate::state::wheel::optional_label::serialize")]
    pub high_low: Option<HighLow>,
    /// Odd/even label, `None` for zero.
    #[serde(serialize_with = "crate::state::wheel::optional_label::serialize")]
    pub odd_even: Option<OddEven>,
}

impl ResultView {
    /// Derive every label from `number`.
    pub fn for_number(number: u8) -> Self {
        Self {
            number,
            color: PocketColor::of(number),
            high_low: HighLow::of(number),
            odd_even: OddEven::of(number),
        }
    }
}

/// Everything a display node can draw or read back.
pub trait DisplaySurface: Send + Sync {
    /// Replace the countdown text; `warning` toggles the low-time style.
    fn set_timer_text(&self, text: &str, warning: bool) -> DisplayResult;
    /// Press the spin trigger control.
    fn activate_spin_control(&self) -> DisplayResult;
    /// Enable or dim betting inputs and the spin control.
    fn set_betting_enabled(&self, enabled: bool) -> DisplayResult;
    /// Set the `data-game-phase` attribute.
    fn set_game_phase(&self, phase: GamePhase) -> DisplayResult;
    /// Show the wheel and start the spin animation.
    fn show_wheel(&self, landing: WheelLanding) -> DisplayResult;
    /// Hide the wheel.
    fn hide_wheel(&self) -> DisplayResult;
    /// Show the result alert.
    fn show_result(&self, result: &ResultView) -> DisplayResult;
    /// Hide the result alert.
    fn hide_result(&self) -> DisplayResult;
    /// Redraw the recent results strip.
    fn set_roll_history(&self, history: &RecentNumbers) -> DisplayResult;
    /// Show or hide analytics panels.
    fn set_analytics_visibility(&self, visibility: AnalyticsVisibility) -> DisplayResult;
    /// Replace analytics values and markup.
    fn set_analytics_data(&self, data: &AnalyticsData) -> DisplayResult;

    /// Current countdown text.
    fn timer_text(&self) -> DisplayResult<String>;
    /// Numbers shown in the recent results strip, newest first.
    fn roll_history(&self) -> DisplayResult<Vec<u8>>;
    /// Current analytics panel visibility.
    fn analytics_visibility(&self) -> DisplayResult<AnalyticsVisibility>;
}
