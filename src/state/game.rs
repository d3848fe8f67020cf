use serde::{Deserialize, Serialize};

use crate::state::{
    analytics::AnalyticsState,
    state_machine::GamePhase,
    wheel::{self, HighLow, OddEven, PocketColor, optional_label},
};

/// Maximum number of recent results kept for display.
pub const RECENT_NUMBERS_CAP: usize = 5;
/// Countdown length assumed before the first capture.
pub const DEFAULT_TIME_REMAINING_MS: u64 = 120_000;
/// Wheel animation length assumed when the master omits it.
pub const DEFAULT_ANIMATION_DURATION_MS: u64 = 5_000;

/// One entry of the recent-results strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousNumber {
    /// Winning number.
    pub number: u8,
    /// Pocket colour of `number`.
    pub color: PocketColor,
    /// Zero-based slot, 0 being the newest.
    #[serde(default)]
    pub position: usize,
}

impl PreviousNumber {
    /// Build an entry, deriving the colour from the number.
    pub fn new(number: u8, position: usize) -> Self {
        Self {
            number,
            color: PocketColor::of(number),
            position,
        }
    }
}

/// Newest-first list of recent results, never longer than [`RECENT_NUMBERS_CAP`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PreviousNumber>", into = "Vec<PreviousNumber>")]
pub struct RecentNumbers(Vec<PreviousNumber>);

impl RecentNumbers {
    /// Build from raw numbers, newest first.
    pub fn from_numbers(numbers: impl IntoIterator<Item = u8>) -> Self {
        Self::from(
            numbers
                .into_iter()
                .enumerate()
                .map(|(position, number)| PreviousNumber::new(number, position))
                .collect::<Vec<_>>(),
        )
    }

    /// Insert a new result at the front, dropping the oldest beyond the cap.
    pub fn push_latest(&mut self, number: u8) {
        self.0.insert(0, PreviousNumber::new(number, 0));
        self.normalize();
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[PreviousNumber] {
        &self.0
    }

    /// Numbers only, newest first.
    pub fn numbers(&self) -> Vec<u8> {
        self.0.iter().map(|entry| entry.number).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no result has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&PreviousNumber> {
        self.0.first()
    }

    fn normalize(&mut self) {
        self.0.truncate(RECENT_NUMBERS_CAP);
        for (position, entry) in self.0.iter_mut().enumerate() {
            entry.position = position;
        }
    }
}

impl From<Vec<PreviousNumber>> for RecentNumbers {
    fn from(entries: Vec<PreviousNumber>) -> Self {
        let mut recent = Self(entries);
        recent.normalize();
        recent
    }
}

impl From<RecentNumbers> for Vec<PreviousNumber> {
    fn from(value: RecentNumbers) -> Self {
        value.0
    }
}

/// Replay parameters so a display can reproduce the spin without choosing the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WheelAnimation {
    /// Animation currently playing.
    pub is_active: bool,
    /// Pocket index the ball lands in.
    pub ball_landing_number: Option<usize>,
    /// Unix ms at which the spin began.
    pub animation_start_time: Option<u64>,
    /// Spin length in ms.
    pub animation_duration: u64,
}

impl Default for WheelAnimation {
    fn default() -> Self {
        Self {
            is_active: false,
            ball_landing_number: None,
            animation_start_time: None,
            animation_duration: DEFAULT_ANIMATION_DURATION_MS,
        }
    }
}

/// Result of the latest settled spin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpinResult {
    /// Winning number.
    pub winning_number: Option<u8>,
    /// Its pocket colour.
    pub color: Option<PocketColor>,
    /// `HIGH` / `LOW`, empty for zero.
    #[serde(with = "optional_label")]
    pub is_high_low: Option<HighLow>,
    /// `ODD` / `EVEN`, empty for zero.
    #[serde(with = "optional_label")]
    pub is_odd_even: Option<OddEven>,
    /// Unix ms when the result was revealed.
    pub result_display_time: Option<u64>,
}

impl SpinResult {
    /// Derive every category from the winning number.
    pub fn for_number(number: u8, display_time: u64) -> Self {
        Self {
            winning_number: Some(number),
            color: Some(PocketColor::of(number)),
            is_high_low: HighLow::of(number),
            is_odd_even: OddEven::of(number),
            result_display_time: Some(display_time),
        }
    }
}

/// Whether bets are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BettingState {
    /// Bets accepted.
    pub bets_allowed: bool,
    /// Unix ms at which betting closed.
    pub no_more_bets_time: Option<u64>,
}

impl Default for BettingState {
    fn default() -> Self {
        Self {
            bets_allowed: true,
            no_more_bets_time: None,
        }
    }
}

impl BettingState {
    /// Closed betting at `at`.
    pub fn closed(at: u64) -> Self {
        Self {
            bets_allowed: false,
            no_more_bets_time: Some(at),
        }
    }
}

/// The synchronized aggregate; the master owns it and clients hold replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameState {
    /// Last settled winning number.
    pub current_number: Option<u8>,
    /// Recent results, newest first, at most five.
    pub previous_numbers: RecentNumbers,
    /// Countdown to the next spin, in ms.
    pub time_remaining: u64,
    /// Wheel in motion.
    pub is_spinning: bool,
    /// Current phase of the round.
    pub game_phase: GamePhase,
    /// Unix ms of the last mutation.
    pub last_update: u64,
    /// Session of the authoritative display.
    pub master_id: Option<String>,
    /// Session of the display holding this copy.
    pub session_id: String,
    /// Wheel replay parameters.
    pub wheel_animation: WheelAnimation,
    /// Latest result.
    pub spin_result: SpinResult,
    /// Betting window.
    pub betting_state: BettingState,
    /// Analytics panel cache.
    pub analytics_state: AnalyticsState,
    /// Draw currently being played, when the backend reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_number: Option<u64>,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            current_number: None,
            previous_numbers: RecentNumbers::default(),
            time_remaining: DEFAULT_TIME_REMAINING_MS,
            is_spinning: false,
            game_phase: GamePhase::Betting,
            last_update: 0,
            master_id: None,
            session_id: String::new(),
            wheel_animation: WheelAnimation::default(),
            spin_result: SpinResult::default(),
            betting_state: BettingState::default(),
            analytics_state: AnalyticsState::default(),
            draw_number: None,
        }
    }
}

impl GameState {
    /// Fresh state for the display identified by `session_id`.
    pub fn new(session_id: impl Into<String>, now: u64) -> Self {
        Self {
            session_id: session_id.into(),
            last_update: now,
            ..Self::default()
        }
    }

    /// `MM:SS` rendering of [`GameState::time_remaining`].
    pub fn timer_text(&self) -> String {
        wheel::format_timer(self.time_remaining)
    }

    /// Record a settled result: current number, spin result and recent strip.
    pub fn record_result(&mut self, number: u8, now: u64) {
        self.spin_result = SpinResult::for_number(number, now);
        self.current_number = Some(number);
        self.previous_numbers.push_latest(number);
        self.last_update = now;
    }
}
