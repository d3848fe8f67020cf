use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use crate::{
    dto::{
        now_millis,
        validation::{validate_client_id, validate_pocket_index, validate_winning_number},
    },
    state::{
        analytics::{AnalyticsData, AnalyticsState, AnalyticsVisibility},
        game::{BettingState, GameState, RecentNumbers},
        state_machine::GamePhase,
        wheel::{HighLow, OddEven, PocketColor, optional_label},
    },
};

/// Messages exchanged between displays, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SyncMessage {
    /// A client display came online.
    ClientConnect { client_id: String },
    /// Periodic liveness signal from a client.
    ClientHeartbeat { client_id: String },
    /// A client asks for an immediate full state.
    RequestState { client_id: String },
    /// A client asks for an analytics snapshot.
    AnalyticsSyncRequest { client_id: String },
    /// Full state, the reconciliation message.
    GameState { game_state: Box<GameState> },
    /// Countdown tick.
    TimerUpdate {
        time_remaining: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timer_text: Option<String>,
    },
    /// Spin triggered; betting closes.
    SpinStart {
        #[serde(default = "spinning_phase")]
        game_phase: GamePhase,
        #[serde(default = "closed_betting")]
        betting_state: BettingState,
    },
    /// Wheel replay parameters.
    WheelAnimation {
        winning_number: u8,
        ball_landing_number: usize,
        animation_start_time: u64,
        animation_duration: u64,
    },
    /// Settled result and the refreshed recent strip.
    SpinResult {
        winning_number: u8,
        color: PocketColor,
        #[serde(default, with = "optional_label")]
        is_high_low: Option<HighLow>,
        #[serde(default, with = "optional_label")]
        is_odd_even: Option<OddEven>,
        #[serde(default)]
        previous_numbers: RecentNumbers,
    },
    /// Phase moved outside a spin (typically back to betting).
    GamePhaseChange {
        phase: GamePhase,
        #[serde(default)]
        betting_state: BettingState,
    },
    /// Betting window closed.
    NoMoreBets,
    /// Analytics panels shown or hidden.
    AnalyticsVisibility {
        panels_visible: bool,
        left_sidebar_visible: bool,
        right_sidebar_visible: bool,
    },
    /// Analytics statistics changed.
    AnalyticsData { analytics_data: AnalyticsData },
    /// Statistics and visibility in one message.
    AnalyticsFullSync {
        analytics_data: AnalyticsData,
        panels_visible: bool,
        left_sidebar_visible: bool,
        right_sidebar_visible: bool,
        #[serde(default)]
        last_analytics_update: Option<u64>,
    },
    /// Master liveness signal.
    MasterHeartbeat {
        master_id: String,
        connected_clients: usize,
    },
    /// Any `type` this build does not understand.
    #[serde(other)]
    Unknown,
}

fn spinning_phase() -> GamePhase {
    GamePhase::Spinning
}

fn closed_betting() -> BettingState {
    BettingState {
        bets_allowed: false,
        no_more_bets_time: None,
    }
}

impl SyncMessage {
    /// Wire name of the message, also used as SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::ClientConnect { .. } => "client_connect",
            SyncMessage::ClientHeartbeat { .. } => "client_heartbeat",
            SyncMessage::RequestState { .. } => "request_state",
            SyncMessage::AnalyticsSyncRequest { .. } => "analytics_sync_request",
            SyncMessage::GameState { .. } => "game_state",
            SyncMessage::TimerUpdate { .. } => "timer_update",
            SyncMessage::SpinStart { .. } => "spin_start",
            SyncMessage::WheelAnimation { .. } => "wheel_animation",
            SyncMessage::SpinResult { .. } => "spin_result",
            SyncMessage::GamePhaseChange { .. } => "game_phase_change",
            SyncMessage::NoMoreBets => "no_more_bets",
            SyncMessage::AnalyticsVisibility { .. } => "analytics_visibility",
            SyncMessage::AnalyticsData { .. } => "analytics_data",
            SyncMessage::AnalyticsFullSync { .. } => "analytics_full_sync",
            SyncMessage::MasterHeartbeat { .. } => "master_heartbeat",
            SyncMessage::Unknown => "unknown",
        }
    }

    /// Build an `analytics_visibility` message.
    pub fn analytics_visibility(visibility: AnalyticsVisibility) -> Self {
        SyncMessage::AnalyticsVisibility {
            panels_visible: visibility.panels_visible,
            left_sidebar_visible: visibility.left_sidebar_visible,
            right_sidebar_visible: visibility.right_sidebar_visible,
        }
    }

    /// Build an `analytics_full_sync` message from the analytics sub-state.
    pub fn analytics_full_sync(analytics: &AnalyticsState) -> Self {
        SyncMessage::AnalyticsFullSync {
            analytics_data: analytics.analytics_data.clone(),
            panels_visible: analytics.panels_visible,
            left_sidebar_visible: analytics.left_sidebar_visible,
            right_sidebar_visible: analytics.right_sidebar_visible,
            last_analytics_update: analytics.last_analytics_update,
        }
    }

    /// Build a `spin_result` message for `number` with every category derived.
    pub fn spin_result(number: u8, previous_numbers: RecentNumbers) -> Self {
        SyncMessage::SpinResult {
            winning_number: number,
            color: PocketColor::of(number),
            is_high_low: HighLow::of(number),
            is_odd_even: OddEven::of(number),
            previous_numbers,
        }
    }
}

impl Validate for SyncMessage {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match self {
            SyncMessage::ClientConnect { client_id }
            | SyncMessage::ClientHeartbeat { client_id }
            | SyncMessage::RequestState { client_id }
            | SyncMessage::AnalyticsSyncRequest { client_id } => {
                if let Err(e) = validate_client_id(client_id) {
                    errors.add("client_id", e);
                }
            }
            SyncMessage::WheelAnimation {
                winning_number,
                ball_landing_number,
                ..
            } => {
                if let Err(e) = validate_winning_number(*winning_number) {
                    errors.add("winning_number", e);
                }
                if let Err(e) = validate_pocket_index(*ball_landing_number) {
                    errors.add("ball_landing_number", e);
                }
            }
            SyncMessage::SpinResult {
                winning_number,
                previous_numbers,
                ..
            } => {
                if let Err(e) = validate_winning_number(*winning_number) {
                    errors.add("winning_number", e);
                }
                for number in previous_numbers.numbers() {
                    if let Err(e) = validate_winning_number(number) {
                        errors.add("previous_numbers", e);
                    }
                }
            }
            SyncMessage::GameState { game_state } => {
                if let Some(Err(e)) = game_state.current_number.map(validate_winning_number) {
                    errors.add("current_number", e);
                }
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A message as it travels on the channel: payload plus timestamp and sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The message itself; its fields sit next to `timestamp` on the wire.
    #[serde(flatten)]
    pub message: SyncMessage,
    /// Unix ms at send time.
    #[serde(default)]
    pub timestamp: u64,
    /// Channel endpoint that published the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Envelope {
    /// Stamp `message` with the current time.
    pub fn new(message: SyncMessage) -> Self {
        Self {
            message,
            timestamp: now_millis(),
            origin: None,
        }
    }

    /// Tag the envelope with the publishing endpoint.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Decode an envelope from raw JSON text.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spin_result_scenario_decodes() {
        let envelope = Envelope::from_json_str(
            r#"{"type":"spin_result","winningNumber":17,"color":"black","isHighLow":"LOW",
                "isOddEven":"ODD","previousNumbers":[{"number":17,"color":"black"},
                {"number":0,"color":"green"}],"timestamp":5}"#,
        )
        .unwrap();

        assert_eq!(envelope.timestamp, 5);
        match envelope.message {
            SyncMessage::SpinResult {
                winning_number,
                color,
                is_high_low,
                is_odd_even,
                previous_numbers,
            } => {
                assert_eq!(winning_number, 17);
                assert_eq!(color, PocketColor::Black);
                assert_eq!(is_high_low, Some(HighLow::Low));
                assert_eq!(is_odd_even, Some(OddEven::Odd));
                assert_eq!(previous_numbers.numbers(), vec![17, 0]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn envelope_serializes_flat_with_type_tag() {
        let envelope = Envelope {
            message: SyncMessage::ClientConnect {
                client_id: "session_1_abc".into(),
            },
            timestamp: 42,
            origin: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "client_connect");
        assert_eq!(json["clientId"], "session_1_abc");
        assert_eq!(json["timestamp"], 42);
        assert!(json.get("origin").is_none());
    }

    #[test]
    fn unit_and_unknown_messages_decode() {
        let envelope = Envelope::from_json_str(r#"{"type":"no_more_bets","timestamp":9}"#).unwrap();
        assert_eq!(envelope.message, SyncMessage::NoMoreBets);

        let envelope = Envelope::from_json_str(r#"{"type":"confetti","timestamp":9}"#).unwrap();
        assert_eq!(envelope.message, SyncMessage::Unknown);
    }

    #[test]
    fn spin_start_defaults_to_closed_betting() {
        let envelope = Envelope::from_json_str(r#"{"type":"spin_start"}"#).unwrap();
        match envelope.message {
            SyncMessage::SpinStart {
                game_phase,
                betting_state,
            } => {
                assert_eq!(game_phase, GamePhase::Spinning);
                assert!(!betting_state.bets_allowed);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn out_of_range_numbers_fail_validation() {
        let message = SyncMessage::WheelAnimation {
            winning_number: 40,
            ball_landing_number: 3,
            animation_start_time: 0,
            animation_duration: 5000,
        };
        assert!(message.validate().is_err());
        assert!(SyncMessage::spin_result(17, RecentNumbers::default()).validate().is_ok());
    }
}
