//! Payloads exchanged with the draw-control backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{BoolFromInt, DisplayFromStr, PickFirst, json::JsonString, serde_as};
use validator::ValidationError;

use crate::{
    dto::validation::validate_winning_number,
    state::{game::GameState, manual_override::ManualOverride, wheel::PocketColor},
};

const SUCCESS: &str = "success";

/// Response of the primary manual-number endpoint.
///
/// Two variants share this decoder: `is_manual` + `selected_number` +
/// `winning_color`, or `has_forced_number` + `forced_number` + `forced_color`.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PrimaryOverrideResponse {
    /// `"success"` when the lookup worked.
    pub status: String,
    /// Manual mode flag of the first shape; `true`/`false` or `1`/`0`.
    #[serde_as(as = "Option<PickFirst<(_, BoolFromInt)>>")]
    pub is_manual: Option<bool>,
    /// Manual mode flag of the second shape.
    #[serde_as(as = "Option<PickFirst<(_, BoolFromInt)>>")]
    pub has_forced_number: Option<bool>,
    /// Forced number of the first shape, number or numeric string.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub selected_number: Option<u8>,
    /// Forced number of the second shape.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub forced_number: Option<u8>,
    /// Colour label of the first shape.
    pub winning_color: Option<String>,
    /// Colour label of the second shape.
    pub forced_color: Option<String>,
    /// Draw the override applies to.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub draw_number: Option<u64>,
}

impl PrimaryOverrideResponse {
    /// Whether the backend reported `status: "success"`.
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS
    }

    /// Normalise into a [`ManualOverride`].
    pub fn into_override(self) -> Result<ManualOverride, ValidationError> {
        let manual = self.is_manual.or(self.has_forced_number).unwrap_or(false);
        let number = self.selected_number.or(self.forced_number);
        let color = self.winning_color.or(self.forced_color);
        normalize(manual, number, color.as_deref(), self.draw_number)
    }
}

/// Response of the fallback sync endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FallbackOverrideResponse {
    /// `"success"` when the lookup worked.
    pub status: String,
    /// Override payload; absent on failure.
    pub data: Option<FallbackOverrideData>,
}

/// `data` object of [`FallbackOverrideResponse`].
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FallbackOverrideData {
    /// Draw currently being played.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub current_draw: Option<u64>,
    /// Set when the draw is random; wins over `has_forced_number`.
    #[serde_as(as = "Option<PickFirst<(_, BoolFromInt)>>")]
    pub is_automatic: Option<bool>,
    /// Set when an operator forced the result.
    #[serde_as(as = "Option<PickFirst<(_, BoolFromInt)>>")]
    pub has_forced_number: Option<bool>,
    /// Forced number, number or numeric string.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub forced_number: Option<u8>,
    /// Colour label of the forced number.
    pub forced_color: Option<String>,
}

impl FallbackOverrideResponse {
    /// Whether the backend reported `status: "success"` with a payload.
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS && self.data.is_some()
    }

    /// Normalise into a [`ManualOverride`].
    pub fn into_override(self) -> Result<ManualOverride, ValidationError> {
        let data = self.data.unwrap_or_default();
        let manual = data.has_forced_number.unwrap_or(false) && !data.is_automatic.unwrap_or(false);
        normalize(
            manual,
            data.forced_number,
            data.forced_color.as_deref(),
            data.current_draw,
        )
    }
}

fn normalize(
    manual: bool,
    number: Option<u8>,
    color: Option<&str>,
    draw_number: Option<u64>,
) -> Result<ManualOverride, ValidationError> {
    match (manual, number) {
        (true, Some(number)) => {
            validate_winning_number(number)?;
            let color = color.and_then(|label| label.parse::<PocketColor>().ok());
            Ok(ManualOverride::manual(number, color, draw_number))
        }
        _ => Ok(ManualOverride::automatic(draw_number)),
    }
}

/// Body posted to the save-round endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRoundRequest {
    /// Recent numbers, newest first, comma-joined.
    pub numbers: String,
    /// Matching colours, comma-joined.
    pub colors: String,
    /// `#N` label of the draw just played.
    pub last_draw: String,
    /// `#N` label of the upcoming draw.
    pub next_draw: String,
    /// Seconds left on the countdown.
    pub timer: u64,
    /// Unix ms at which the countdown ends.
    pub end_time: u64,
}

impl SaveRoundRequest {
    /// Snapshot the persisted subset of `state` at `now`.
    pub fn from_state(state: &GameState, now: u64) -> Self {
        let entries = state.previous_numbers.entries();
        let numbers = entries
            .iter()
            .map(|entry| entry.number.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let colors = entries
            .iter()
            .map(|entry| entry.color.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let draw = state.draw_number.unwrap_or_default();

        Self {
            numbers,
            colors,
            last_draw: format!("#{draw}"),
            next_draw: format!("#{}", draw + 1),
            timer: state.time_remaining / 1000,
            end_time: now + state.time_remaining,
        }
    }
}

/// Generic `{status, message}` acknowledgement.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusResponse {
    /// `"success"` when the request was accepted.
    pub status: String,
    /// Backend explanation, mostly on failure.
    pub message: Option<String>,
}

impl StatusResponse {
    /// Whether the backend reported `status: "success"`.
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS
    }
}

/// Response of the analytics load endpoint; both payloads may arrive JSON-encoded.
#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalyticsLoadResponse {
    /// `"success"` when the load worked.
    pub status: String,
    /// Stored spin log, oldest first.
    #[serde_as(as = "PickFirst<(_, JsonString)>")]
    pub all_spins: Vec<u8>,
    /// Stored hit counts per number.
    #[serde_as(as = "PickFirst<(_, JsonString)>")]
    pub number_frequency: BTreeMap<u8, u32>,
}

impl AnalyticsLoadResponse {
    /// Whether the backend reported `status: "success"`.
    pub fn is_success(&self) -> bool {
        self.status == SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn primary_manual_shape_normalises() {
        let response: PrimaryOverrideResponse = serde_json::from_value(json!({
            "status": "success",
            "is_manual": true,
            "selected_number": "17",
            "winning_color": "black",
            "draw_number": 42
        }))
        .unwrap();
        assert!(response.is_success());

        let value = response.into_override().unwrap();
        assert_eq!(value, ManualOverride::manual(17, Some(PocketColor::Black), Some(42)));
    }

    #[test]
    fn primary_forced_shape_normalises_and_derives_color() {
        let response: PrimaryOverrideResponse = serde_json::from_value(json!({
            "status": "success",
            "has_forced_number": 1,
            "forced_number": 0,
            "draw_number": "42"
        }))
        .unwrap();

        let value = response.into_override().unwrap();
        assert_eq!(value.active_number(), Some(0));
        assert_eq!(value.forced_color, Some(PocketColor::Green));
        assert_eq!(value.draw_number, Some(42));
    }

    #[test]
    fn fallback_shape_normalises() {
        let response: FallbackOverrideResponse = serde_json::from_value(json!({
            "status": "success",
            "data": {
                "current_draw": 7,
                "is_automatic": false,
                "has_forced_number": true,
                "forced_number": 32,
                "forced_color": "red"
            }
        }))
        .unwrap();
        assert!(response.is_success());
        assert_eq!(
            response.into_override().unwrap(),
            ManualOverride::manual(32, Some(PocketColor::Red), Some(7))
        );
    }

    #[test]
    fn automatic_fallback_ignores_stale_number() {
        let response: FallbackOverrideResponse = serde_json::from_value(json!({
            "status": "success",
            "data": {"current_draw": 8, "is_automatic": true, "has_forced_number": true, "forced_number": 5}
        }))
        .unwrap();
        assert_eq!(response.into_override().unwrap(), ManualOverride::automatic(Some(8)));
    }

    #[test]
    fn out_of_range_forced_number_is_rejected() {
        let response: PrimaryOverrideResponse = serde_json::from_value(json!({
            "status": "success",
            "is_manual": true,
            "selected_number": 99
        }))
        .unwrap();
        assert!(response.into_override().is_err());
    }

    #[test]
    fn save_round_request_labels_draws() {
        let mut state = GameState::new("session_test", 0);
        state.draw_number = Some(41);
        state.time_remaining = 90_500;
        state.record_result(0, 1);
        state.record_result(17, 2);

        let request = SaveRoundRequest::from_state(&state, 1_000);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["numbers"], "17,0");
        assert_eq!(json["colors"], "black,green");
        assert_eq!(json["lastDraw"], "#41");
        assert_eq!(json["nextDraw"], "#42");
        assert_eq!(json["timer"], 90);
        assert_eq!(json["endTime"], 91_500);
    }

    #[test]
    fn analytics_payload_accepts_encoded_strings() {
        let response: AnalyticsLoadResponse = serde_json::from_value(json!({
            "status": "success",
            "all_spins": "[3,17,0]",
            "number_frequency": "{\"3\":1,\"17\":1,\"0\":1}"
        }))
        .unwrap();
        assert!(response.is_success());
        assert_eq!(response.all_spins, vec![3, 17, 0]);
        assert_eq!(response.number_frequency.get(&17), Some(&1));

        let response: AnalyticsLoadResponse =
            serde_json::from_value(json!({"status": "success", "all_spins": [1, 2]})).unwrap();
        assert_eq!(response.all_spins, vec![1, 2]);
    }
}
