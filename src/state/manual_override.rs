use serde::{Deserialize, Serialize};

use crate::state::wheel::PocketColor;

/// Operator-controlled winning number as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverride {
    /// Number the next spin must land on.
    pub forced_number: Option<u8>,
    /// Colour reported with the number.
    pub forced_color: Option<PocketColor>,
    /// Draw the override applies to.
    pub draw_number: Option<u64>,
    /// Whether the backend is in manual mode.
    pub is_manual: bool,
}

impl ManualOverride {
    /// Automatic mode at `draw_number`.
    pub fn automatic(draw_number: Option<u64>) -> Self {
        Self {
            draw_number,
            ..Self::default()
        }
    }

    /// Manual mode forcing `number`; the colour is derived when absent.
    pub fn manual(number: u8, color: Option<PocketColor>, draw_number: Option<u64>) -> Self {
        Self {
            forced_number: Some(number),
            forced_color: Some(color.unwrap_or_else(|| PocketColor::of(number))),
            draw_number,
            is_manual: true,
        }
    }

    /// The forced number, only while manual.
    pub fn active_number(&self) -> Option<u8> {
        if self.is_manual { self.forced_number } else { None }
    }
}

/// Override state of one display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum OverrideMode {
    /// Outcomes come from the wheel.
    #[default]
    Automatic,
    /// Outcomes are forced by the operator.
    Manual {
        /// Forced number.
        number: u8,
        /// Forced colour.
        color: PocketColor,
        /// Draw the override was issued for.
        draw_number: Option<u64>,
    },
}

impl OverrideMode {
    /// Forced number while manual.
    pub fn forced_number(&self) -> Option<u8> {
        match self {
            OverrideMode::Automatic => None,
            OverrideMode::Manual { number, .. } => Some(*number),
        }
    }

    /// `"automatic"` / `"manual"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideMode::Automatic => "automatic",
            OverrideMode::Manual { .. } => "manual",
        }
    }
}
