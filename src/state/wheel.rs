//! European single-zero wheel layout and the derived bet categories.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Number of pockets on a European wheel.
pub const POCKET_COUNT: usize = 37;

/// Highest number that can win a round.
pub const MAX_NUMBER: u8 = 36;

/// Pocket order, clockwise, starting from zero.
pub const WHEEL_LAYOUT: [u8; POCKET_COUNT] = [
    0, 32, 15, 19, 4, 21, 2, 25, 17, 34, 6, 27, 13, 36, 11, 30, 8, 23, 10, 5, 24, 16, 33, 1, 20,
    14, 31, 9, 22, 18, 29, 7, 28, 12, 35, 3, 26,
];

const RED_NUMBERS: [u8; 18] = [
    1, 3, 5, 7, 9, 12, 14, 16, 18, 19, 21, 23, 25, 27, 30, 32, 34, 36,
];

/// Pocket colour of a winning number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PocketColor {
    /// Zero.
    Green,
    /// Red pockets.
    Red,
    /// Black pockets.
    Black,
}

impl PocketColor {
    /// Colour of `number`; anything outside the red set that is not zero is black.
    pub fn of(number: u8) -> Self {
        if number == 0 {
            PocketColor::Green
        } else if RED_NUMBERS.contains(&number) {
            PocketColor::Red
        } else {
            PocketColor::Black
        }
    }

    /// Lowercase name used on the wire and in CSS classes.
    pub fn as_str(&self) -> &'static str {
        match self {
            PocketColor::Green => "green",
            PocketColor::Red => "red",
            PocketColor::Black => "black",
        }
    }

    /// Class applied to result and roll-history elements (`roll-red`, ...).
    pub fn roll_class(&self) -> String {
        format!("roll-{}", self.as_str())
    }
}

impl fmt::Display for PocketColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PocketColor {
    type Err = UnknownCategory;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(PocketColor::Green),
            "red" => Ok(PocketColor::Red),
            "black" => Ok(PocketColor::Black),
            _ => Err(UnknownCategory(value.to_string())),
        }
    }
}

/// Low (1-18) or high (19-36) half of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighLow {
    /// 1 to 18.
    Low,
    /// 19 to 36.
    High,
}

impl HighLow {
    /// Zero belongs to neither half.
    pub fn of(number: u8) -> Option<Self> {
        match number {
            0 => None,
            1..=18 => Some(HighLow::Low),
            _ => Some(HighLow::High),
        }
    }
}

impl fmt::Display for HighLow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HighLow::Low => "LOW",
            HighLow::High => "HIGH",
        })
    }
}

impl FromStr for HighLow {
    type Err = UnknownCategory;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(HighLow::Low),
            "HIGH" => Ok(HighLow::High),
            _ => Err(UnknownCategory(value.to_string())),
        }
    }
}

/// Parity of a winning number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OddEven {
    /// Odd numbers.
    Odd,
    /// Even numbers other than zero.
    Even,
}

impl OddEven {
    /// Zero is neither odd nor even for betting purposes.
    pub fn of(number: u8) -> Option<Self> {
        match number {
            0 => None,
            n if n % 2 == 1 => Some(OddEven::Odd),
            _ => Some(OddEven::Even),
        }
    }
}

impl fmt::Display for OddEven {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OddEven::Odd => "ODD",
            OddEven::Even => "EVEN",
        })
    }
}

impl FromStr for OddEven {
    type Err = UnknownCategory;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ODD" => Ok(OddEven::Odd),
            "EVEN" => Ok(OddEven::Even),
            _ => Err(UnknownCategory(value.to_string())),
        }
    }
}

/// Raised when a category label on the wire is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category `{0}`")]
pub struct UnknownCategory(pub String);

/// Index of `number` in [`WHEEL_LAYOUT`], falling back to `number % 37`.
pub fn pocket_index(number: u8) -> usize {
    WHEEL_LAYOUT
        .iter()
        .position(|pocket| *pocket == number)
        .unwrap_or(number as usize % POCKET_COUNT)
}

/// Final rotation of the ball container, in degrees, for a pocket index.
pub fn landing_degrees(pocket: usize) -> f64 {
    (360.0 / POCKET_COUNT as f64) * pocket as f64
}

/// Render remaining milliseconds as `MM:SS`.
pub fn format_timer(time_remaining_ms: u64) -> String {
    let total_seconds = time_remaining_ms / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

/// Parse `MM:SS` timer text into milliseconds; `--:--` and malformed text yield `None`.
pub fn parse_timer(text: &str) -> Option<u64> {
    let (minutes, seconds) = text.trim().split_once(':')?;
    let minutes = minutes.trim().parse::<u64>().ok()?;
    let seconds = seconds.trim().parse::<u64>().ok()?;
    Some((minutes * 60 + seconds) * 1000)
}

/// Serde helper for optional categories: `None` travels as an empty string, and
/// both `null` and `""` decode to `None`.
pub mod optional_label {
    use std::{fmt::Display, str::FromStr};

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    /// Serialize `None` as `""` and `Some(v)` as `v.to_string()`.
    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_str(""),
        }
    }

    /// Accept `null`, `""` or a parseable label.
    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(label) if label.trim().is_empty() => Ok(None),
            Some(label) => label.parse().map(Some).map_err(D::Error::custom),
        }
    }
}
