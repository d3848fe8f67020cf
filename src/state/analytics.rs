//! Display statistics derived from the spin log.
//!
//! Only the master derives these; clients replicate whatever the master sent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::wheel::{HighLow, MAX_NUMBER, OddEven, PocketColor};

/// Spins kept in the log; older ones fall off the front.
pub const MAX_SPIN_LOG: usize = 100;
const HOT_COLD_COUNT: usize = 5;
const RECENT_SPIN_COUNT: usize = 8;

/// Cached analytics shown in the side panels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsData {
    /// Recorded spins, oldest first, at most [`MAX_SPIN_LOG`].
    pub all_spins: Vec<u8>,
    /// Hits per number.
    pub number_frequency: BTreeMap<u8, u32>,
    /// Most frequent numbers, most frequent first.
    pub hot_numbers: Vec<u8>,
    /// Least frequent numbers, least frequent first.
    pub cold_numbers: Vec<u8>,
    /// Hits per colour.
    pub color_distribution: BTreeMap<String, u32>,
    /// Hits per parity (`odd`, `even`, `zero`).
    pub odd_even_distribution: BTreeMap<String, u32>,
    /// Hits per half (`low`, `high`, `zero`).
    pub high_low_distribution: BTreeMap<String, u32>,
    /// Hits per dozen (`1st`, `2nd`, `3rd`).
    pub dozens_distribution: BTreeMap<String, u32>,
    /// Hits per column (`1st`, `2nd`, `3rd`).
    pub columns_distribution: BTreeMap<String, u32>,
    /// Up to eight latest spins, newest first.
    #[serde(rename = "last8Spins")]
    pub last_8_spins: Vec<u8>,
    /// Pre-rendered number history markup.
    #[serde(rename = "numberHistoryHTML")]
    pub number_history_html: String,
}

impl AnalyticsData {
    /// Recompute every statistic from the spin log (oldest first).
    pub fn from_spins(spins: &[u8]) -> Self {
        let mut spins: Vec<u8> = spins.iter().copied().filter(|n| *n <= MAX_NUMBER).collect();
        trim_spin_log(&mut spins);

        let mut number_frequency = BTreeMap::new();
        let mut color_distribution = BTreeMap::new();
        let mut odd_even_distribution = BTreeMap::new();
        let mut high_low_distribution = BTreeMap::new();
        let mut dozens_distribution = BTreeMap::new();
        let mut columns_distribution = BTreeMap::new();

        for &number in &spins {
            *number_frequency.entry(number).or_insert(0) += 1;
            *color_distribution
                .entry(PocketColor::of(number).as_str().to_string())
                .or_insert(0) += 1;

            let parity = OddEven::of(number).map_or("zero".to_string(), |p| p.to_string());
            *odd_even_distribution
                .entry(parity.to_ascii_lowercase())
                .or_insert(0) += 1;

            let half = HighLow::of(number).map_or("zero".to_string(), |h| h.to_string());
            *high_low_distribution
                .entry(half.to_ascii_lowercase())
                .or_insert(0) += 1;

            if number > 0 {
                *dozens_distribution
                    .entry(ordinal((number - 1) / 12))
                    .or_insert(0) += 1;
                *columns_distribution
                    .entry(ordinal((number - 1) % 3))
                    .or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(u8, u32)> = (0..=MAX_NUMBER)
            .map(|n| (n, number_frequency.get(&n).copied().unwrap_or(0)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let hot_numbers = ranked
            .iter()
            .filter(|(_, hits)| *hits > 0)
            .take(HOT_COLD_COUNT)
            .map(|(n, _)| *n)
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        let cold_numbers = ranked
            .iter()
            .take(HOT_COLD_COUNT)
            .map(|(n, _)| *n)
            .collect();

        let last_8_spins: Vec<u8> = spins.iter().rev().take(RECENT_SPIN_COUNT).copied().collect();
        let number_history_html = render_history(&last_8_spins);

        Self {
            all_spins: spins,
            number_frequency,
            hot_numbers,
            cold_numbers,
            color_distribution,
            odd_even_distribution,
            high_low_distribution,
            dozens_distribution,
            columns_distribution,
            last_8_spins,
            number_history_html,
        }
    }
}

fn ordinal(index: u8) -> String {
    match index {
        0 => "1st",
        1 => "2nd",
        _ => "3rd",
    }
    .to_string()
}

fn render_history(numbers: &[u8]) -> String {
    numbers
        .iter()
        .map(|n| {
            format!(
                "<div class=\"history-number {}\">{n}</div>",
                PocketColor::of(*n).roll_class()
            )
        })
        .collect()
}

/// Which analytics panels are showing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsVisibility {
    /// Any panel is visible.
    pub panels_visible: bool,
    /// Left sidebar visible.
    pub left_sidebar_visible: bool,
    /// Right sidebar visible.
    pub right_sidebar_visible: bool,
}

impl AnalyticsVisibility {
    /// Build from the two sidebars; `panels_visible` is derived.
    pub fn from_sidebars(left: bool, right: bool) -> Self {
        Self {
            panels_visible: left || right,
            left_sidebar_visible: left,
            right_sidebar_visible: right,
        }
    }
}

/// Analytics sub-state of the synchronized game state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsState {
    /// Any panel is visible.
    pub panels_visible: bool,
    /// Left sidebar visible.
    pub left_sidebar_visible: bool,
    /// Right sidebar visible.
    pub right_sidebar_visible: bool,
    /// Unix ms of the last data refresh.
    pub last_analytics_update: Option<u64>,
    /// Cached statistics.
    pub analytics_data: AnalyticsData,
}

impl AnalyticsState {
    /// Current panel visibility.
    pub fn visibility(&self) -> AnalyticsVisibility {
        AnalyticsVisibility {
            panels_visible: self.panels_visible,
            left_sidebar_visible: self.left_sidebar_visible,
            right_sidebar_visible: self.right_sidebar_visible,
        }
    }

    /// Overwrite panel visibility.
    pub fn set_visibility(&mut self, visibility: AnalyticsVisibility) {
        self.panels_visible = visibility.panels_visible;
        self.left_sidebar_visible = visibility.left_sidebar_visible;
        self.right_sidebar_visible = visibility.right_sidebar_visible;
    }
}

/// Drop the oldest spins beyond [`MAX_SPIN_LOG`].
pub fn trim_spin_log(spins: &mut Vec<u8>) {
    if spins.len() > MAX_SPIN_LOG {
        spins.drain(..spins.len() - MAX_SPIN_LOG);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spin_log_keeps_the_newest_hundred() {
        let spins: Vec<u8> = (0..150u32).map(|i| (i % 37) as u8).collect();
        let data = AnalyticsData::from_spins(&spins);

        assert_eq!(data.all_spins.len(), MAX_SPIN_LOG);
        assert_eq!(data.all_spins[..], spins[50..]);
        assert_eq!(data.number_frequency.values().sum::<u32>() as usize, MAX_SPIN_LOG);
    }

    #[test]
    fn statistics_follow_spin_log() {
        let data = AnalyticsData::from_spins(&[17, 0, 17, 32, 5]);

        assert_eq!(data.number_frequency.get(&17), Some(&2));
        assert_eq!(data.hot_numbers.first(), Some(&17));
        assert_eq!(data.color_distribution.get("red"), Some(&2));
        assert_eq!(data.color_distribution.get("green"), Some(&1));
        assert_eq!(data.odd_even_distribution.get("zero"), Some(&1));
        assert_eq!(data.high_low_distribution.get("high"), Some(&1));
        assert_eq!(data.last_8_spins, vec![5, 32, 17, 0, 17]);
        assert!(data.number_history_html.starts_with("<div class=\"history-number roll-red\">5</div>"));
    }

    #[test]
    fn cold_numbers_include_never_hit() {
        let data = AnalyticsData::from_spins(&[1, 1, 2]);
        assert_eq!(data.cold_numbers, vec![0, 3, 4, 5, 6]);
    }

    #[test]
    fn wire_names_match_display_cache() {
        let json = serde_json::to_value(AnalyticsData::from_spins(&[7])).unwrap();
        assert!(json.get("last8Spins").is_some());
        assert!(json.get("numberHistoryHTML").is_some());
        assert_eq!(json["numberFrequency"]["7"], 1);
    }
}
