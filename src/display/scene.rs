//! In-memory [`DisplaySurface`] holding what a page would show.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use serde::Serialize;
use tracing::trace;

use crate::{
    display::{DisplayError, DisplayResult, DisplaySurface, ResultView, WheelLanding, elements},
    state::{
        analytics::{AnalyticsData, AnalyticsVisibility},
        game::RecentNumbers,
        state_machine::GamePhase,
        wheel::PocketColor,
    },
};

/// One chip of the recent results strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryChip {
    /// Text of the chip.
    pub text: String,
    /// Colour class, e.g. `roll-black`.
    pub class: String,
}

/// Rendered content of a scene.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub timer_text: String,
    pub timer_warning: bool,
    pub game_phase: GamePhase,
    pub betting_enabled: bool,
    pub spin_presses: u32,
    pub wheel_visible: bool,
    pub wheel_landing: Option<WheelLanding>,
    pub spins_started: u32,
    pub result_visible: bool,
    pub result_text: String,
    pub result_class: String,
    pub result_high_low: String,
    pub result_odd_even: String,
    pub roll_history: Vec<HistoryChip>,
    pub analytics: AnalyticsVisibility,
    pub analytics_html: String,
    pub analytics_data: AnalyticsData,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            timer_text: "--:--".into(),
            timer_warning: false,
            game_phase: GamePhase::Betting,
            betting_enabled: true,
            spin_presses: 0,
            wheel_visible: false,
            wheel_landing: None,
            spins_started: 0,
            result_visible: false,
            result_text: String::new(),
            result_class: String::new(),
            result_high_low: String::new(),
            result_odd_even: String::new(),
            roll_history: Vec::new(),
            analytics: AnalyticsVisibility::default(),
            analytics_html: String::new(),
            analytics_data: AnalyticsData::default(),
        }
    }
}

/// Headless display used by the binary and by tests.
#[derive(Default)]
pub struct SceneDisplay {
    scene: Mutex<Scene>,
    missing: Mutex<HashSet<&'static str>>,
}

impl SceneDisplay {
    /// Empty scene with every element present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scene pre-filled with content, as a page loaded mid-round would be.
    pub fn with_scene(scene: Scene) -> Self {
        Self {
            scene: Mutex::new(scene),
            missing: Mutex::default(),
        }
    }

    /// Remove an element so operations touching it fail.
    pub fn remove_element(&self, element: &'static str) {
        self.missing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(element);
    }

    /// Copy of the rendered content.
    pub fn snapshot(&self) -> Scene {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Scene> {
        self.scene
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn element(&self, element: &'static str) -> DisplayResult<MutexGuard<'_, Scene>> {
        let missing = self
            .missing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(element);
        if missing {
            return Err(DisplayError::MissingElement(element));
        }
        Ok(self.lock())
    }
}

fn chips(history: &RecentNumbers) -> Vec<HistoryChip> {
    history
        .entries()
        .iter()
        .map(|entry| HistoryChip {
            text: entry.number.to_string(),
            class: entry.color.roll_class(),
        })
        .collect()
}

impl DisplaySurface for SceneDisplay {
    fn set_timer_text(&self, text: &str, warning: bool) -> DisplayResult {
        let mut scene = self.element(elements::TIMER)?;
        scene.timer_text = text.to_string();
        scene.timer_warning = warning;
        Ok(())
    }

    fn activate_spin_control(&self) -> DisplayResult {
        let mut scene = self.element(elements::SPIN_CONTROL)?;
        scene.spin_presses += 1;
        Ok(())
    }

    fn set_betting_enabled(&self, enabled: bool) -> DisplayResult {
        let mut scene = self.element(elements::BETTING_AREA)?;
        scene.betting_enabled = enabled;
        Ok(())
    }

    fn set_game_phase(&self, phase: GamePhase) -> DisplayResult {
        let mut scene = self.element(elements::GAME_ROOT)?;
        scene.game_phase = phase;
        Ok(())
    }

    fn show_wheel(&self, landing: WheelLanding) -> DisplayResult {
        let mut scene = self.element(elements::WHEEL)?;
        scene.wheel_visible = true;
        scene.wheel_landing = Some(landing);
        scene.spins_started += 1;
        trace!(pocket = landing.pocket, degrees = landing.degrees, "wheel spin rendered");
        Ok(())
    }

    fn hide_wheel(&self) -> DisplayResult {
        let mut scene = self.element(elements::WHEEL)?;
        scene.wheel_visible = false;
        Ok(())
    }

    fn show_result(&self, result: &ResultView) -> DisplayResult {
        let mut scene = self.element(elements::RESULT_ALERT)?;
        scene.result_visible = true;
        scene.result_text = result.number.to_string();
        scene.result_class = result.color.roll_class();
        scene.result_high_low = result.high_low.map(|h| h.to_string()).unwrap_or_default();
        scene.result_odd_even = result.odd_even.map(|o| o.to_string()).unwrap_or_default();
        Ok(())
    }

    fn hide_result(&self) -> DisplayResult {
        let mut scene = self.element(elements::RESULT_ALERT)?;
        scene.result_visible = false;
        Ok(())
    }

    fn set_roll_history(&self, history: &RecentNumbers) -> DisplayResult {
        let mut scene = self.element(elements::ROLL_HISTORY)?;
        scene.roll_history = chips(history);
        Ok(())
    }

    fn set_analytics_visibility(&self, visibility: AnalyticsVisibility) -> DisplayResult {
        let mut scene = self.element(elements::ANALYTICS_PANELS)?;
        scene.analytics = visibility;
        Ok(())
    }

    fn set_analytics_data(&self, data: &AnalyticsData) -> DisplayResult {
        let mut scene = self.element(elements::ANALYTICS_PANELS)?;
        scene.analytics_html = data.number_history_html.clone();
        scene.analytics_data = data.clone();
        Ok(())
    }

    fn timer_text(&self) -> DisplayResult<String> {
        Ok(self.element(elements::TIMER)?.timer_text.clone())
    }

    fn roll_history(&self) -> DisplayResult<Vec<u8>> {
        let scene = self.element(elements::ROLL_HISTORY)?;
        Ok(scene
            .roll_history
            .iter()
            .filter_map(|chip| chip.text.trim().parse().ok())
            .collect())
    }

    fn analytics_visibility(&self) -> DisplayResult<AnalyticsVisibility> {
        Ok(self.element(elements::ANALYTICS_PANELS)?.analytics)
    }
}

impl HistoryChip {
    /// Chip for `number`.
    pub fn for_number(number: u8) -> Self {
        Self {
            text: number.to_string(),
            class: PocketColor::of(number).roll_class(),
        }
    }
}
