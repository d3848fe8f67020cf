//! Change notifications for a [`DisplaySurface`], the headless stand-in for
//! mutation observers on the master page.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::{
    display::{DisplayResult, DisplaySurface, ResultView, WheelLanding},
    state::{
        analytics::{AnalyticsData, AnalyticsVisibility},
        game::RecentNumbers,
        state_machine::GamePhase,
    },
};

/// A relevant change seen on the observed surface.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayObservation {
    /// Countdown text changed.
    TimerText(String),
    /// Spin trigger control was pressed.
    SpinTriggered,
    /// Wheel shown (with its landing) or hidden.
    WheelVisibility {
        visible: bool,
        landing: Option<WheelLanding>,
    },
    /// Result alert shown (with its content) or hidden.
    ResultAlertVisibility {
        visible: bool,
        result: Option<ResultView>,
    },
    /// Analytics panels shown or hidden.
    AnalyticsPanels(AnalyticsVisibility),
    /// Analytics content replaced.
    AnalyticsData(Box<AnalyticsData>),
    /// Recent results strip redrawn.
    NumberHistoryChanged(RecentNumbers),
}

/// Receiving end handed to the master coordinator.
pub type ObservationReceiver = mpsc::UnboundedReceiver<DisplayObservation>;

/// Surface wrapper that reports every successful change.
///
/// Failed operations are not reported; nothing changed on screen.
pub struct ObservedDisplay {
    inner: Arc<dyn DisplaySurface>,
    observations: mpsc::UnboundedSender<DisplayObservation>,
}

impl ObservedDisplay {
    /// Wrap `inner`, returning the wrapper and the observation stream.
    pub fn new(inner: Arc<dyn DisplaySurface>) -> (Self, ObservationReceiver) {
        let (observations, receiver) = mpsc::unbounded_channel();
        (
            Self {
                inner,
                observations,
            },
            receiver,
        )
    }

    fn emit(&self, observation: DisplayObservation) {
        trace!(?observation, "display change observed");
        // no observer attached is fine
        let _ = self.observations.send(observation);
    }
}

impl DisplaySurface for ObservedDisplay {
    fn set_timer_text(&self, text: &str, warning: bool) -> DisplayResult {
        let previous = self.inner.timer_text().ok();
        self.inner.set_timer_text(text, warning)?;
        if previous.as_deref() != Some(text) {
            self.emit(DisplayObservation::TimerText(text.to_string()));
        }
        Ok(())
    }

    fn activate_spin_control(&self) -> DisplayResult {
        self.inner.activate_spin_control()?;
        self.emit(DisplayObservation::SpinTriggered);
        Ok(())
    }

    fn set_betting_enabled(&self, enabled: bool) -> DisplayResult {
        self.inner.set_betting_enabled(enabled)
    }

    fn set_game_phase(&self, phase: GamePhase) -> DisplayResult {
        self.inner.set_game_phase(phase)
    }

    fn show_wheel(&self, landing: WheelLanding) -> DisplayResult {
        self.inner.show_wheel(landing)?;
        self.emit(DisplayObservation::WheelVisibility {
            visible: true,
            landing: Some(landing),
        });
        Ok(())
    }

    fn hide_wheel(&self) -> DisplayResult {
        self.inner.hide_wheel()?;
        self.emit(DisplayObservation::WheelVisibility {
            visible: false,
            landing: None,
        });
        Ok(())
    }

    fn show_result(&self, result: &ResultView) -> DisplayResult {
        self.inner.show_result(result)?;
        self.emit(DisplayObservation::ResultAlertVisibility {
            visible: true,
            result: Some(result.clone()),
        });
        Ok(())
    }

    fn hide_result(&self) -> DisplayResult {
        self.inner.hide_result()?;
        self.emit(DisplayObservation::ResultAlertVisibility {
            visible: false,
            result: None,
        });
        Ok(())
    }

    fn set_roll_history(&self, history: &RecentNumbers) -> DisplayResult {
        self.inner.set_roll_history(history)?;
        self.emit(DisplayObservation::NumberHistoryChanged(history.clone()));
        Ok(())
    }

    fn set_analytics_visibility(&self, visibility: AnalyticsVisibility) -> DisplayResult {
        let previous = self.inner.analytics_visibility().ok();
        self.inner.set_analytics_visibility(visibility)?;
        if previous != Some(visibility) {
            self.emit(DisplayObservation::AnalyticsPanels(visibility));
        }
        Ok(())
    }

    fn set_analytics_data(&self, data: &AnalyticsData) -> DisplayResult {
        self.inner.set_analytics_data(data)?;
        self.emit(DisplayObservation::AnalyticsData(Box::new(data.clone())));
        Ok(())
    }

    fn timer_text(&self) -> DisplayResult<String> {
        self.inner.timer_text()
    }

    fn roll_history(&self) -> DisplayResult<Vec<u8>> {
        self.inner.roll_history()
    }

    fn analytics_visibility(&self) -> DisplayResult<AnalyticsVisibility> {
        self.inner.analytics_visibility()
    }
}
