use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phases a round cycles through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    /// Countdown running, bets accepted.
    #[default]
    Betting,
    /// Wheel is spinning, no more bets.
    Spinning,
    /// Winning number is on screen.
    #[serde(alias = "result")]
    Results,
}

impl GamePhase {
    /// The only phase reachable from `self`.
    pub fn successor(self) -> GamePhase {
        match self {
            GamePhase::Betting => GamePhase::Spinning,
            GamePhase::Spinning => GamePhase::Results,
            GamePhase::Results => GamePhase::Betting,
        }
    }

    /// Value of the `data-game-phase` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::Betting => "betting",
            GamePhase::Spinning => "spinning",
            GamePhase::Results => "results",
        }
    }
}

/// Events that move a round forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Spin triggered; betting closes.
    SpinStarted,
    /// Ball settled and the result is revealed.
    ResultRevealed,
    /// Result dismissed; the next round opens for betting.
    RoundReopened,
}

/// Error returned when an event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// Phase the machine was in.
    pub from: GamePhase,
    /// Rejected event.
    pub event: PhaseEvent,
}

/// Enforces `betting -> spinning -> results -> betting`.
#[derive(Debug, Clone, Default)]
pub struct PhaseMachine {
    phase: GamePhase,
    version: usize,
}

impl PhaseMachine {
    /// Start a machine in the betting phase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Apply a single event.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<GamePhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (GamePhase::Betting, PhaseEvent::SpinStarted) => GamePhase::Spinning,
            (GamePhase::Spinning, PhaseEvent::ResultRevealed) => GamePhase::Results,
            (GamePhase::Results, PhaseEvent::RoundReopened) => GamePhase::Betting,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        self.phase = next;
        self.version += 1;
        Ok(next)
    }

    /// Phases visited when walking forward from the current phase to `target`.
    ///
    /// Empty when already at `target`; otherwise ends with `target`.
    pub fn path_to(&self, target: GamePhase) -> Vec<GamePhase> {
        let mut path = Vec::with_capacity(2);
        let mut cursor = self.phase;
        while cursor != target {
            cursor = cursor.successor();
            path.push(cursor);
        }
        path
    }

    /// Walk forward to `target` along valid edges, returning every phase entered.
    pub fn advance_to(&mut self, target: GamePhase) -> Vec<GamePhase> {
        let path = self.path_to(target);
        self.version += path.len();
        self.phase = target;
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_betting() {
        let sm = PhaseMachine::new();
        assert_eq!(sm.phase(), GamePhase::Betting);
        assert_eq!(sm.version(), 0);
    }

    #[test]
    fn full_round_cycles_back_to_betting() {
        let mut sm = PhaseMachine::new();
        assert_eq!(sm.apply(PhaseEvent::SpinStarted), Ok(GamePhase::Spinning));
        assert_eq!(sm.apply(PhaseEvent::ResultRevealed), Ok(GamePhase::Results));
        assert_eq!(sm.apply(PhaseEvent::RoundReopened), Ok(GamePhase::Betting));
        assert_eq!(sm.version(), 3);
    }

    #[test]
    fn invalid_transition_returns_error() {
        let mut sm = PhaseMachine::new();
        let err = sm.apply(PhaseEvent::ResultRevealed).unwrap_err();
        assert_eq!(err.from, GamePhase::Betting);
        assert_eq!(err.event, PhaseEvent::ResultRevealed);
        assert_eq!(sm.phase(), GamePhase::Betting);
    }

    #[test]
    fn advancing_never_skips_spinning() {
        let mut sm = PhaseMachine::new();
        assert_eq!(
            sm.advance_to(GamePhase::Results),
            vec![GamePhase::Spinning, GamePhase::Results]
        );
        assert_eq!(
            sm.advance_to(GamePhase::Spinning),
            vec![GamePhase::Betting, GamePhase::Spinning]
        );
        assert!(sm.advance_to(GamePhase::Spinning).is_empty());
    }

    #[test]
    fn legacy_result_label_deserializes() {
        let phase: GamePhase = serde_json::from_str("\"result\"").unwrap();
        assert_eq!(phase, GamePhase::Results);
        assert_eq!(serde_json::to_string(&phase).unwrap(), "\"results\"");
    }
}
