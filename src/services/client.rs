//! Mirror display: renders only what the master dictates.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::Mutex,
    time::{Instant, MissedTickBehavior, interval},
};
use tracing::{debug, info, trace, warn};
use validator::Validate;

use crate::{
    config::SyncConfig,
    display::{DisplayResult, DisplaySurface, ResultView, WheelLanding},
    dto::{
        messages::{Envelope, SyncMessage},
        now_millis,
    },
    services::{forced_number::OverrideTracker, publisher::Publisher},
    state::{
        analytics::AnalyticsVisibility,
        game::{GameState, SpinResult, WheelAnimation},
        state_machine::{GamePhase, PhaseMachine},
        store::{GameStateStore, GameStateView},
        wheel,
    },
    transport::TransportResult,
};

/// Applies master broadcasts to the local replica and display.
pub struct ClientCoordinator {
    session_id: String,
    store: GameStateStore,
    phases: Mutex<PhaseMachine>,
    publisher: Publisher,
    display: Arc<dyn DisplaySurface>,
    overrides: Arc<OverrideTracker>,
    settings: SyncConfig,
    last_message: Mutex<Instant>,
    last_state_timestamp: AtomicU64,
}

impl ClientCoordinator {
    /// Coordinator for the display `session_id`.
    pub fn new(
        session_id: String,
        publisher: Publisher,
        display: Arc<dyn DisplaySurface>,
        overrides: Arc<OverrideTracker>,
        settings: SyncConfig,
    ) -> Arc<Self> {
        let state = GameState::new(session_id.clone(), now_millis());
        Arc::new(Self {
            session_id,
            store: GameStateStore::new(state),
            phases: Mutex::new(PhaseMachine::new()),
            publisher,
            display,
            overrides,
            settings,
            last_message: Mutex::new(Instant::now()),
            last_state_timestamp: AtomicU64::new(0),
        })
    }

    /// Read-only view of the replica.
    pub fn view(&self) -> GameStateView {
        self.store.view()
    }

    /// Phase transitions applied so far.
    pub async fn phase_transitions(&self) -> usize {
        self.phases.lock().await.version()
    }

    /// Announce this display and mirror the master until the channel closes.
    pub async fn run(self: Arc<Self>) -> TransportResult<()> {
        let mut inbound = self.publisher.subscribe()?;
        self.render(self.display.set_betting_enabled(false));
        info!(client_id = %self.session_id, "client coordinator active; local betting disabled");

        self.publisher
            .publish(SyncMessage::ClientConnect {
                client_id: self.session_id.clone(),
            })
            .await;
        self.request_analytics().await;

        let mut heartbeat = interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.reset();
        let mut watchdog = interval(self.settings.state_request_timeout);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Skip);
        watchdog.reset();
        let mut overrides = self.overrides.subscribe();

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.publisher
                        .publish(SyncMessage::ClientHeartbeat {
                            client_id: self.session_id.clone(),
                        })
                        .await;
                }
                _ = watchdog.tick() => self.check_staleness().await,
                Ok(()) = overrides.changed() => self.enforce_override().await,
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.apply(envelope).await,
                    None => {
                        warn!("sync channel closed; client coordinator stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Ask the master for the full state.
    pub async fn request_state(&self) {
        self.publisher
            .publish(SyncMessage::RequestState {
                client_id: self.session_id.clone(),
            })
            .await;
    }

    /// Ask the master for an analytics snapshot.
    pub async fn request_analytics(&self) {
        self.publisher
            .publish(SyncMessage::AnalyticsSyncRequest {
                client_id: self.session_id.clone(),
            })
            .await;
    }

    async fn check_staleness(&self) {
        let silent_for = self.last_message.lock().await.elapsed();
        if silent_for >= self.settings.state_request_timeout {
            debug!(silent_ms = silent_for.as_millis() as u64, "master silent; requesting state");
            self.request_state().await;
        }
    }

    /// Apply one envelope from the channel.
    pub async fn apply(&self, envelope: Envelope) {
        if let Err(errors) = envelope.message.validate() {
            warn!(message = envelope.message.kind(), error = %errors, "invalid sync message dropped");
            return;
        }
        *self.last_message.lock().await = Instant::now();

        if self.is_stale(&envelope) {
            debug!(
                message = envelope.message.kind(),
                timestamp = envelope.timestamp,
                "targeted message older than the applied state; dropped"
            );
            return;
        }

        match envelope.message.clone() {
            SyncMessage::GameState { game_state } => {
                self.last_state_timestamp
                    .fetch_max(envelope.timestamp, Ordering::SeqCst);
                self.apply_game_state(*game_state).await;
            }
            SyncMessage::TimerUpdate {
                time_remaining,
                timer_text,
            } => {
                self.store
                    .update(|state| state.time_remaining = time_remaining)
                    .await;
                let text = timer_text.unwrap_or_else(|| wheel::format_timer(time_remaining));
                self.render_timer(&text, time_remaining);
            }
            SyncMessage::SpinStart { betting_state, .. } => {
                self.enter_phase(GamePhase::Spinning).await;
                self.store
                    .update(|state| {
                        state.is_spinning = true;
                        state.betting_state = betting_state;
                    })
                    .await;
                self.render(self.display.set_betting_enabled(false));
                self.render(
                    self.display
                        .set_analytics_visibility(AnalyticsVisibility::default()),
                );
            }
            SyncMessage::WheelAnimation {
                winning_number,
                ball_landing_number,
                animation_start_time,
                animation_duration,
            } => {
                self.enter_phase(GamePhase::Spinning).await;
                let landing = match self.overrides.mode().forced_number() {
                    Some(forced) => {
                        WheelLanding::for_number(forced, animation_start_time, animation_duration)
                    }
                    None => WheelLanding {
                        winning_number,
                        pocket: ball_landing_number,
                        degrees: wheel::landing_degrees(ball_landing_number),
                        start_time: animation_start_time,
                        duration: animation_duration,
                    },
                };
                self.store
                    .update(|state| {
                        state.is_spinning = true;
                        state.wheel_animation = WheelAnimation {
                            is_active: true,
                            ball_landing_number: Some(landing.pocket),
                            animation_start_time: Some(animation_start_time),
                            animation_duration,
                        };
                    })
                    .await;
                self.render(self.display.show_wheel(landing));
            }
            SyncMessage::SpinResult {
                winning_number,
                previous_numbers,
                ..
            } => {
                self.enter_phase(GamePhase::Results).await;
                let number = self
                    .overrides
                    .mode()
                    .forced_number()
                    .unwrap_or(winning_number);
                self.store
                    .update(|state| {
                        state.is_spinning = false;
                        state.wheel_animation.is_active = false;
                        state.spin_result = SpinResult::for_number(number, envelope.timestamp);
                        state.current_number = Some(number);
                        state.previous_numbers = previous_numbers.clone();
                    })
                    .await;
                self.render(self.display.hide_wheel());
                self.render(self.display.set_roll_history(&previous_numbers));
                self.render(self.display.show_result(&ResultView::for_number(number)));
            }
            SyncMessage::GamePhaseChange {
                phase,
                betting_state,
            } => {
                self.enter_phase(phase).await;
                let bets_allowed = betting_state.bets_allowed;
                let visibility = self
                    .store
                    .update(|state| {
                        state.betting_state = betting_state;
                        state.analytics_state.visibility()
                    })
                    .await;
                self.render(self.display.set_betting_enabled(bets_allowed));
                if phase == GamePhase::Betting {
                    self.render(self.display.hide_result());
                    self.render(self.display.hide_wheel());
                    self.render(self.display.set_analytics_visibility(visibility));
                }
            }
            SyncMessage::NoMoreBets => {
                self.store
                    .update(|state| state.betting_state.bets_allowed = false)
                    .await;
                self.render(self.display.set_betting_enabled(false));
            }
            SyncMessage::AnalyticsVisibility {
                panels_visible,
                left_sidebar_visible,
                right_sidebar_visible,
            } => {
                let visibility = AnalyticsVisibility {
                    panels_visible,
                    left_sidebar_visible,
                    right_sidebar_visible,
                };
                self.store
                    .update(|state| state.analytics_state.set_visibility(visibility))
                    .await;
                self.render(self.display.set_analytics_visibility(visibility));
            }
            SyncMessage::AnalyticsData { analytics_data } => {
                self.render(self.display.set_analytics_data(&analytics_data));
                self.store
                    .update(|state| {
                        state.analytics_state.analytics_data = analytics_data;
                        state.analytics_state.last_analytics_update = Some(envelope.timestamp);
                    })
                    .await;
            }
            SyncMessage::AnalyticsFullSync {
                analytics_data,
                panels_visible,
                left_sidebar_visible,
                right_sidebar_visible,
                last_analytics_update,
            } => {
                let visibility = AnalyticsVisibility {
                    panels_visible,
                    left_sidebar_visible,
                    right_sidebar_visible,
                };
                self.render(self.display.set_analytics_data(&analytics_data));
                let phase = self
                    .store
                    .update(|state| {
                        state.analytics_state.analytics_data = analytics_data;
                        state.analytics_state.set_visibility(visibility);
                        state.analytics_state.last_analytics_update =
                            last_analytics_update.or(Some(envelope.timestamp));
                        state.game_phase
                    })
                    .await;
                if phase != GamePhase::Spinning {
                    self.render(self.display.set_analytics_visibility(visibility));
                }
            }
            SyncMessage::MasterHeartbeat {
                master_id,
                connected_clients,
            } => {
                let previous = self
                    .store
                    .update(|state| state.master_id.replace(master_id.clone()))
                    .await;
                if previous.as_deref() != Some(master_id.as_str()) {
                    info!(master_id, connected_clients, "following master");
                } else {
                    trace!(master_id, connected_clients, "master heartbeat");
                }
            }
            SyncMessage::Unknown => {
                debug!("unknown sync message ignored");
                return;
            }
            other => {
                trace!(message = other.kind(), "client request ignored by client");
                return;
            }
        }
        self.publisher.applied(&envelope);
    }

    fn is_stale(&self, envelope: &Envelope) -> bool {
        if self.settings.apply_targeted_unconditionally {
            return false;
        }
        let targeted = !matches!(
            envelope.message,
            SyncMessage::GameState { .. } | SyncMessage::MasterHeartbeat { .. }
        );
        targeted && envelope.timestamp < self.last_state_timestamp.load(Ordering::SeqCst)
    }

    async fn apply_game_state(&self, mut incoming: GameState) {
        let entered = self.enter_phase(incoming.game_phase).await;
        if self.overrides.enforce(&mut incoming) {
            debug!("full state pinned to the forced number");
        }
        incoming.session_id = self.session_id.clone();

        let previous = self.store.snapshot().await;
        self.store.replace(incoming.clone()).await;

        self.render_timer(&incoming.timer_text(), incoming.time_remaining);
        self.render(self.display.set_roll_history(&incoming.previous_numbers));
        self.render(
            self.display
                .set_betting_enabled(incoming.betting_state.bets_allowed),
        );

        if entered.contains(&GamePhase::Spinning) && incoming.wheel_animation.is_active {
            if let (Some(pocket), Some(start_time)) = (
                incoming.wheel_animation.ball_landing_number,
                incoming.wheel_animation.animation_start_time,
            ) {
                let number = wheel::WHEEL_LAYOUT[pocket % wheel::POCKET_COUNT];
                self.render(self.display.show_wheel(WheelLanding::for_number(
                    number,
                    start_time,
                    incoming.wheel_animation.animation_duration,
                )));
            }
        }
        match incoming.game_phase {
            GamePhase::Results if entered.contains(&GamePhase::Results) => {
                if let Some(number) = incoming.spin_result.winning_number {
                    self.render(self.display.hide_wheel());
                    self.render(self.display.show_result(&ResultView::for_number(number)));
                }
            }
            GamePhase::Betting if !entered.is_empty() => {
                self.render(self.display.hide_result());
                self.render(self.display.hide_wheel());
            }
            _ => {}
        }

        let visibility = if incoming.game_phase == GamePhase::Spinning {
            AnalyticsVisibility::default()
        } else {
            incoming.analytics_state.visibility()
        };
        self.render(self.display.set_analytics_visibility(visibility));
        if previous.analytics_state.analytics_data != incoming.analytics_state.analytics_data {
            self.render(
                self.display
                    .set_analytics_data(&incoming.analytics_state.analytics_data),
            );
        }
    }

    /// Walk the phase machine to `target` and mirror it on the display.
    async fn enter_phase(&self, target: GamePhase) -> Vec<GamePhase> {
        let entered = self.phases.lock().await.advance_to(target);
        if entered.len() > 1 {
            debug!(?entered, "missed phase changes replayed");
        }
        if !entered.is_empty() {
            self.store.update(|state| state.game_phase = target).await;
            self.render(self.display.set_game_phase(target));
        }
        entered
    }

    /// Re-pin the displayed result after the override changed.
    async fn enforce_override(&self) {
        let pinned = self
            .store
            .update(|state| {
                if self.overrides.enforce(state) {
                    state.spin_result.winning_number
                } else {
                    None
                }
            })
            .await;
        if let Some(number) = pinned {
            debug!(number, "displayed result pinned to the forced number");
            self.render(self.display.show_result(&ResultView::for_number(number)));
        }
    }

    fn render_timer(&self, text: &str, time_remaining: u64) {
        let threshold = Duration::from_secs(self.settings.timer_warning_threshold_secs);
        let warning = Duration::from_millis(time_remaining) <= threshold;
        self.render(self.display.set_timer_text(text, warning));
    }

    fn render(&self, result: DisplayResult) {
        if let Err(err) = result {
            warn!(error = %err, "display update skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::{
        display::scene::{HistoryChip, SceneDisplay},
        state::{
            game::{BettingState, RecentNumbers},
            manual_override::ManualOverride,
            sse::SseHub,
            wheel::PocketColor,
        },
        transport::{
            ChannelFactory, Subscription, SyncChannel, TransportKind, TransportSettings,
            native::NativeRegistry, storage::MemoryStorage,
        },
    };

    struct Harness {
        client: Arc<ClientCoordinator>,
        scene: Arc<SceneDisplay>,
        overrides: Arc<OverrideTracker>,
        master: SyncChannel,
        master_inbox: Subscription,
    }

    fn start(settings: SyncConfig) -> Harness {
        let factory = ChannelFactory::new(
            Arc::new(NativeRegistry::new()),
            Arc::new(MemoryStorage::new()),
            TransportSettings {
                preferred: TransportKind::Native,
                channel_name: "roulette-sync-channel".into(),
                storage_key: "roulette-game-state".into(),
                poll_interval: Duration::from_secs(1),
            },
        );
        let master = factory.open();
        let master_inbox = master.subscribe().unwrap();
        let scene = Arc::new(SceneDisplay::new());
        let overrides = Arc::new(OverrideTracker::new());
        let client = ClientCoordinator::new(
            "session_client".into(),
            Publisher::new(factory.open(), Arc::new(SseHub::default())),
            scene.clone(),
            overrides.clone(),
            settings,
        );
        Harness {
            client,
            scene,
            overrides,
            master,
            master_inbox,
        }
    }

    async fn next_message(inbox: &mut Subscription) -> SyncMessage {
        timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("message within five seconds")
            .expect("channel open")
            .message
    }

    fn envelope(message: SyncMessage, timestamp: u64) -> Envelope {
        Envelope {
            message,
            timestamp,
            origin: Some("master".into()),
        }
    }

    fn full_state(phase: GamePhase, numbers: &[u8]) -> SyncMessage {
        let mut state = GameState::new("session_master", 1);
        state.master_id = Some("session_master".into());
        state.game_phase = phase;
        state.time_remaining = 42_000;
        state.previous_numbers = RecentNumbers::from_numbers(numbers.iter().copied());
        if let Some(latest) = numbers.first() {
            state.spin_result = SpinResult::for_number(*latest, 1);
            state.current_number = Some(*latest);
        }
        SyncMessage::GameState {
            game_state: Box::new(state),
        }
    }

    #[tokio::test]
    async fn applying_the_same_state_twice_renders_the_same() {
        let harness = start(SyncConfig::default());
        let message = full_state(GamePhase::Betting, &[17, 0, 5]);

        harness.client.apply(envelope(message.clone(), 10)).await;
        let first = harness.scene.snapshot();
        let first_state = harness.client.view().snapshot().await;

        harness.client.apply(envelope(message, 10)).await;
        assert_eq!(harness.scene.snapshot(), first);
        assert_eq!(harness.client.view().snapshot().await, first_state);
        assert_eq!(first_state.previous_numbers.len(), 3);
        assert_eq!(first.timer_text, "00:42");
    }

    #[tokio::test]
    async fn spin_result_scenario_renders_result_and_chips() {
        let harness = start(SyncConfig::default());
        let scenario = Envelope::from_json_str(
            r#"{"type":"spin_result","winningNumber":17,"color":"black","isHighLow":"LOW",
                "isOddEven":"ODD","previousNumbers":[{"number":17,"color":"black"},
                {"number":0,"color":"green"}],"timestamp":5}"#,
        )
        .unwrap();

        harness.client.apply(scenario).await;

        let scene = harness.scene.snapshot();
        assert!(scene.result_visible);
        assert_eq!(scene.result_text, "17");
        assert_eq!(scene.result_class, "roll-black");
        assert_eq!(
            scene.roll_history[..2],
            [HistoryChip::for_number(17), HistoryChip::for_number(0)]
        );
        assert_eq!(scene.roll_history[1].class, "roll-green");
    }

    #[tokio::test]
    async fn phases_never_skip_spinning() {
        let harness = start(SyncConfig::default());

        harness
            .client
            .apply(envelope(SyncMessage::spin_result(8, RecentNumbers::from_numbers([8])), 1))
            .await;
        assert_eq!(harness.client.phase_transitions().await, 2);

        harness
            .client
            .apply(envelope(
                SyncMessage::SpinStart {
                    game_phase: GamePhase::Spinning,
                    betting_state: BettingState::closed(2),
                },
                2,
            ))
            .await;
        // results -> betting -> spinning
        assert_eq!(harness.client.phase_transitions().await, 4);

        harness
            .client
            .apply(envelope(full_state(GamePhase::Spinning, &[8]), 3))
            .await;
        assert_eq!(harness.client.phase_transitions().await, 4);
        assert_eq!(harness.scene.snapshot().game_phase, GamePhase::Spinning);
    }

    #[tokio::test]
    async fn timer_updates_prefer_literal_text_and_warn_when_low() {
        let harness = start(SyncConfig::default());

        harness
            .client
            .apply(envelope(
                SyncMessage::TimerUpdate {
                    time_remaining: 42_400,
                    timer_text: Some("00:43".into()),
                },
                1,
            ))
            .await;
        let scene = harness.scene.snapshot();
        assert_eq!(scene.timer_text, "00:43");
        assert!(!scene.timer_warning);

        harness
            .client
            .apply(envelope(
                SyncMessage::TimerUpdate {
                    time_remaining: 9_000,
                    timer_text: None,
                },
                2,
            ))
            .await;
        let scene = harness.scene.snapshot();
        assert_eq!(scene.timer_text, "00:09");
        assert!(scene.timer_warning);
    }

    #[tokio::test]
    async fn local_override_decides_the_rendered_result() {
        let harness = start(SyncConfig::default());
        harness
            .overrides
            .apply(ManualOverride::manual(0, Some(PocketColor::Green), Some(42)));

        harness
            .client
            .apply(envelope(
                SyncMessage::WheelAnimation {
                    winning_number: 23,
                    ball_landing_number: wheel::pocket_index(23),
                    animation_start_time: 1,
                    animation_duration: 5_000,
                },
                1,
            ))
            .await;
        harness
            .client
            .apply(envelope(SyncMessage::spin_result(23, RecentNumbers::from_numbers([23])), 2))
            .await;

        let scene = harness.scene.snapshot();
        assert_eq!(scene.wheel_landing.map(|l| l.pocket), Some(wheel::pocket_index(0)));
        assert_eq!(scene.result_text, "0");
        assert_eq!(scene.result_class, "roll-green");
        assert_eq!(scene.result_high_low, "");
        assert_eq!(scene.result_odd_even, "");
    }

    #[tokio::test]
    async fn analytics_hide_during_spin_and_return_for_betting() {
        let harness = start(SyncConfig::default());
        let shown = AnalyticsVisibility::from_sidebars(true, false);
        harness
            .client
            .apply(envelope(SyncMessage::analytics_visibility(shown), 1))
            .await;

        harness
            .client
            .apply(envelope(
                SyncMessage::SpinStart {
                    game_phase: GamePhase::Spinning,
                    betting_state: BettingState::closed(2),
                },
                2,
            ))
            .await;
        assert_eq!(harness.scene.snapshot().analytics, AnalyticsVisibility::default());
        assert!(!harness.scene.snapshot().betting_enabled);

        harness
            .client
            .apply(envelope(SyncMessage::spin_result(4, RecentNumbers::from_numbers([4])), 3))
            .await;
        harness
            .client
            .apply(envelope(
                SyncMessage::GamePhaseChange {
                    phase: GamePhase::Betting,
                    betting_state: BettingState::default(),
                },
                4,
            ))
            .await;
        let scene = harness.scene.snapshot();
        assert_eq!(scene.analytics, shown);
        assert!(!scene.result_visible);
        assert!(!scene.wheel_visible);
        assert!(scene.betting_enabled);
    }

    #[tokio::test]
    async fn stale_targeted_messages_are_dropped_when_ordering_is_enforced() {
        let harness = start(SyncConfig {
            apply_targeted_unconditionally: false,
            ..SyncConfig::default()
        });
        harness
            .client
            .apply(envelope(full_state(GamePhase::Betting, &[]), 100))
            .await;
        harness
            .client
            .apply(envelope(
                SyncMessage::TimerUpdate {
                    time_remaining: 1_000,
                    timer_text: None,
                },
                50,
            ))
            .await;
        assert_eq!(harness.scene.snapshot().timer_text, "00:42");
    }

    #[tokio::test(start_paused = true)]
    async fn client_announces_itself_and_requests_state_when_master_is_silent() {
        let mut harness = start(SyncConfig {
            heartbeat_interval: Duration::from_secs(60),
            state_request_timeout: Duration::from_secs(3),
            ..SyncConfig::default()
        });
        tokio::spawn(harness.client.clone().run());

        let inbox = &mut harness.master_inbox;
        let client_id = "session_client".to_string();
        assert_eq!(
            next_message(inbox).await,
            SyncMessage::ClientConnect { client_id: client_id.clone() }
        );
        assert_eq!(
            next_message(inbox).await,
            SyncMessage::AnalyticsSyncRequest { client_id: client_id.clone() }
        );
        assert_eq!(next_message(inbox).await, SyncMessage::RequestState { client_id });
    }

    #[tokio::test(start_paused = true)]
    async fn messages_from_the_master_keep_the_watchdog_quiet() {
        let mut harness = start(SyncConfig {
            heartbeat_interval: Duration::from_secs(60),
            state_request_timeout: Duration::from_secs(3),
            ..SyncConfig::default()
        });
        tokio::spawn(harness.client.clone().run());
        // connect + analytics request
        harness.master_inbox.recv().await.unwrap();
        harness.master_inbox.recv().await.unwrap();

        for _ in 0..4 {
            harness
                .master
                .send(full_state(GamePhase::Betting, &[1]))
                .await
                .unwrap();
            sleep(Duration::from_secs(1)).await;
        }
        assert!(
            timeout(Duration::from_millis(10), harness.master_inbox.recv())
                .await
                .is_err()
        );
        assert_eq!(harness.scene.snapshot().roll_history.len(), 1);
    }
}
