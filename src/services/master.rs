//! Authoritative display: owns the game state and broadcasts it.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::Mutex,
    time::{Instant, MissedTickBehavior, interval, sleep},
};
use tracing::{debug, info, trace, warn};
use validator::Validate;

use crate::{
    config::SyncConfig,
    display::{
        DisplaySurface,
        observer::{DisplayObservation, ObservationReceiver},
    },
    dto::{
        messages::{Envelope, SyncMessage},
        now_millis,
    },
    services::{forced_number::OverrideTracker, publisher::Publisher, round_data::RoundDataService},
    state::{
        analytics::AnalyticsData,
        game::{BettingState, GameState, RecentNumbers, SpinResult, WheelAnimation},
        state_machine::{GamePhase, PhaseEvent, PhaseMachine},
        store::{GameStateStore, GameStateView},
        wheel,
    },
    transport::TransportResult,
};

/// Delay between `spin_start` and `no_more_bets`.
const NO_MORE_BETS_DELAY: Duration = Duration::from_millis(100);
/// Quiet period before a history change triggers `analytics_full_sync`.
const FULL_SYNC_DEBOUNCE: Duration = Duration::from_millis(100);

/// Clients heard from recently; silent ones expire after a TTL.
pub struct ClientRegistry {
    clients: DashMap<String, Instant>,
    ttl: Duration,
}

impl ClientRegistry {
    /// Registry forgetting clients silent for longer than `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            ttl,
        }
    }

    /// Record a sign of life; returns whether the client was unknown.
    pub fn touch(&self, client_id: &str) -> bool {
        self.clients
            .insert(client_id.to_string(), Instant::now())
            .is_none()
    }

    /// Drop expired clients and return their ids.
    pub fn evict_stale(&self) -> Vec<String> {
        let now = Instant::now();
        let mut evicted = Vec::new();
        self.clients.retain(|client_id, last_seen| {
            let alive = now.duration_since(*last_seen) <= self.ttl;
            if !alive {
                evicted.push(client_id.clone());
            }
            alive
        });
        evicted
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Turns display changes into sync messages and answers client requests.
pub struct MasterCoordinator {
    session_id: String,
    store: GameStateStore,
    phases: Mutex<PhaseMachine>,
    publisher: Publisher,
    display: Arc<dyn DisplaySurface>,
    overrides: Arc<OverrideTracker>,
    round_data: Arc<RoundDataService>,
    clients: ClientRegistry,
    settings: SyncConfig,
    broadcasting: AtomicBool,
    full_sync_generation: AtomicU64,
}

impl MasterCoordinator {
    /// Coordinator for the display `session_id`, reading back from `display`.
    pub fn new(
        session_id: String,
        publisher: Publisher,
        display: Arc<dyn DisplaySurface>,
        overrides: Arc<OverrideTracker>,
        round_data: Arc<RoundDataService>,
        settings: SyncConfig,
    ) -> Arc<Self> {
        let mut state = GameState::new(session_id.clone(), now_millis());
        state.master_id = Some(session_id.clone());
        Arc::new(Self {
            session_id,
            store: GameStateStore::new(state),
            phases: Mutex::new(PhaseMachine::new()),
            publisher,
            display,
            overrides,
            round_data,
            clients: ClientRegistry::new(settings.client_ttl()),
            settings,
            broadcasting: AtomicBool::new(true),
            full_sync_generation: AtomicU64::new(0),
        })
    }

    /// Read-only view of the authoritative state.
    pub fn view(&self) -> GameStateView {
        self.store.view()
    }

    /// Number of clients currently registered.
    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    /// Stop the periodic full-state broadcast.
    pub fn pause_broadcast(&self) {
        if self.broadcasting.swap(false, Ordering::SeqCst) {
            debug!("periodic state broadcast paused");
        }
    }

    /// Restart the periodic full-state broadcast.
    pub fn resume_broadcast(&self) {
        if !self.broadcasting.swap(true, Ordering::SeqCst) {
            debug!("periodic state broadcast resumed");
        }
    }

    /// Serve until the sync channel closes.
    pub async fn run(self: Arc<Self>, mut observations: ObservationReceiver) -> TransportResult<()> {
        let mut inbound = self.publisher.subscribe()?;
        self.capture_state().await;
        info!(
            master_id = %self.session_id,
            transport = self.publisher.channel().kind().as_str(),
            "master coordinator active"
        );

        let mut reconcile = interval(self.settings.state_update_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = reconcile.tick() => {
                    if self.broadcasting.load(Ordering::SeqCst) {
                        self.broadcast_state().await;
                    }
                }
                _ = heartbeat.tick() => self.heartbeat().await,
                Some(observation) = observations.recv() => self.observe(observation).await,
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => {
                        warn!("sync channel closed; master coordinator stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Re-read what the display shows into the state and return a copy.
    pub async fn capture_state(&self) -> GameState {
        let timer = self.display.timer_text();
        let history = self.display.roll_history();
        let visibility = self.display.analytics_visibility();
        let draw_number = self.overrides.draw_number();
        let now = now_millis();

        self.store
            .update(|state| {
                match timer {
                    Ok(text) => {
                        if let Some(ms) = wheel::parse_timer(&text) {
                            state.time_remaining = ms;
                        }
                    }
                    Err(err) => warn!(error = %err, "timer not captured"),
                }
                match history {
                    Ok(numbers) => state.previous_numbers = RecentNumbers::from_numbers(numbers),
                    Err(err) => warn!(error = %err, "roll history not captured"),
                }
                match visibility {
                    Ok(visibility) => state.analytics_state.set_visibility(visibility),
                    Err(err) => warn!(error = %err, "analytics panels not captured"),
                }
                if draw_number.is_some() {
                    state.draw_number = draw_number;
                }
                state.master_id = Some(self.session_id.clone());
                state.session_id = self.session_id.clone();
                state.last_update = now;
                state.clone()
            })
            .await
    }

    /// Capture and publish the full state.
    pub async fn broadcast_state(&self) {
        let state = self.capture_state().await;
        trace!(phase = state.game_phase.as_str(), "broadcasting full state");
        self.publisher
            .publish(SyncMessage::GameState {
                game_state: Box::new(state),
            })
            .await;
    }

    /// Publish the analytics snapshot, optionally replacing its data first.
    pub async fn sync_analytics(&self, refreshed: Option<AnalyticsData>) {
        let now = now_millis();
        let analytics = self
            .store
            .update(|state| {
                if let Some(data) = refreshed {
                    state.analytics_state.analytics_data = data;
                    state.analytics_state.last_analytics_update = Some(now);
                }
                state.analytics_state.clone()
            })
            .await;
        self.publisher
            .publish(SyncMessage::analytics_full_sync(&analytics))
            .await;
    }

    async fn heartbeat(&self) {
        for client_id in self.clients.evict_stale() {
            info!(client_id, "client evicted after missed heartbeats");
        }
        self.publisher
            .publish(SyncMessage::MasterHeartbeat {
                master_id: self.session_id.clone(),
                connected_clients: self.clients.len(),
            })
            .await;
    }

    async fn handle(&self, envelope: Envelope) {
        if let Err(errors) = envelope.message.validate() {
            warn!(message = envelope.message.kind(), error = %errors, "invalid sync message dropped");
            return;
        }

        match &envelope.message {
            SyncMessage::ClientConnect { client_id } => {
                self.clients.touch(client_id);
                info!(client_id, connected = self.clients.len(), "client connected");
                self.broadcast_state().await;
            }
            SyncMessage::ClientHeartbeat { client_id } => {
                if self.clients.touch(client_id) {
                    info!(client_id, "client registered by heartbeat");
                }
            }
            SyncMessage::RequestState { client_id } => {
                self.clients.touch(client_id);
                debug!(client_id, "state requested");
                self.broadcast_state().await;
            }
            SyncMessage::AnalyticsSyncRequest { client_id } => {
                debug!(client_id, "analytics snapshot requested");
                self.sync_analytics(None).await;
            }
            other => {
                trace!(message = other.kind(), "ignored by master");
                return;
            }
        }
        self.publisher.applied(&envelope);
    }

    async fn observe(self: &Arc<Self>, observation: DisplayObservation) {
        let now = now_millis();
        match observation {
            DisplayObservation::TimerText(text) => {
                let Some(time_remaining) = wheel::parse_timer(&text) else {
                    debug!(text, "timer text is not MM:SS; ignored");
                    return;
                };
                self.store
                    .update(|state| {
                        state.time_remaining = time_remaining;
                        state.last_update = now;
                    })
                    .await;
                self.publisher
                    .publish(SyncMessage::TimerUpdate {
                        time_remaining,
                        timer_text: Some(text),
                    })
                    .await;
            }
            DisplayObservation::SpinTriggered => {
                let Some(phase) = self.transition(PhaseEvent::SpinStarted).await else {
                    return;
                };
                let betting_state = BettingState::closed(now);
                self.store
                    .update(|state| {
                        state.game_phase = phase;
                        state.is_spinning = true;
                        state.betting_state = betting_state.clone();
                        state.last_update = now;
                    })
                    .await;
                info!("spin started");
                self.publisher
                    .publish(SyncMessage::SpinStart {
                        game_phase: phase,
                        betting_state,
                    })
                    .await;

                let publisher = self.publisher.clone();
                tokio::spawn(async move {
                    sleep(NO_MORE_BETS_DELAY).await;
                    publisher.publish(SyncMessage::NoMoreBets).await;
                });
            }
            DisplayObservation::WheelVisibility {
                visible: true,
                landing: Some(landing),
            } => {
                self.store
                    .update(|state| {
                        state.is_spinning = true;
                        state.wheel_animation = WheelAnimation {
                            is_active: true,
                            ball_landing_number: Some(landing.pocket),
                            animation_start_time: Some(landing.start_time),
                            animation_duration: landing.duration,
                        };
                        state.last_update = now;
                    })
                    .await;
                self.publisher
                    .publish(SyncMessage::WheelAnimation {
                        winning_number: landing.winning_number,
                        ball_landing_number: landing.pocket,
                        animation_start_time: landing.start_time,
                        animation_duration: landing.duration,
                    })
                    .await;
            }
            DisplayObservation::WheelVisibility { .. } => {
                self.store
                    .update(|state| {
                        state.is_spinning = false;
                        state.wheel_animation.is_active = false;
                        state.last_update = now;
                    })
                    .await;
            }
            DisplayObservation::ResultAlertVisibility {
                visible: true,
                result: Some(result),
            } => {
                let Some(phase) = self.transition(PhaseEvent::ResultRevealed).await else {
                    return;
                };
                let number = result.number;
                let state = self
                    .store
                    .update(|state| {
                        state.game_phase = phase;
                        state.is_spinning = false;
                        state.spin_result = SpinResult::for_number(number, now);
                        state.current_number = Some(number);
                        state.last_update = now;
                        state.clone()
                    })
                    .await;
                info!(number, color = %result.color, "result revealed");
                self.publisher
                    .publish(SyncMessage::spin_result(number, state.previous_numbers.clone()))
                    .await;

                let round_data = self.round_data.clone();
                tokio::spawn(async move { round_data.save_logged(&state).await });
            }
            DisplayObservation::ResultAlertVisibility { visible: false, .. } => {
                let Some(phase) = self.transition(PhaseEvent::RoundReopened).await else {
                    return;
                };
                let betting_state = self
                    .store
                    .update(|state| {
                        state.game_phase = phase;
                        state.betting_state = BettingState::default();
                        state.wheel_animation.is_active = false;
                        state.last_update = now;
                        state.betting_state.clone()
                    })
                    .await;
                self.publisher
                    .publish(SyncMessage::GamePhaseChange {
                        phase,
                        betting_state,
                    })
                    .await;
            }
            DisplayObservation::ResultAlertVisibility { .. } => {}
            DisplayObservation::AnalyticsPanels(visibility) => {
                self.store
                    .update(|state| state.analytics_state.set_visibility(visibility))
                    .await;
                self.publisher
                    .publish(SyncMessage::analytics_visibility(visibility))
                    .await;
            }
            DisplayObservation::AnalyticsData(data) => {
                let analytics_data = *data;
                self.store
                    .update(|state| {
                        state.analytics_state.analytics_data = analytics_data.clone();
                        state.analytics_state.last_analytics_update = Some(now);
                    })
                    .await;
                self.publisher
                    .publish(SyncMessage::AnalyticsData { analytics_data })
                    .await;
            }
            DisplayObservation::NumberHistoryChanged(history) => {
                self.store
                    .update(|state| state.previous_numbers = history)
                    .await;
                self.schedule_full_sync();
            }
        }
    }

    /// Step the authoritative phase; display changes out of round order are dropped.
    async fn transition(&self, event: PhaseEvent) -> Option<GamePhase> {
        match self.phases.lock().await.apply(event) {
            Ok(phase) => Some(phase),
            Err(err) => {
                warn!(error = %err, "display change out of round order ignored");
                None
            }
        }
    }

    fn schedule_full_sync(self: &Arc<Self>) {
        let generation = self.full_sync_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            sleep(FULL_SYNC_DEBOUNCE).await;
            if coordinator.full_sync_generation.load(Ordering::SeqCst) == generation {
                coordinator.sync_analytics(None).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;
    use crate::{
        dao::backend::testing::ScriptedBackend,
        display::{
            ResultView, WheelLanding,
            observer::ObservedDisplay,
            scene::{HistoryChip, Scene, SceneDisplay},
        },
        state::sse::SseHub,
        transport::{
            ChannelFactory, Subscription, TransportKind, TransportSettings, native::NativeRegistry,
            storage::MemoryStorage,
        },
    };

    struct Harness {
        master: Arc<MasterCoordinator>,
        display: Arc<ObservedDisplay>,
        client: Subscription,
        client_channel: crate::transport::SyncChannel,
        saved: Arc<std::sync::Mutex<Vec<crate::dto::backend::SaveRoundRequest>>>,
    }

    fn settings() -> SyncConfig {
        SyncConfig {
            state_update_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(60),
            ..SyncConfig::default()
        }
    }

    fn start(scene: Scene) -> Harness {
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
        let client_channel = factory.open();
        let client = client_channel.subscribe().unwrap();

        let (display, observations) = ObservedDisplay::new(Arc::new(SceneDisplay::with_scene(scene)));
        let display = Arc::new(display);
        let backend = ScriptedBackend::default();
        let saved = backend.saved.clone();
        let master = MasterCoordinator::new(
            "session_master".into(),
            Publisher::new(factory.open(), Arc::new(SseHub::default())),
            display.clone(),
            Arc::new(OverrideTracker::new()),
            Arc::new(RoundDataService::new(Arc::new(backend), Duration::from_secs(1))),
            settings(),
        );
        tokio::spawn(master.clone().run(observations));

        Harness {
            master,
            display,
            client,
            client_channel,
            saved,
        }
    }

    async fn next_message(inbox: &mut Subscription) -> SyncMessage {
        timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("message within a second")
            .expect("channel open")
            .message
    }

    async fn next_targeted(inbox: &mut Subscription) -> SyncMessage {
        loop {
            match next_message(inbox).await {
                SyncMessage::GameState { .. }
                | SyncMessage::MasterHeartbeat { .. }
                | SyncMessage::AnalyticsFullSync { .. } => continue,
                message => return message,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn initial_state_is_captured_from_the_display() {
        let mut harness = start(Scene {
            timer_text: "01:30".into(),
            roll_history: vec![HistoryChip::for_number(17), HistoryChip::for_number(0)],
            ..Scene::default()
        });

        let game_state = loop {
            if let SyncMessage::GameState { game_state } = next_message(&mut harness.client).await {
                break game_state;
            }
        };
        assert_eq!(game_state.time_remaining, 90_000);
        assert_eq!(game_state.previous_numbers.numbers(), vec![17, 0]);
        assert_eq!(game_state.master_id.as_deref(), Some("session_master"));
        assert_eq!(harness.master.view().snapshot().await.time_remaining, 90_000);
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_client_gets_full_state_immediately() {
        let mut harness = start(Scene::default());
        // periodic state and heartbeat fire once at start
        next_message(&mut harness.client).await;
        next_message(&mut harness.client).await;

        harness
            .client_channel
            .send(SyncMessage::ClientConnect {
                client_id: "session_client".into(),
            })
            .await
            .unwrap();

        assert!(matches!(
            next_message(&mut harness.client).await,
            SyncMessage::GameState { .. }
        ));
        assert_eq!(harness.master.connected_clients(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn round_changes_become_targeted_messages() {
        let mut harness = start(Scene::default());
        let display = harness.display.clone();

        display.activate_spin_control().unwrap();
        assert!(matches!(
            next_targeted(&mut harness.client).await,
            SyncMessage::SpinStart { game_phase: GamePhase::Spinning, ref betting_state }
                if !betting_state.bets_allowed
        ));
        assert_eq!(next_targeted(&mut harness.client).await, SyncMessage::NoMoreBets);

        display.show_wheel(WheelLanding::for_number(17, 1_000, 5_000)).unwrap();
        assert_eq!(
            next_targeted(&mut harness.client).await,
            SyncMessage::WheelAnimation {
                winning_number: 17,
                ball_landing_number: wheel::pocket_index(17),
                animation_start_time: 1_000,
                animation_duration: 5_000,
            }
        );

        display.hide_wheel().unwrap();
        display
            .set_roll_history(&RecentNumbers::from_numbers([17, 0]))
            .unwrap();
        display.show_result(&ResultView::for_number(17)).unwrap();
        assert_eq!(
            next_targeted(&mut harness.client).await,
            SyncMessage::spin_result(17, RecentNumbers::from_numbers([17, 0]))
        );

        display.hide_result().unwrap();
        assert!(matches!(
            next_targeted(&mut harness.client).await,
            SyncMessage::GamePhaseChange { phase: GamePhase::Betting, ref betting_state }
                if betting_state.bets_allowed
        ));

        sleep(Duration::from_millis(10)).await;
        let state = harness.master.view().snapshot().await;
        assert_eq!(state.current_number, Some(17));
        assert_eq!(state.game_phase, GamePhase::Betting);
        assert_eq!(state.previous_numbers.numbers(), vec![17, 0]);
        assert_eq!(harness.saved.lock().unwrap()[0].numbers, "17,0");
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_display_changes_never_skip_spinning() {
        let harness = start(Scene::default());
        let display = harness.display.clone();

        // result without a spin
        display.show_result(&ResultView::for_number(17)).unwrap();
        sleep(Duration::from_millis(10)).await;
        let state = harness.master.view().snapshot().await;
        assert_eq!(state.game_phase, GamePhase::Betting);
        assert_eq!(state.current_number, None);

        display.activate_spin_control().unwrap();
        display.hide_result().unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(
            harness.master.view().snapshot().await.game_phase,
            GamePhase::Spinning
        );

        display.show_result(&ResultView::for_number(5)).unwrap();
        // spin pressed while the result is still up
        display.activate_spin_control().unwrap();
        sleep(Duration::from_millis(10)).await;
        let state = harness.master.view().snapshot().await;
        assert_eq!(state.game_phase, GamePhase::Results);
        assert_eq!(state.current_number, Some(5));
        assert_eq!(harness.master.phases.lock().await.version(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn history_change_triggers_one_debounced_full_sync() {
        let mut harness = start(Scene::default());
        next_message(&mut harness.client).await;
        next_message(&mut harness.client).await;

        harness
            .display
            .set_roll_history(&RecentNumbers::from_numbers([3]))
            .unwrap();
        harness
            .display
            .set_roll_history(&RecentNumbers::from_numbers([5, 3]))
            .unwrap();

        assert!(matches!(
            next_message(&mut harness.client).await,
            SyncMessage::AnalyticsFullSync { .. }
        ));
        assert!(
            timeout(Duration::from_secs(1), harness.client.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_clients_are_evicted_after_ttl() {
        let registry = ClientRegistry::new(Duration::from_secs(15));
        assert!(registry.touch("session_a"));
        assert!(!registry.touch("session_a"));

        tokio::time::advance(Duration::from_secs(10)).await;
        registry.touch("session_b");
        assert!(registry.evict_stale().is_empty());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(registry.evict_stale(), vec!["session_a".to_string()]);
        assert_eq!(registry.len(), 1);
    }
}
