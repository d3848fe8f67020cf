//! Assembles one display node: channel endpoint, role coordinator, round
//! engine, forced-number poller and the visibility registrations.

use std::{
    future::{self, Ready},
    sync::{Arc, Mutex},
};

use tracing::{debug, error, info, warn};

use crate::{
    config::{AppConfig, Role},
    dao::{BackendError, GameBackend},
    display::{DisplaySurface, observer::ObservedDisplay, scene::SceneDisplay},
    services::{
        client::ClientCoordinator,
        engine::RoundEngine,
        forced_number::{ForcedNumberPoller, OverrideTracker},
        master::MasterCoordinator,
        publisher::Publisher,
        round_data::RoundDataService,
        visibility::{HandlerError, TabVisibilityCoordinator, VisibilityHandler},
    },
    state::{AppState, RoleCoordinator, SharedState, SseHub},
    transport::{ChannelFactory, session::generate_session_id},
};

const SSE_CAPACITY: usize = 256;

/// Start every background task of a node and return the shared state.
pub async fn start(
    config: AppConfig,
    factory: ChannelFactory,
    backend: Arc<dyn GameBackend>,
) -> SharedState {
    let session_id = generate_session_id();
    let events = Arc::new(SseHub::new(SSE_CAPACITY));
    let publisher = Publisher::new(factory.open(), events.clone());
    let overrides = Arc::new(OverrideTracker::new());
    let round_data = Arc::new(RoundDataService::new(
        backend.clone(),
        config.backend.unload_flush_timeout,
    ));
    let visibility = TabVisibilityCoordinator::new(config.visibility.clone());
    let scene = Arc::new(SceneDisplay::new());
    let mut tasks = Vec::new();

    let poller = config.forced_number.is_enabled().then(|| {
        Arc::new(ForcedNumberPoller::new(
            overrides.clone(),
            backend.clone(),
            config.forced_number.poll_interval,
        ))
    });
    if let Some(poller) = &poller {
        tasks.push(tokio::spawn(poller.clone().run()));
        let (hidden, visible) = (poller.clone(), poller.clone());
        visibility
            .register(
                VisibilityHandler::new("forcedNumberPolling")
                    .priority(30)
                    .on_hidden(move || {
                        hidden.pause();
                        done()
                    })
                    .on_visible(move || {
                        visible.resume();
                        done()
                    }),
            )
            .await;
    }

    let (coordinator, engine) = match config.role {
        Role::Master => {
            let (observed, observations) =
                ObservedDisplay::new(scene.clone() as Arc<dyn DisplaySurface>);
            let display: Arc<dyn DisplaySurface> = Arc::new(observed);
            let engine = Arc::new(RoundEngine::new(
                display.clone(),
                overrides.clone(),
                config.round.clone(),
                config.sync.timer_warning_threshold_secs,
            ));
            let master = MasterCoordinator::new(
                session_id.clone(),
                publisher.clone(),
                display,
                overrides.clone(),
                round_data.clone(),
                config.sync.clone(),
            );

            let runner = master.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = runner.run(observations).await {
                    error!(error = %err, "master coordinator failed");
                }
            }));

            let (master_c, engine_c, round_data_c) =
                (master.clone(), engine.clone(), round_data.clone());
            tasks.push(tokio::spawn(async move {
                match reload_analytics(master_c, engine_c, round_data_c).await {
                    Ok(()) => {}
                    Err(HandlerError::Backend(err @ BackendError::MissingEndpoint { .. })) => {
                        debug!(error = %err, "no analytics backend; starting with local spin log")
                    }
                    Err(err) => warn!(error = %err, "initial analytics load failed"),
                }
            }));

            let (hidden, visible) = (master.clone(), master.clone());
            visibility
                .register(
                    VisibilityHandler::new("stateBroadcast")
                        .priority(20)
                        .on_hidden(move || {
                            hidden.pause_broadcast();
                            done()
                        })
                        .on_visible(move || {
                            visible.resume_broadcast();
                            done()
                        }),
                )
                .await;

            let reload_master = master.clone();
            let reload_data = round_data.clone();
            visibility
                .register(
                    VisibilityHandler::new("analyticsReload")
                        .priority(10)
                        .allow_catch_up(true)
                        .on_visible({
                            let engine = engine.clone();
                            move || {
                                reload_analytics(
                                    reload_master.clone(),
                                    engine.clone(),
                                    reload_data.clone(),
                                )
                            }
                        }),
                )
                .await;

            (RoleCoordinator::Master(master), engine)
        }
        Role::Client => {
            let display: Arc<dyn DisplaySurface> = scene.clone();
            let engine = Arc::new(RoundEngine::new(
                display.clone(),
                overrides.clone(),
                config.round.clone(),
                config.sync.timer_warning_threshold_secs,
            ));
            engine.suppress();

            let client = ClientCoordinator::new(
                session_id.clone(),
                publisher.clone(),
                display,
                overrides.clone(),
                config.sync.clone(),
            );
            let runner = client.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(err) = runner.run().await {
                    error!(error = %err, "client coordinator failed");
                }
            }));

            let resync = client.clone();
            visibility
                .register(
                    VisibilityHandler::new("stateResync")
                        .priority(20)
                        .allow_catch_up(true)
                        .on_visible(move || resync_state(resync.clone())),
                )
                .await;

            (RoleCoordinator::Client(client), engine)
        }
    };
    // a suppressed engine leaves its loop at once; only the master plays rounds
    tasks.push(tokio::spawn(engine.clone().run()));

    info!(
        session_id = %session_id,
        role = config.role.as_str(),
        transport = publisher.channel().kind().as_str(),
        forced_number_polling = poller.is_some(),
        "display node started"
    );

    Arc::new(AppState {
        config,
        session_id,
        factory,
        publisher,
        events,
        coordinator,
        overrides,
        engine,
        poller,
        visibility,
        round_data,
        scene,
        tasks: Mutex::new(tasks),
    })
}

/// Stop background work, flush the round data on a master and close the
/// node's endpoint.
pub async fn shutdown(state: &SharedState) {
    state.abort_tasks();
    if let RoleCoordinator::Master(master) = &state.coordinator {
        let snapshot = master.view().snapshot().await;
        state.round_data.flush_on_unload(&snapshot).await;
    }
    state.publisher.channel().close();
    info!(session_id = %state.session_id, "display node stopped");
}

fn done() -> Ready<Result<(), HandlerError>> {
    future::ready(Ok(()))
}

async fn reload_analytics(
    master: Arc<MasterCoordinator>,
    engine: Arc<RoundEngine>,
    round_data: Arc<RoundDataService>,
) -> Result<(), HandlerError> {
    let spins = round_data.load_spin_log().await?;
    let data = engine.load_spin_log(spins).await;
    master.sync_analytics(Some(data)).await;
    Ok(())
}

async fn resync_state(client: Arc<ClientCoordinator>) -> Result<(), HandlerError> {
    client.request_state().await;
    client.request_analytics().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::sleep;

    use super::*;
    use crate::{
        config::RoundConfig,
        dao::backend::testing::ScriptedBackend,
        transport::{native::NativeRegistry, storage::MemoryStorage},
    };

    fn config(role: Role) -> AppConfig {
        AppConfig {
            role,
            round: RoundConfig {
                round_duration: Duration::from_secs(3),
                wheel_animation_duration: Duration::from_secs(1),
                result_display_duration: Duration::from_secs(1),
            },
            ..AppConfig::default()
        }
    }

    fn factory(config: &AppConfig) -> ChannelFactory {
        ChannelFactory::new(
            Arc::new(NativeRegistry::new()),
            Arc::new(MemoryStorage::new()),
            config.transport_settings(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn client_converges_on_the_master_history() {
        let master_config = config(Role::Master);
        let factory = factory(&master_config);
        let master = start(
            master_config,
            factory.clone(),
            Arc::new(ScriptedBackend::default()),
        )
        .await;
        let client = start(
            config(Role::Client),
            factory,
            Arc::new(ScriptedBackend::default()),
        )
        .await;

        sleep(Duration::from_secs(12)).await;

        let on_master = master.coordinator().view().snapshot().await;
        let on_client = client.coordinator().view().snapshot().await;
        assert!(!on_master.previous_numbers.is_empty());
        assert_eq!(
            on_client.previous_numbers.numbers(),
            on_master.previous_numbers.numbers()
        );
        assert_eq!(master.connected_clients(), 1);
        assert_eq!(
            client.scene().snapshot().roll_history.len(),
            on_master.previous_numbers.numbers().len()
        );

        shutdown(&client).await;
        shutdown(&master).await;
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_master_plays_rounds_locally() {
        let master_config = config(Role::Master);
        let factory = factory(&master_config);
        let master = start(master_config, factory.clone(), Arc::new(ScriptedBackend::default())).await;
        let client = start(config(Role::Client), factory, Arc::new(ScriptedBackend::default())).await;

        sleep(Duration::from_secs(12)).await;

        assert!(!master.engine().is_suppressed());
        assert!(master.scene().snapshot().spin_presses > 0);
        assert!(client.engine().is_suppressed());
        assert_eq!(client.scene().snapshot().spin_presses, 0);
        assert!(client.scene().snapshot().spins_started > 0);

        shutdown(&client).await;
        shutdown(&master).await;
    }

    #[tokio::test(start_paused = true)]
    async fn registrations_follow_the_role() {
        let master_config = config(Role::Master);
        let factory = factory(&master_config);
        let master = start(master_config, factory.clone(), Arc::new(ScriptedBackend::default())).await;
        let client = start(config(Role::Client), factory, Arc::new(ScriptedBackend::default())).await;

        assert!(master.visibility().unregister("stateBroadcast").await);
        assert!(master.visibility().unregister("analyticsReload").await);
        assert!(!master.visibility().unregister("stateResync").await);
        assert!(client.visibility().unregister("stateResync").await);
        assert!(!client.visibility().unregister("forcedNumberPolling").await);

        shutdown(&client).await;
        shutdown(&master).await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_the_master_round_data() {
        let backend = ScriptedBackend::default();
        let saved = backend.saved.clone();
        let master = start(
            config(Role::Master),
            factory(&config(Role::Master)),
            Arc::new(backend),
        )
        .await;

        sleep(Duration::from_millis(100)).await;
        let before = saved.lock().unwrap().len();
        shutdown(&master).await;
        assert_eq!(saved.lock().unwrap().len(), before + 1);
    }
}
