pub mod analytics;
pub mod game;
pub mod manual_override;
pub(crate) mod sse;
pub mod state_machine;
pub mod store;
pub mod wheel;

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::{
    config::{AppConfig, Role},
    display::scene::SceneDisplay,
    services::{
        client::ClientCoordinator,
        engine::RoundEngine,
        forced_number::{ForcedNumberPoller, OverrideTracker},
        master::MasterCoordinator,
        publisher::Publisher,
        round_data::RoundDataService,
        visibility::TabVisibilityCoordinator,
    },
    state::store::GameStateView,
    transport::{ChannelFactory, TransportKind},
};

pub use self::sse::{EventDirection, SseHub, SyncEvent};

pub type SharedState = Arc<AppState>;

/// Coordinator driving this node, by role.
pub enum RoleCoordinator {
    /// Authoritative display.
    Master(Arc<MasterCoordinator>),
    /// Mirror display.
    Client(Arc<ClientCoordinator>),
}

impl RoleCoordinator {
    /// Role of the node.
    pub fn role(&self) -> Role {
        match self {
            RoleCoordinator::Master(_) => Role::Master,
            RoleCoordinator::Client(_) => Role::Client,
        }
    }

    /// Read-only view of the node's game state.
    pub fn view(&self) -> GameStateView {
        match self {
            RoleCoordinator::Master(master) => master.view(),
            RoleCoordinator::Client(client) => client.view(),
        }
    }
}

/// Everything a running display node shares with its routes and tasks.
pub struct AppState {
    pub(crate) config: AppConfig,
    pub(crate) session_id: String,
    pub(crate) factory: ChannelFactory,
    pub(crate) publisher: Publisher,
    pub(crate) events: Arc<SseHub>,
    pub(crate) coordinator: RoleCoordinator,
    pub(crate) overrides: Arc<OverrideTracker>,
    pub(crate) engine: Arc<RoundEngine>,
    pub(crate) poller: Option<Arc<ForcedNumberPoller>>,
    pub(crate) visibility: Arc<TabVisibilityCoordinator>,
    pub(crate) round_data: Arc<RoundDataService>,
    pub(crate) scene: Arc<SceneDisplay>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppState {
    /// Loaded configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Session id of this display.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Role of this display.
    pub fn role(&self) -> Role {
        self.coordinator.role()
    }

    /// Opens further endpoints on the session channel.
    pub fn channel_factory(&self) -> &ChannelFactory {
        &self.factory
    }

    /// This node's own endpoint.
    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Hub feeding the SSE stream.
    pub fn events(&self) -> &SseHub {
        &self.events
    }

    /// Role coordinator.
    pub fn coordinator(&self) -> &RoleCoordinator {
        &self.coordinator
    }

    /// Forced-number state.
    pub fn overrides(&self) -> &OverrideTracker {
        &self.overrides
    }

    /// Local round loop; suppressed on a client.
    pub fn engine(&self) -> &RoundEngine {
        &self.engine
    }

    /// Visibility dispatcher.
    pub fn visibility(&self) -> &Arc<TabVisibilityCoordinator> {
        &self.visibility
    }

    /// Round persistence.
    pub fn round_data(&self) -> &RoundDataService {
        &self.round_data
    }

    /// Rendered content of this node's display.
    pub fn scene(&self) -> &SceneDisplay {
        &self.scene
    }

    /// Transport carrying this node's endpoint.
    pub fn transport(&self) -> TransportKind {
        self.publisher.channel().kind()
    }

    /// Whether the forced-number backend answered the last check.
    pub fn is_backend_healthy(&self) -> bool {
        self.poller.as_ref().is_none_or(|poller| poller.is_healthy())
    }

    /// Clients known to the master; zero on a client node.
    pub fn connected_clients(&self) -> usize {
        match &self.coordinator {
            RoleCoordinator::Master(master) => master.connected_clients(),
            RoleCoordinator::Client(_) => 0,
        }
    }

    /// Keep `task` until shutdown.
    pub(crate) fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }

    /// Abort every background task.
    pub(crate) fn abort_tasks(&self) {
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for task in tasks {
            task.abort();
        }
    }
}
