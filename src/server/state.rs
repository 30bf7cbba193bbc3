//! Shared application state for the HTTP and websocket transport.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::GlobalConfig;
use crate::delivery::{self, Acknowledgements, DeliveryPolicy, OutputQueue};
use crate::driver::ResponseGenerator;
use crate::settings::{self, SharedSettings};

/// State accessible by every route and connection.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// The agent; inbound frames are applied one at a time.
    pub agent: Mutex<Agent>,
    /// Live settings, shared with the agent.
    pub settings: SharedSettings,
    /// Consumer half of the delivery channel.
    pub output: OutputQueue,
    /// Acknowledged outbound identifiers.
    pub acks: Acknowledgements,
    /// Fires on server shutdown; stops the listener and every connection.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build the state and its agent around `generator`.
    #[must_use]
    pub fn new(config: GlobalConfig, generator: Arc<dyn ResponseGenerator>) -> Arc<Self> {
        let settings = config.agent.shared();
        let (outbox, output) = delivery::channel();
        let agent = Agent::new(Arc::clone(&settings), generator, outbox);
        Arc::new(Self {
            config: Arc::new(config),
            agent: Mutex::new(agent),
            settings,
            output,
            acks: Acknowledgements::default(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Delivery policy reflecting the current `require_acknowledge` setting.
    #[must_use]
    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy::from_config(
            &self.config.delivery,
            settings::current(&self.settings).require_acknowledge,
        )
    }

    /// Whether inbound `{"ack": ..}` messages are currently expected.
    #[must_use]
    pub fn require_acknowledge(&self) -> bool {
        settings::current(&self.settings).require_acknowledge
    }
}
