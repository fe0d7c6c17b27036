//! Component wiring.
//!
//! [`Relay`] owns one instance of every component and the channels between
//! them:
//!
//! ```text
//!   devices ──▶ PresenceGateway ──blinks──▶ BlinkInterpreter
//!                  ▲      │                        │
//!   LivenessMonitor      subscribers            intents
//!                                                  ▼
//!                                            DispatchLoop ──▶ webhook
//! ```

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dispatch::{self, DispatchLoop, IntentDispatcher};
use crate::error::{Error, Result};
use crate::gateway::PresenceGateway;
use crate::interpreter::{BlinkInterpreter, BlinkSignal, InterpretedIntent};
use crate::liveness::LivenessMonitor;
use crate::server::{self, AppState};
use crate::shutdown::ShutdownHandle;

/// A fully wired relay.
#[derive(Debug)]
pub struct Relay {
    config: Config,
    gateway: Arc<PresenceGateway>,
    interpreter: BlinkInterpreter,
    dispatcher: Arc<dyn IntentDispatcher>,
    blinks: Option<mpsc::Receiver<BlinkSignal>>,
    intents: Option<mpsc::Receiver<InterpretedIntent>>,
}

impl Relay {
    /// Wire a relay with the system clock and the configured dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the webhook client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let dispatcher = dispatch::from_config(&config)?;
        Ok(Self::with_parts(config, Arc::new(SystemClock), dispatcher))
    }

    /// Wire a relay from explicit parts.
    #[must_use]
    pub fn with_parts(
        config: Config,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn IntentDispatcher>,
    ) -> Self {
        let (blink_tx, blinks) = mpsc::channel(config.interpreter.blink_queue);
        let (intent_tx, intents) = mpsc::channel(config.interpreter.blink_queue);

        let gateway = Arc::new(
            PresenceGateway::new(clock, config.gateway.subscriber_queue).with_interpreter(blink_tx),
        );
        let interpreter = BlinkInterpreter::from_config(&config, intent_tx);

        Self {
            config,
            gateway,
            interpreter,
            dispatcher,
            blinks: Some(blinks),
            intents: Some(intents),
        }
    }

    /// The gateway.
    #[must_use]
    pub fn gateway(&self) -> &Arc<PresenceGateway> {
        &self.gateway
    }

    /// The interpreter.
    #[must_use]
    pub fn interpreter(&self) -> &BlinkInterpreter {
        &self.interpreter
    }

    /// The HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            dispatcher: Arc::clone(&self.dispatcher),
            sse_keepalive: self.config.sse_keepalive(),
        };
        server::router(state, &self.config.server.allowed_origins)
    }

    /// Spawn the interpreter, dispatch loop and liveness monitor.
    ///
    /// The channels are handed to the tasks, so this only spawns once;
    /// later calls spawn the liveness monitor alone.
    pub fn spawn_background(&mut self, shutdown: &ShutdownHandle) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(3);

        if let Some(blinks) = self.blinks.take() {
            tasks.push(tokio::spawn(self.interpreter.clone().run(blinks)));
        }
        if let Some(intents) = self.intents.take() {
            let dispatch_loop = DispatchLoop::new(
                Arc::clone(&self.gateway),
                Arc::clone(&self.dispatcher),
                self.config.profile.clone(),
            );
            tasks.push(tokio::spawn(dispatch_loop.run(intents)));
        }
        tasks.push(tokio::spawn(
            LivenessMonitor::from_config(&self.config).run(Arc::clone(&self.gateway), shutdown.clone()),
        ));

        tasks
    }

    /// Bind, serve until shutdown, then stop the background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or the server fails.
    pub async fn serve(mut self, shutdown: ShutdownHandle) -> Result<()> {
        let address = self.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| Error::Bind {
                address: address.clone(),
                source,
            })?;

        let tasks = self.spawn_background(&shutdown);
        let app = self.router();

        info!(
            address = %address,
            dispatcher = self.dispatcher.name(),
            menu = self.interpreter.menu().len(),
            "Blink relay listening"
        );

        let stop = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.wait().await })
            .await?;

        shutdown.stop();
        for task in tasks {
            task.abort();
        }
        info!("Blink relay stopped");
        Ok(())
    }
}
