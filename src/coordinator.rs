//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::broadcast::{Receiver, error::RecvError},
};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    config::Config,
    event::{Event, EventBus},
    lock::InstanceLock,
    providers::{
        AppStateProvider, AsyncProvider, ControlServiceProvider, ServiceProvider,
        StatusServiceProvider,
    },
    task_manager::TaskManager,
};

/// How `initialize` left the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// Lock taken and hardware resolved; services may start.
    Ready,
    /// Another instance holds the lock. Nothing was touched.
    AlreadyRunning,
}

/// Owns the instance lock, the shared state and every service.
///
/// Services start in priority order; a critical service that fails to start
/// aborts startup. At runtime a [`Event::ControlFailed`] from the control
/// service shuts everything down and surfaces as an error.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    events: Receiver<Event>,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
    instance_lock: Option<InstanceLock>,
    stop: CancellationToken,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        let event_bus = EventBus::new();
        // Subscribed up front so failures during startup are not missed.
        let events = event_bus.subscribe();

        Self {
            task_manager: TaskManager::new(),
            event_bus,
            events,
            shared_state: None,
            service_providers: Vec::new(),
            instance_lock: None,
            stop: CancellationToken::new(),
        }
    }

    /// Takes the instance lock, then the fan.
    pub async fn initialize(&mut self, config: Config) -> Result<Startup> {
        let Some(lock) = InstanceLock::try_acquire(&config.lock_path)? else {
            info!(
                "Another instance holds {}, exiting",
                config.lock_path.display()
            );
            return Ok(Startup::AlreadyRunning);
        };
        self.instance_lock = Some(lock);

        let state = AppStateProvider::new(Arc::new(config))
            .provide()
            .await
            .context("Failed to initialize application state")?;
        self.shared_state = Some(state.clone());

        self.register_service_providers(state);
        Ok(Startup::Ready)
    }

    fn register_service_providers(&mut self, state: Arc<AppState>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(ControlServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(StatusServiceProvider::new(state, self.event_bus.clone())),
        ];

        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    pub async fn start_all_services(&mut self) -> Result<()> {
        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e}",
                        provider.name()
                    );
                }
            }
        }

        Ok(())
    }

    /// Waits for SIGINT, SIGTERM, a control failure or the [`stop_token`](Self::stop_token).
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        info!("Starting main event loop");

        let outcome = loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        break Err(e).context("Failed to listen for SIGINT");
                    }
                    info!("Received SIGINT, shutting down");
                    break Ok(());
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break Ok(());
                }
                () = self.stop.cancelled() => {
                    info!("Stop requested, shutting down");
                    break Ok(());
                }
                event = self.events.recv() => {
                    if let Err(e) = Self::handle_event(event) {
                        break Err(e);
                    }
                }
            }
        };

        self.shutdown().await;
        info!("Main event loop terminated");
        outcome
    }

    fn handle_event(event: Result<Event, RecvError>) -> Result<()> {
        match event {
            Ok(Event::CycleCompleted(status)) => {
                debug!("Cycle completed at duty {}", status.duty);
                Ok(())
            }
            Ok(Event::ControlFailed(reason)) => bail!("Control loop failed: {reason}"),
            Err(RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
                Ok(())
            }
            Err(RecvError::Closed) => bail!("Event bus channel closed unexpectedly"),
        }
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            warn!("Error during task shutdown: {e:#}");
        }
        self.instance_lock = None;

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Cancelling the returned token ends `run_main_loop` as a signal would.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Shared state, once `initialize` has resolved the hardware.
    pub fn state(&self) -> Option<&Arc<AppState>> {
        self.shared_state.as_ref()
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
