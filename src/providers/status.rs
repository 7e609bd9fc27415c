use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Persists every cycle's [`StatusSnapshot`](crate::status::StatusSnapshot)
/// to `status_path` for `hwfand status`.
///
/// Non-critical: the fan keeps being controlled when the status file cannot
/// be written.
pub struct StatusServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl StatusServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for StatusServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let path = self.state.config.status_path.clone();
        let events = self.event_bus.subscribe();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_status_service(path, events, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "StatusService"
    }

    fn priority(&self) -> i32 {
        3
    }
}

async fn run_status_service(
    path: PathBuf,
    mut events: Receiver<Event>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut failing = false;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Status service cancelled");
                break;
            }
            event = events.recv() => match event {
                Ok(Event::CycleCompleted(status)) => match status.save(&path) {
                    Ok(()) => failing = false,
                    Err(e) if !failing => {
                        warn!("Status not saved: {e:#}");
                        failing = true;
                    }
                    Err(_) => {}
                },
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => debug!("Status service skipped {n} snapshots"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
