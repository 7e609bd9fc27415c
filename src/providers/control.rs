use anyhow::Result;
use async_trait::async_trait;
use log::error;
use std::sync::Arc;

use crate::{
    app_context::AppState,
    control_loop::ControlLoop,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
    temperature_sensors::hwmon_sensor::HwmonSensorSource,
};

/// Fan control service provider.
///
/// Runs the [`ControlLoop`] against the fan resolved in [`AppState`]. This
/// is the daemon's reason to exist, so a failure here brings the whole
/// process down: the error is announced as [`Event::ControlFailed`] and the
/// coordinator exits non-zero.
///
/// # Priority and Criticality
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes
pub struct ControlServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl ControlServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }

    fn build_loop(&self) -> ControlLoop {
        let state = &self.state;
        let sensor = HwmonSensorSource::new(&state.config, &state.fan_group);

        ControlLoop::new(
            &state.config,
            Box::new(sensor),
            Box::new(state.pwm.clone()),
            state.initial_duty,
        )
        .with_events(self.event_bus.clone())
    }
}

#[async_trait]
impl ServiceProvider for ControlServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let control = self.build_loop();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                if let Err(e) = control.run(cancel_token).await {
                    error!("Control loop failed: {e}");
                    if event_bus.publish(Event::ControlFailed(e.to_string())).is_err() {
                        error!("Nobody is listening for control failures");
                    }
                    return Err(anyhow::Error::from(e));
                }
                Ok(())
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ControlService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}
