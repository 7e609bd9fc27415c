//! Application state shared by the daemon's services.

use std::sync::Arc;

use log::info;

use crate::{
    config::Config,
    drivers::pwm_sysfs::SysfsPwm,
    error::ControlError,
    fan_controller::FanController,
    hwmon::{self, HwmonGroup},
};

/// Resolves the mandatory fan group named in `config`.
pub fn fan_group(config: &Config) -> Result<HwmonGroup, ControlError> {
    hwmon::find_group(&config.hwmon_root, &config.groups.fan).ok_or_else(|| {
        ControlError::GroupMissing {
            name: config.groups.fan.clone(),
            root: config.hwmon_root.clone(),
        }
    })
}

/// Hardware resolved at startup, before any service runs.
pub struct AppState {
    pub config: Arc<Config>,
    pub fan_group: HwmonGroup,
    /// Duty-control channel, already switched to manual mode.
    pub pwm: SysfsPwm,
    /// Duty the fan was running at when the daemon took over.
    pub initial_duty: u8,
}

impl AppState {
    /// Finds the fan group, takes manual control of its channel and reads
    /// back the duty currently programmed. Every failure here is fatal.
    pub async fn new(config: Arc<Config>) -> Result<Self, ControlError> {
        let fan_group = fan_group(&config)?;
        let pwm = SysfsPwm::open(&fan_group, config.groups.pwm_channel)?;
        pwm.enable_manual()?;
        let initial_duty = pwm.read_duty().await?;

        info!(
            "Using {} channel {} ({}), current duty {initial_duty}",
            fan_group.id(),
            config.groups.pwm_channel,
            pwm.path().display()
        );

        Ok(Self {
            config,
            fan_group,
            pwm,
            initial_duty,
        })
    }
}
