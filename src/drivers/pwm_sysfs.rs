//! hwmon `pwmN` driver.

use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::{debug, info};

use crate::{
    error::ControlError,
    fan_controller::FanController,
    hwmon::{HwmonGroup, read_trimmed},
};

/// `pwm_enable` value selecting manual (software) duty control.
const PWM_MODE_MANUAL: &str = "1";

/// Duty control of one channel of a hwmon fan group.
#[derive(Debug, Clone)]
pub struct SysfsPwm {
    pwm: PathBuf,
    enable: PathBuf,
    fan_input: PathBuf,
}

impl SysfsPwm {
    /// Binds to channel `channel` of `group`, which must expose `pwmN`.
    pub fn open(group: &HwmonGroup, channel: u8) -> Result<Self, ControlError> {
        let pwm = group.pwm_path(channel);
        if !pwm.exists() {
            return Err(ControlError::DutyControlMissing { path: pwm });
        }

        Ok(Self {
            pwm,
            enable: group.pwm_enable_path(channel),
            fan_input: group.fan_input_path(channel),
        })
    }

    pub fn path(&self) -> &Path {
        &self.pwm
    }

    /// Takes the channel out of firmware/automatic mode. Channels without a
    /// `pwmN_enable` attribute are always manual.
    pub fn enable_manual(&self) -> Result<(), ControlError> {
        if !self.enable.exists() {
            return Ok(());
        }

        let current = read_trimmed(&self.enable).unwrap_or_default();
        if current == PWM_MODE_MANUAL {
            return Ok(());
        }

        fs::write(&self.enable, PWM_MODE_MANUAL).map_err(|source| ControlError::ManualMode {
            path: self.enable.clone(),
            source,
        })?;
        info!(
            "Switched {} from mode '{current}' to manual",
            self.enable.display()
        );
        Ok(())
    }
}

#[async_trait]
impl FanController for SysfsPwm {
    async fn read_duty(&self) -> Result<u8, ControlError> {
        let raw = read_trimmed(&self.pwm).map_err(|source| ControlError::ActuatorRead {
            path: self.pwm.clone(),
            source,
        })?;

        raw.parse().map_err(|_| ControlError::ActuatorRead {
            path: self.pwm.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("'{raw}' is not a duty value"),
            ),
        })
    }

    async fn write_duty(&self, duty: u8) -> Result<(), ControlError> {
        fs::write(&self.pwm, duty.to_string()).map_err(|source| ControlError::ActuatorWrite {
            duty,
            path: self.pwm.clone(),
            source,
        })?;
        debug!("Wrote duty {duty} to {}", self.pwm.display());
        Ok(())
    }

    async fn read_rpm(&self) -> Option<u32> {
        read_trimmed(&self.fan_input).ok()?.parse().ok()
    }
}
