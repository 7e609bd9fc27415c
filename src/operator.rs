//! One-shot operator actions that run outside the control loop.

use std::{path::Path, process, time::Duration};

use anyhow::{Context, Result, bail};
use log::{info, warn};
use tokio::time::{Instant, sleep};

use crate::{
    app_context::fan_group, config::Config, drivers::pwm_sysfs::SysfsPwm,
    fan_controller::FanController, lock,
};

const STOP_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(100);

fn signal(pid: i32, sig: libc::c_int) -> bool {
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, sig) == 0 }
}

async fn wait_released(lock_path: &Path, grace: Duration) -> Result<bool> {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !lock::is_held(lock_path)? {
            return Ok(true);
        }
        sleep(POLL).await;
    }
    Ok(!lock::is_held(lock_path)?)
}

/// Stops the daemon holding `lock_path`, escalating from SIGTERM to SIGKILL.
/// Returns `false` when nothing was running.
pub async fn stop_running_instance(lock_path: &Path) -> Result<bool> {
    if !lock::is_held(lock_path)? {
        return Ok(false);
    }

    let Some(pid) = lock::holder_pid(lock_path) else {
        bail!("{} is held but records no PID", lock_path.display());
    };
    if pid <= 0 || pid as u32 == process::id() {
        bail!("Refusing to signal PID {pid} from {}", lock_path.display());
    }

    info!("Stopping running instance (PID {pid})");
    signal(pid, libc::SIGTERM);
    if wait_released(lock_path, STOP_GRACE).await? {
        return Ok(true);
    }

    warn!("PID {pid} ignored SIGTERM, sending SIGKILL");
    signal(pid, libc::SIGKILL);
    if wait_released(lock_path, KILL_GRACE).await? {
        return Ok(true);
    }

    bail!("PID {pid} still holds {}", lock_path.display())
}

/// Stops any running daemon and pins the fan at full duty.
pub async fn emergency_override(config: &Config) -> Result<()> {
    stop_running_instance(&config.lock_path)
        .await
        .context("Failed to stop the running instance")?;

    let group = fan_group(config)?;
    let pwm = SysfsPwm::open(&group, config.groups.pwm_channel)?;
    pwm.enable_manual()?;
    pwm.write_duty(u8::MAX).await?;

    warn!("Emergency override: {} pinned at {}", pwm.path().display(), u8::MAX);
    Ok(())
}

/// Pins the fan at the configured safe duty. Failures are logged and
/// swallowed; returns the duty written, if any.
pub async fn apply_safe_duty(config: &Config) -> Option<u8> {
    let duty = config.control.clamped_safe_duty();

    let result = async {
        let group = fan_group(config)?;
        let pwm = SysfsPwm::open(&group, config.groups.pwm_channel)?;
        pwm.enable_manual()?;
        pwm.write_duty(duty).await
    }
    .await;

    match result {
        Ok(()) => {
            info!("Safe duty {duty} applied");
            Some(duty)
        }
        Err(e) => {
            warn!("Could not apply safe duty {duty}: {e}");
            None
        }
    }
}
