//! Application entry point and builder pattern implementation.

use crate::{
    config::Config,
    coordinator::{Startup, SystemCoordinator},
};
use anyhow::Result;

/// How a daemon run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Ran until a stop signal or shutdown request.
    Stopped,
    /// Another instance already controls the fan.
    AlreadyRunning,
}

/// Orchestrates the daemon from startup to shutdown through the
/// [`SystemCoordinator`].
///
/// # Example
///
/// ```no_run
/// use hwfand::{application::Application, config::Config};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load(None)?;
/// let mut app = Application::builder().with_config(config).build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
    config: Option<Config>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start services, and
    /// run the main loop. Can only be run once.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let config = self
            .config
            .take()
            .ok_or_else(|| anyhow::anyhow!("Application has already run"))?;

        if self.coordinator.initialize(config).await? == Startup::AlreadyRunning {
            return Ok(RunOutcome::AlreadyRunning);
        }

        self.coordinator.start_all_services().await?;
        self.coordinator.run_main_loop().await?;

        Ok(RunOutcome::Stopped)
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config: Option<Config>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self { config: None }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn build(self) -> Result<Application> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("Configuration is required"))?;

        Ok(Application {
            coordinator: SystemCoordinator::new(),
            config: Some(config),
        })
    }
}
