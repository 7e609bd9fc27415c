//! # hwfand
//!
//! A Linux daemon driving a PWM fan from hwmon temperature sensors.
//!
//! ## Features
//!
//! - **Tiered control**: five duty tiers selected by four temperature breakpoints
//! - **Smoothing**: integer exponential moving average over the hottest sensor
//! - **Stability**: hysteresis at tier boundaries, minimum dwell and a slew limit
//! - **Fail-safe**: full duty whenever no sensor yields a plausible reading
//! - **Single instance**: `flock`-based lock; operator emergency and safe-duty commands
//!
//! ## Architecture
//!
//! The daemon uses a provider-based dependency injection system with:
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Main lifecycle manager
//! - [`EventBus`](event::EventBus) - Inter-service communication
//! - [`AppState`](app_context::AppState) - Hardware resolved at startup
//! - [`ControlLoop`](control_loop::ControlLoop) - The per-cycle pipeline
//!
//! ## Example
//!
//! ```no_run
//! use hwfand::{application::Application, config::Config};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     Application::builder()
//!         .with_config(config)
//!         .build()?
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod app_context;
pub mod application;
pub mod config;
pub mod control_loop;
pub mod coordinator;
pub mod drivers;
pub mod error;
pub mod event;
pub mod fan_controller;
pub mod fan_curve;
pub mod hwmon;
pub mod limits;
pub mod lock;
pub mod operator;
pub mod providers;
pub mod sensors;
pub mod smoothing;
pub mod status;
pub mod task_manager;
pub mod temperature_sensors;
