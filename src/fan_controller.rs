//! Fan actuator abstraction.

use async_trait::async_trait;

use crate::error::ControlError;

/// Trait for the duty-control endpoint of a fan.
///
/// # Example
///
/// ```no_run
/// use hwfand::{error::ControlError, fan_controller::FanController};
///
/// struct Pinned;
///
/// #[async_trait::async_trait]
/// impl FanController for Pinned {
///     async fn read_duty(&self) -> Result<u8, ControlError> { Ok(255) }
///     async fn write_duty(&self, _duty: u8) -> Result<(), ControlError> { Ok(()) }
///     async fn read_rpm(&self) -> Option<u32> { None }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FanController: Send + Sync {
    /// Currently programmed duty (0-255).
    async fn read_duty(&self) -> Result<u8, ControlError>;

    /// Programs a new duty. Failure leaves the physical duty unknown and is fatal.
    async fn write_duty(&self, duty: u8) -> Result<(), ControlError>;

    /// Speed readback, if the fan reports one.
    async fn read_rpm(&self) -> Option<u32>;
}
