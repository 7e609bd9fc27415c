//! Fan actuator drivers.

pub mod pwm_sysfs;
