//! Temperature sensor backends.

pub mod hwmon_sensor;
