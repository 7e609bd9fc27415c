use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;

use crate::{
    config::Config,
    hwmon::{self, HwmonGroup, TemperatureInput, read_trimmed},
    sensors::{Reading, TemperatureSensor, parse_millidegrees},
};

/// Reads every temperature endpoint of the fan group, the optional CPU
/// group and all storage-device groups.
///
/// The fan group's endpoints are enumerated once; the CPU and storage groups
/// are looked up again every cycle since drives and their drivers come and go.
pub struct HwmonSensorSource {
    root: PathBuf,
    fan_inputs: Vec<TemperatureInput>,
    cpu_group: Option<String>,
    storage_groups: Vec<String>,
}

impl HwmonSensorSource {
    pub fn new(config: &Config, fan_group: &HwmonGroup) -> Self {
        Self {
            root: config.hwmon_root.clone(),
            fan_inputs: fan_group.temperature_inputs(),
            cpu_group: config.groups.cpu.clone(),
            storage_groups: config.groups.storage.clone(),
        }
    }

    fn dynamic_inputs(&self) -> Vec<TemperatureInput> {
        let cpu = self
            .cpu_group
            .iter()
            .filter_map(|name| hwmon::find_group(&self.root, name));
        let storage = self
            .storage_groups
            .iter()
            .flat_map(|name| hwmon::find_all_groups(&self.root, name));

        cpu.chain(storage)
            .flat_map(|group| group.temperature_inputs())
            .collect()
    }
}

fn sample(input: &TemperatureInput) -> Option<Reading> {
    let raw = match read_trimmed(&input.path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("{}: read failed: {e}", input.source_id);
            return None;
        }
    };

    let Some(millidegrees) = parse_millidegrees(&raw) else {
        debug!("{}: unparsable value '{raw}'", input.source_id);
        return None;
    };

    Some(Reading::new(input.source_id.clone(), millidegrees))
}

#[async_trait]
impl TemperatureSensor for HwmonSensorSource {
    async fn read_all(&self) -> Vec<Reading> {
        let dynamic = self.dynamic_inputs();
        self.fan_inputs
            .iter()
            .chain(dynamic.iter())
            .filter_map(sample)
            .collect()
    }
}
