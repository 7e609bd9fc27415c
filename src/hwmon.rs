//! Hardware-monitor discovery.
//!
//! A hwmon root (normally `/sys/class/hwmon`) holds one entry per chip; each
//! entry carries a `name` attribute plus `tempN_input`, `pwmN`,
//! `pwmN_enable` and `fanN_input` endpoints. Groups are looked up by exact
//! `name` match. Absence is not an error at this layer.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// One hardware-monitor entry, e.g. `nvme@hwmon3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwmonGroup {
    /// Contents of the entry's `name` attribute.
    pub name: String,
    /// Entry directory name (`hwmonN`).
    pub tag: String,
    pub dir: PathBuf,
}

impl HwmonGroup {
    /// Identifier unique across entries sharing the same driver name.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.tag)
    }

    /// Duty-control endpoint `pwmN`.
    pub fn pwm_path(&self, channel: u8) -> PathBuf {
        self.dir.join(format!("pwm{channel}"))
    }

    pub fn pwm_enable_path(&self, channel: u8) -> PathBuf {
        self.dir.join(format!("pwm{channel}_enable"))
    }

    /// Speed-readback endpoint `fanN_input`.
    pub fn fan_input_path(&self, channel: u8) -> PathBuf {
        self.dir.join(format!("fan{channel}_input"))
    }

    /// All `tempN_input` endpoints ordered by N.
    pub fn temperature_inputs(&self) -> Vec<TemperatureInput> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut inputs: Vec<TemperatureInput> = entries
            .flatten()
            .filter_map(|entry| {
                let fname = entry.file_name();
                let index = extract_index(&fname.to_string_lossy(), "temp", "_input")?;
                Some(TemperatureInput {
                    source_id: format!("{}:temp{index}", self.id()),
                    index,
                    path: entry.path(),
                })
            })
            .collect();

        inputs.sort_by_key(|input| input.index);
        inputs
    }
}

/// A single temperature endpoint of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemperatureInput {
    /// `name@hwmonN:tempK`
    pub source_id: String,
    pub index: usize,
    pub path: PathBuf,
}

/// Returns the first group whose `name` equals `name`.
pub fn find_group(root: &Path, name: &str) -> Option<HwmonGroup> {
    scan(root).into_iter().find(|group| group.name == name)
}

/// Returns every group whose `name` equals `name`.
pub fn find_all_groups(root: &Path, name: &str) -> Vec<HwmonGroup> {
    scan(root)
        .into_iter()
        .filter(|group| group.name == name)
        .collect()
}

// Entries ordered by directory name so lookups are deterministic.
fn scan(root: &Path) -> Vec<HwmonGroup> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut groups: Vec<HwmonGroup> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            // Resolve to the actual device dir in case of symlink
            let dir = fs::canonicalize(&path).unwrap_or(path);
            if !dir.is_dir() {
                return None;
            }
            let name = read_trimmed(dir.join("name")).ok()?;
            let tag = entry.file_name().to_string_lossy().into_owned();
            Some(HwmonGroup { name, tag, dir })
        })
        .collect();

    groups.sort_by(|a, b| a.tag.cmp(&b.tag));
    groups
}

pub fn read_trimmed<P: AsRef<Path>>(p: P) -> io::Result<String> {
    fs::read_to_string(p).map(|s| s.trim().to_string())
}

pub fn extract_index(fname: &str, prefix: &str, suffix: &str) -> Option<usize> {
    fname
        .strip_prefix(prefix)?
        .strip_suffix(suffix)?
        .parse()
        .ok()
}
