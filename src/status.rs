//! Status snapshot published by the running daemon.

use std::{
    fmt::Write as _,
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Running,
    FailSafe,
}

/// What the last control cycle did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub pid: u32,
    pub mode: Mode,
    /// Duty currently programmed.
    pub duty: u8,
    /// Tier duty the loop is heading for; absent in fail-safe.
    pub target_duty: Option<u8>,
    pub smoothed_millideg: Option<u32>,
    pub hottest_source: Option<String>,
    pub fan_rpm: Option<u32>,
    /// Seconds since the Unix epoch.
    pub updated_at: u64,
}

impl StatusSnapshot {
    pub fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    /// Multi-line report for operators.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mode = match self.mode {
            Mode::Running => "running",
            Mode::FailSafe => "FAIL-SAFE (no valid temperature)",
        };
        let _ = writeln!(out, "mode:        {mode}");
        let percent = u32::from(self.duty) * 100 / 255;
        let _ = writeln!(out, "duty:        {} / 255 ({percent}%)", self.duty);
        if let Some(target) = self.target_duty {
            let _ = writeln!(out, "target:      {target}");
        }
        if let Some(millideg) = self.smoothed_millideg {
            let _ = writeln!(
                out,
                "temperature: {}.{:03} °C (smoothed)",
                millideg / 1000,
                millideg % 1000
            );
        }
        if let Some(source) = &self.hottest_source {
            let _ = writeln!(out, "hottest:     {source}");
        }
        match self.fan_rpm {
            Some(rpm) => {
                let _ = writeln!(out, "fan:         {rpm} RPM");
            }
            None => {
                let _ = writeln!(out, "fan:         no speed readback");
            }
        }
        let _ = write!(out, "pid:         {}", self.pid);
        out
    }

    /// Writes the snapshot as JSON via a temporary file and rename, so
    /// readers never see a partial document.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize status")?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move status to {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read status file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse status file: {}", path.display()))
    }
}
