// SPDX-License-Identifier: GPL-3.0-only

//! Device capability profiling
//!
//! Classifies the running device's power level to seed the default quality
//! tier. The classification never overrides a tier the user picked.

use crate::constants::QualityTier;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Coarse device power classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for PowerLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerLevel::Low => write!(f, "low"),
            PowerLevel::Medium => write!(f, "medium"),
            PowerLevel::High => write!(f, "high"),
        }
    }
}

/// Hardware facts used for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub logical_cores: usize,
    /// Total memory in MiB, when known
    pub memory_mb: Option<u64>,
    pub has_gpu: bool,
    /// Phone or tablet form factor
    pub is_mobile: bool,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            logical_cores: 4,
            memory_mb: None,
            has_gpu: false,
            is_mobile: false,
        }
    }
}

impl DeviceProfile {
    /// Probe the current machine
    pub fn detect() -> Self {
        let profile = Self {
            logical_cores: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            memory_mb: read_total_memory_mb(),
            has_gpu: Path::new("/dev/dri").exists() || Path::new("/dev/nvidia0").exists(),
            is_mobile: read_chassis_type()
                .map(|chassis| matches!(chassis.as_str(), "handset" | "tablet"))
                .unwrap_or(false),
        };
        debug!(?profile, "Detected device profile");
        profile
    }

    pub fn power_level(&self) -> PowerLevel {
        classify(self)
    }

    pub fn recommended_tier(&self) -> QualityTier {
        recommended_tier(classify(self))
    }
}

/// Classify a device profile
pub fn classify(profile: &DeviceProfile) -> PowerLevel {
    let memory = profile.memory_mb.unwrap_or(4096);

    if profile.logical_cores <= 2 || memory <= 2048 {
        return PowerLevel::Low;
    }

    let level = if profile.logical_cores >= 8 && memory >= 8192 && profile.has_gpu {
        PowerLevel::High
    } else {
        PowerLevel::Medium
    };

    // Thermal headroom on phones and tablets does not sustain the top tier
    if profile.is_mobile {
        level.min(PowerLevel::Medium)
    } else {
        level
    }
}

/// Default tier for a power level
pub fn recommended_tier(level: PowerLevel) -> QualityTier {
    match level {
        PowerLevel::Low => QualityTier::Low,
        PowerLevel::Medium => QualityTier::Medium,
        PowerLevel::High => QualityTier::High,
    }
}

fn read_total_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total_mb(&meminfo)
}

fn parse_mem_total_mb(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb / 1024)
}

/// Device-tree chassis type ("handset", "tablet", "laptop", ...)
fn read_chassis_type() -> Option<String> {
    let raw = std::fs::read("/proc/device-tree/chassis-type").ok()?;
    let value = String::from_utf8_lossy(&raw);
    Some(value.trim_end_matches('\0').trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(cores: usize, memory_mb: u64, has_gpu: bool, is_mobile: bool) -> DeviceProfile {
        DeviceProfile {
            logical_cores: cores,
            memory_mb: Some(memory_mb),
            has_gpu,
            is_mobile,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&profile(2, 8192, true, false)), PowerLevel::Low);
        assert_eq!(classify(&profile(8, 1024, true, false)), PowerLevel::Low);
        assert_eq!(classify(&profile(4, 8192, false, false)), PowerLevel::Medium);
        assert_eq!(classify(&profile(16, 32768, true, false)), PowerLevel::High);
    }

    #[test]
    fn test_mobile_is_capped() {
        assert_eq!(classify(&profile(8, 12288, true, true)), PowerLevel::Medium);
        assert_eq!(classify(&profile(2, 2048, true, true)), PowerLevel::Low);
    }

    #[test]
    fn test_meminfo_parsing() {
        let meminfo = "MemTotal:       16303264 kB\nMemFree:         1234 kB\n";
        assert_eq!(parse_mem_total_mb(meminfo), Some(15921));
        assert_eq!(parse_mem_total_mb("garbage"), None);
    }
}
