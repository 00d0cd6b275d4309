// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use backdrop::config::OrientationSettings;
use backdrop::pipelines::{BackgroundKind, CustomSettings};
use backdrop::{Config, DeviceProfile, QualityTier};
use std::time::Duration;

fn desktop(cores: usize, memory_mb: u64, has_gpu: bool) -> DeviceProfile {
    DeviceProfile {
        logical_cores: cores,
        memory_mb: Some(memory_mb),
        has_gpu,
        is_mobile: false,
    }
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.background, BackgroundKind::None);
    assert!(config.quality_tier.is_none(), "Tier should follow the device by default");
    assert!(
        config.hide_video_while_applying,
        "Video should be hidden while applying by default"
    );
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_from(&dir.path().join("missing.json")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let mut config = Config::default();
    config.background = BackgroundKind::Image;
    config.background_source = Some("/usr/share/backgrounds/beach.png".into());
    config.quality_tier = Some(QualityTier::Ultra);
    config.custom_settings = Some(CustomSettings::from(backdrop::pipelines::resolve(
        QualityTier::High,
        None,
    )));
    config.orientation.required_stable_readings = 5;
    config.save_to(&path).unwrap();

    assert_eq!(Config::load_from(&path).unwrap(), config);
}

#[test]
fn test_partial_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "background": "Blur", "quality_tier": "High" }"#).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.background, BackgroundKind::Blur);
    assert_eq!(config.quality_tier, Some(QualityTier::High));
    assert_eq!(config.orientation, OrientationSettings::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(Config::load_from(&path).is_err());
}

#[test]
fn test_device_seeds_tier_only_without_user_choice() {
    let strong = desktop(16, 32768, true);
    let weak = desktop(2, 2048, false);

    let config = Config::default();
    assert_eq!(config.initial_desired_state(&strong).tier, QualityTier::High);
    assert_eq!(config.initial_desired_state(&weak).tier, QualityTier::Low);

    let chosen = Config {
        quality_tier: Some(QualityTier::Medium),
        ..Config::default()
    };
    assert_eq!(chosen.initial_desired_state(&strong).tier, QualityTier::Medium);
    assert_eq!(chosen.initial_desired_state(&weak).tier, QualityTier::Medium);
}

#[test]
fn test_session_settings() {
    let config = Config {
        first_frame_timeout_ms: 250,
        hide_video_while_applying: false,
        ..Config::default()
    };
    let settings = config.session_settings();
    assert_eq!(settings.first_frame_timeout, Duration::from_millis(250));
    assert!(!settings.hide_video_while_applying);
    assert_eq!(settings.stability.poll_interval, Duration::from_millis(100));
}
