// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the background pipeline
//!
//! This module provides command-line functionality for:
//! - Showing the device profile and recommended tier
//! - Resolving tier configurations
//! - Processing still images
//! - Simulating a full camera session

use backdrop::backends::{BuiltinEngineFactory, EngineFactory, LocalTrack, ModelReference};
use backdrop::constants::QualityTier;
use backdrop::media::VideoFrame;
use backdrop::pipelines::resources::decode_image;
use backdrop::pipelines::{
    Backdrop, BackendVariant, BackgroundKind, CustomSettings, LifecycleController,
    PipelineConfiguration, PipelineStatus, SegmentationTransformer, SessionContext,
    spawn_orientation_listener,
};
use backdrop::{Config, DeviceProfile, PipelineError, pipelines};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Delay between simulated camera frames (~30 fps)
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Upper bound on one simulated step
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Print the detected device profile
pub fn show_profile() -> Result<(), Box<dyn std::error::Error>> {
    let profile = DeviceProfile::detect();

    println!("Device profile:");
    println!("  Logical cores: {}", profile.logical_cores);
    match profile.memory_mb {
        Some(mb) => println!("  Memory:        {} MiB", mb),
        None => println!("  Memory:        unknown"),
    }
    println!("  GPU:           {}", if profile.has_gpu { "yes" } else { "no" });
    println!("  Mobile:        {}", if profile.is_mobile { "yes" } else { "no" });
    println!();
    println!("Power level:      {}", profile.power_level());
    println!("Recommended tier: {}", profile.recommended_tier());
    Ok(())
}

/// Print the configuration for a tier as JSON
pub fn resolve_tier(
    tier: QualityTier,
    custom: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let custom: Option<CustomSettings> = custom.map(serde_json::from_str).transpose()?;
    let config = pipelines::resolve(tier, custom.as_ref());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Run the transformer over a still image and save the result
pub fn process_image(
    input: &Path,
    output: &Path,
    tier: Option<QualityTier>,
    background: Option<PathBuf>,
    frames: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let profile = DeviceProfile::detect();
    let settings = Config::load()?;
    let tier = tier.unwrap_or_else(|| settings.initial_tier(&profile));
    let config = pipelines::resolve(tier, settings.custom_settings.as_ref());
    let engines: Arc<dyn EngineFactory> = Arc::new(BuiltinEngineFactory::new(profile.has_gpu));

    println!("Tier: {} (blur radius {}, {} backend)", tier, config.blur_radius, config.backend);

    let rt = tokio::runtime::Runtime::new()?;
    let (frame, backdrop) = rt.block_on(async move {
        let frame = VideoFrame::from_image(decode_image(input).await?);
        let backdrop = match background {
            Some(path) => Backdrop::Image(Arc::new(decode_image(path).await?)),
            None => Backdrop::Blur {
                radius: config.blur_radius,
            },
        };
        Ok::<_, PipelineError>((frame, backdrop))
    })?;
    println!("Input: {} ({})", input.display(), frame.dimensions());

    let mut stage = rt.block_on(init_stage(
        config,
        backdrop,
        engines,
        settings.enhanced_model_path,
    ))?;

    let mut result = frame.clone();
    for _ in 0..frames.max(1) {
        result = stage.transform(frame.clone());
    }
    stage.destroy();

    let image = result.to_image().ok_or("Processed frame has invalid geometry")?;
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    image.save(output)?;
    println!("Saved: {}", output.display());
    Ok(())
}

/// Initialize a stage, falling back to the default backend like a session does
async fn init_stage(
    config: PipelineConfiguration,
    backdrop: Backdrop,
    engines: Arc<dyn EngineFactory>,
    enhanced_model: Option<PathBuf>,
) -> Result<SegmentationTransformer, Box<dyn std::error::Error>> {
    let model = match (config.backend, enhanced_model) {
        (BackendVariant::Enhanced, Some(path)) => ModelReference::with_path(config.backend, path),
        (variant, _) => ModelReference::builtin(variant),
    };
    let stage = SegmentationTransformer::new(config, model, backdrop.clone(), engines.clone());
    match stage.init().await {
        Ok(()) => Ok(stage),
        Err(e) if config.backend == BackendVariant::Enhanced => {
            println!("Enhanced backend unavailable ({}), using default", e);
            let config = PipelineConfiguration {
                backend: BackendVariant::Default,
                ..config
            };
            let stage = SegmentationTransformer::new(
                config,
                ModelReference::builtin(BackendVariant::Default),
                backdrop,
                engines,
            );
            stage.init().await?;
            Ok(stage)
        }
        Err(e) => Err(e.into()),
    }
}

/// Run a session against a simulated track, cycling tiers and backgrounds
pub fn simulate_session(
    input: &Path,
    background: Option<PathBuf>,
    frames: u32,
    mobile: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut profile = DeviceProfile::detect();
    profile.is_mobile |= mobile;
    let settings = Config::load()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let image = decode_image(input).await?;
        let frame = VideoFrame::from_image(image.clone());
        println!("Simulating {} camera with {}", frame.dimensions(), input.display());

        let session = Arc::new(SessionContext::new(
            settings.initial_desired_state(&profile),
            profile,
            settings.session_settings(),
        ));
        let track = Arc::new(LocalTrack::with_dimensions(frame.dimensions()));
        let mut controller = LifecycleController::new(
            session.clone(),
            track.clone(),
            Arc::new(BuiltinEngineFactory::new(profile.has_gpu)),
        );
        if let Some(path) = &settings.enhanced_model_path {
            controller = controller.with_enhanced_model(path);
        }
        let controller = Arc::new(controller);

        let (frame_tx, frame_rx) = watch::channel(frame);
        let running = Arc::new(AtomicBool::new(true));
        let pump = spawn_frame_pump(track.clone(), frame_rx, running.clone());
        let status_printer = spawn_status_printer(session.subscribe_status());

        let (orientation_tx, orientation_rx) = mpsc::channel(4);
        let listener = spawn_orientation_listener(session.clone(), track.clone(), orientation_rx);
        let driver = controller.clone().spawn_driver();
        settle(&session, frames).await;

        let background = background
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string_lossy().into_owned());

        for tier in QualityTier::ALL {
            println!("-- tier {}", tier);
            session.set_tier(tier);
            for kind in [
                BackgroundKind::Blur,
                BackgroundKind::Image,
                BackgroundKind::Upload,
                BackgroundKind::None,
            ] {
                let source = matches!(kind, BackgroundKind::Image | BackgroundKind::Upload)
                    .then(|| background.clone());
                session.select_background(kind, source);
                settle(&session, frames).await;
                println!(
                    "   {:<6} -> {:?} (uploads held: {})",
                    kind,
                    session.status(),
                    controller.active_resources()
                );
            }
        }

        if listener.is_some() {
            println!("-- rotating device");
            let rotated = image::imageops::rotate90(&image);
            frame_tx.send_replace(VideoFrame::from_image(rotated));
            orientation_tx.send(()).await.ok();
            tokio::time::sleep(session.settings().stability.poll_interval * 5).await;
            settle(&session, frames).await;
            println!("   reapply count: {}", session.desired().reapply);
        }

        controller.dispose().await?;
        running.store(false, Ordering::SeqCst);
        drop(orientation_tx);
        driver.await.ok();
        pump.await.ok();
        if let Some(listener) = listener {
            listener.await.ok();
        }
        status_printer.abort();

        println!(
            "Session ended: {} stage swaps, {} detach, {} uploads revoked",
            track.replacement_count(),
            track.detach_count(),
            controller.revoked_resources()
        );
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}

/// Deliver the current source frame to the track at camera rate
fn spawn_frame_pump(
    track: Arc<LocalTrack>,
    frames: watch::Receiver<VideoFrame>,
    running: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while running.load(Ordering::SeqCst) {
            let frame = frames.borrow().clone();
            track.push_frame(frame);
            std::thread::sleep(FRAME_INTERVAL);
        }
    })
}

fn spawn_status_printer(
    mut status: watch::Receiver<PipelineStatus>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if let PipelineStatus::Failed(reason) = &current {
                eprintln!("   pipeline failed: {}", reason);
            }
        }
    })
}

/// Wait for the pending change to be applied, then let some frames through
async fn settle(session: &SessionContext, frames: u32) {
    let mut applying = session.subscribe_applying();
    tokio::time::sleep(FRAME_INTERVAL).await;
    tokio::time::timeout(STEP_TIMEOUT, applying.wait_for(|a| !*a))
        .await
        .ok();
    tokio::time::sleep(FRAME_INTERVAL * frames).await;
}
