use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::FutureExt;
use futures::future::BoxFuture;
use scene_sentinel::core_modules::utils::image_helper::{ImageSequenceSource, JpegDirectoryStore};
use scene_sentinel::{
    AlertPayload, AlertSink, CycleOutcome, DeliveryResult, ExportFormat, MonitorConfig,
    MonitorEvent, MonitorSettings, MonitoringScheduler, load_settings,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_TICK_MS: u64 = 200;

/// Prints alerts instead of pushing them to a device.
struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn deliver(&self, payload: AlertPayload) -> BoxFuture<'_, DeliveryResult> {
        async move {
            info!(
                title = %payload.title,
                body = %payload.body,
                push = payload.push,
                sound = payload.sound.is_some(),
                vibrate = payload.vibrate.is_some(),
                "alert"
            );
            Ok(())
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: sentinel_tester <frames_dir> [settings.json] [screenshot_dir] [tick_ms]");
        return Ok(());
    }
    let frames_dir = PathBuf::from(&args[1]);
    let settings = match args.get(2) {
        Some(path) => load_settings(Path::new(path)).with_context(|| format!("loading {}", path))?,
        None => MonitorSettings::default(),
    };
    let tick_ms = match args.get(4) {
        Some(ms) => ms.parse::<u64>().context("tick_ms must be a whole number of milliseconds")?,
        None => DEFAULT_TICK_MS,
    };

    // --- 2. Frame Source ---
    let source = ImageSequenceSource::from_dir(&frames_dir)?;
    if source.len() < 2 {
        bail!("{} needs at least two images", frames_dir.display());
    }
    info!(frames = source.len(), dir = %frames_dir.display(), "replaying image sequence");

    // --- 3. Scheduler Initialization ---
    let mut builder = MonitoringScheduler::builder(Arc::new(source), Arc::new(LoggingAlertSink))
        .config(MonitorConfig::new().with_tick_interval(Duration::from_millis(tick_ms)))
        .settings(settings.into_handle());
    if let Some(dir) = args.get(3) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir))?;
        builder = builder.screenshot_store(Arc::new(JpegDirectoryStore::new(dir)));
    }
    let scheduler = builder.build();
    let mut events = scheduler.subscribe();
    scheduler
        .start()
        .await
        .context("capturing the reference frame")?;

    // --- 4. Main Processing Loop ---
    loop {
        match events.recv().await {
            Ok(MonitorEvent::Cycle(CycleOutcome::CaptureFailed(reason))) => {
                info!(%reason, "no more frames");
                break;
            }
            Ok(MonitorEvent::Cycle(CycleOutcome::Alerted(event))) => {
                info!(id = %event.id, description = %event.description, "detection recorded");
                // Acknowledge right away so every scene change in the replay is reported.
                if let Err(e) = scheduler.reset_reference().await {
                    info!(error = %e, "could not adopt a new reference, ending replay");
                    break;
                }
            }
            Ok(MonitorEvent::Cycle(outcome)) => debug!(?outcome, "cycle"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    scheduler.stop().await;

    // --- 5. Report ---
    let history = scheduler.history().await;
    info!(detections = history.len(), "replay finished");
    let export = scheduler.export_history(ExportFormat::PlainText).await;
    print!("{}", String::from_utf8_lossy(&export));

    Ok(())
}
