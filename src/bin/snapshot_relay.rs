//! snapshot_relay - push camera snapshots to Prusa Connect
//!
//! This daemon:
//! 1. Loads configuration from an optional file and the environment
//! 2. Verifies the camera answers (fatal if not)
//! 3. Captures a fresh frame every UPLOAD_INTERVAL seconds and uploads it
//! 4. Optionally archives stills and compiles a time-lapse on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use snapshot_relay::config::CONFIG_ENV;
use snapshot_relay::ui::{Ui, UiMode};
use snapshot_relay::{
    CameraSource, CompileOutcome, FingerprintKind, Relay, RelayConfig, SnapshotPublisher,
    Timelapse,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture camera frames and push them to the Prusa Connect snapshot endpoint"
)]
struct Args {
    /// Optional JSON or TOML config file. Environment variables override it.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Capture and upload a single frame, then exit.
    #[arg(long)]
    once: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(UiMode::parse(&args.ui));

    let cfg = RelayConfig::load_from(args.config.as_deref())?;
    match cfg.fingerprint_kind() {
        FingerprintKind::Sha1Hex => log::info!("fingerprint: SHA1 hex"),
        FingerprintKind::Custom => log::info!("fingerprint: custom"),
    }
    log::info!("upload interval: {}s", cfg.upload_interval.as_secs());
    log::info!("snapshot endpoint: {}", cfg.endpoint);

    let mut source = CameraSource::new(cfg.stream_config())?;
    log::info!("camera stream: {}", source.display_url());

    let timelapse = match cfg.timelapse_config() {
        Some(tl_cfg) => {
            log::info!(
                "timelapse enabled: saving every {}s to {}, {} FPS",
                tl_cfg.save_interval.as_secs(),
                tl_cfg.dir.display(),
                tl_cfg.fps
            );
            let mut timelapse = Timelapse::new(tl_cfg);
            timelapse.prepare()?;
            Some(timelapse)
        }
        None => None,
    };

    {
        let _stage = ui.stage("Test camera connection");
        source
            .try_capture()
            .map_err(|e| anyhow!("cannot connect to camera {}: {:#}", source.display_url(), e))?;
    }
    log::info!("camera connection working; starting frame upload");

    let publisher = SnapshotPublisher::new(cfg.publisher_config());
    let mut relay = Relay::new(source, publisher, cfg.relay_settings());
    if let Some(timelapse) = timelapse {
        relay = relay.with_timelapse(timelapse);
    }

    let summary = if args.once {
        relay.run_once(&ui)
    } else {
        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
        relay.run(&rx, &ui)
    };

    if let Some(CompileOutcome::Created(video)) = &summary.timelapse {
        log::info!("timelapse written to {}", video.path.display());
    }
    Ok(())
}
