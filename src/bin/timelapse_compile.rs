//! timelapse_compile - assemble an existing still archive into a video

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use snapshot_relay::timelapse::{self, video, CompileOutcome};
use snapshot_relay::ui::{Ui, UiMode};

#[derive(Parser, Debug)]
#[command(author, version, about = "Compile archived time-lapse stills into a video")]
struct Args {
    /// Directory holding the archived stills.
    #[arg(long, env = "TIMELAPSE_DIR", default_value = timelapse::DEFAULT_TIMELAPSE_DIR)]
    dir: PathBuf,

    /// Output frame rate.
    #[arg(long, env = "TIMELAPSE_FPS", default_value_t = timelapse::DEFAULT_FPS)]
    fps: u32,

    /// Directory the video is written to.
    #[arg(long, env = "TIMELAPSE_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::detect(UiMode::parse(&args.ui));

    let frames = timelapse::list_frames(&args.dir)?;
    match video::compile(&frames, args.fps, &args.output_dir, &ui)? {
        CompileOutcome::Created(summary) => {
            println!("{}", summary.path.display());
            Ok(())
        }
        CompileOutcome::InsufficientFrames { found } => Err(anyhow!(
            "not enough frames in {} to create a timelapse (found: {})",
            args.dir.display(),
            found
        )),
    }
}
