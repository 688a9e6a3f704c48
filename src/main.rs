use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs;
use std::ops::ControlFlow;
use std::path::PathBuf;

use avatar_lipsync::{AnalyzerConfig, AnimationState, AvatarContext, FrameLoop, WavPlayback};

/// Play an audio file and drive the avatar lip-sync pipeline against it,
/// printing what a renderer would consume.
#[derive(Parser)]
#[command(name = "lipsync-demo")]
struct Args {
    /// Audio file to play (wav, flac, ogg, mp3)
    audio: PathBuf,

    /// Analyzer configuration as JSON (fft_size, smoothing_factor, ...)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print every morph-target frame as a JSON line
    #[arg(long)]
    dump_frames: bool,

    /// Playback volume, 0.0 to 1.0
    #[arg(long, default_value_t = 1.0)]
    volume: f32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: AnalyzerConfig =
                serde_json::from_str(&text).context("parsing analyzer config")?;
            config.validate()?;
            Some(config)
        }
        None => None,
    };

    let mut playback = WavPlayback::new().context("opening audio output")?;
    playback
        .load_file(&args.audio)
        .with_context(|| format!("loading {}", args.audio.display()))?;
    playback.set_volume(args.volume);

    let mut context = match config {
        Some(config) => AvatarContext::with_config(playback, config),
        None => AvatarContext::new(playback),
    };
    context.source_mut().play();

    info!("lip-sync demo running at 60 fps");

    let dump_frames = args.dump_frames;
    let frame_loop = FrameLoop::new(60);
    frame_loop.run(|now_ms| {
        let frame = context.tick(now_ms);

        if dump_frames {
            if let Ok(line) = serde_json::to_string(&frame) {
                println!("{line}");
            }
        }

        // Let the ended transition settle to idle before exiting.
        if context.source().is_finished() && context.state() == AnimationState::Idle {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    let fps = context
        .controller()
        .analyzer_frame_rate()
        .unwrap_or_default();
    info!("playback finished (analyzer rate estimate {fps:.1}/s)");
    context.destroy();

    Ok(())
}
