// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cadence_core::{init_tracing, FrameStats};
use cadence_platform::winit::{
    event_loop::EventLoop,
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
};
use cadence_platform::WindowHost;
use cadence_render::{FramePipeline, RenderSize, Tick};
use clap::Parser;
use tracing::{error, info};

mod config;

use config::load_cfg;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = "cadence.toml")]
    config: PathBuf,
    /// Exit after this many frames
    #[arg(long)]
    max_frames: Option<u64>,
    /// Present without waiting for vblank
    #[arg(long)]
    no_vsync: bool,
}

fn title_with_stats(title: &str, stats: FrameStats) -> String {
    format!("{title}: ms = {:5.3} ({:5.2} fps)", stats.frame_ms, stats.fps)
}

/// GPU state is unknown after any pipeline error, so running destructors
/// could block on work that never finishes.
fn fatal(err: &dyn std::error::Error) -> ! {
    error!("fatal: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        error!("  caused by: {cause}");
        source = cause.source();
    }
    std::process::abort();
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    info!(
        "cadence starting (slots={}, images={}, vsync={})",
        cfg.render.frames_in_flight,
        cfg.render.swapchain_images,
        cfg.render.vsync && !args.no_vsync
    );

    // Declaration order matters: the pipeline drops first, then the window
    // its surface was created from, then the event loop.
    let mut event_loop = EventLoop::new().context("EventLoop::new")?;
    let mut host = WindowHost::new(&cfg.window.title, cfg.window_size());

    while host.window().is_none() {
        if let PumpStatus::Exit(code) =
            event_loop.pump_app_events(Some(Duration::from_millis(16)), &mut host)
        {
            bail!("event loop exited ({code}) before a window was created");
        }
        if host.state().exit_requested {
            host.require_window()?;
            return Ok(());
        }
    }

    let (device, swapchain) = {
        let window = host.require_window()?;
        let size = window.inner_size();
        let size = RenderSize {
            width: size.width.max(1),
            height: size.height.max(1),
        };
        cadence_render_vk::create(window, window, size, cfg.vk_options(args.no_vsync))
            .context("vulkan init")?
    };
    let mut pipeline =
        FramePipeline::new(device, swapchain, cfg.pipeline_settings()).context("frame pipeline")?;

    let loop_sleep = Duration::from_millis(cfg.pacing.loop_sleep_ms);
    let minimized_sleep = Duration::from_millis(cfg.pacing.minimized_sleep_ms);

    loop {
        if !loop_sleep.is_zero() {
            thread::sleep(loop_sleep);
        }
        if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(Duration::ZERO), &mut host)
        {
            info!("event loop exit ({code})");
            break;
        }
        if host.state().exit_requested {
            break;
        }

        match pipeline.advance(host.state_mut()) {
            Ok(Tick::Minimized) => thread::sleep(minimized_sleep),
            Ok(Tick::Frame(report)) => {
                host.state_mut().repaint_requested = false;
                if let Some(stats) = report.stats {
                    host.set_title(&title_with_stats(&cfg.window.title, stats));
                }
            }
            Err(e) => fatal(&e),
        }

        if args.max_frames.is_some_and(|n| pipeline.cycle() >= n) {
            info!("reached {} frames", pipeline.cycle());
            break;
        }
    }

    if let Err(e) = pipeline.shutdown() {
        fatal(&e);
    }
    info!("bye");
    Ok(())
}
