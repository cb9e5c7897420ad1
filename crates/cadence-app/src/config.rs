// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use cadence_render::{DisplayFormat, PipelineSettings, RenderSize, Rgba};
use cadence_render_vk::VkOptions;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub pacing: PacingCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FormatCfg {
    Bgra8Unorm,
    #[default]
    Bgra8UnormSrgb,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub frames_in_flight: usize,
    pub swapchain_images: u32,
    pub vsync: bool,
    pub format: FormatCfg,
    pub view_capacity: u32,
    pub wait_timeout_ms: u64,
    /// Seconds per animation step; omit to use measured frame time.
    pub fixed_timestep: Option<f32>,
    pub background: Rgba,
    pub foreground: Rgba,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PacingCfg {
    pub loop_sleep_ms: u64,
    pub minimized_sleep_ms: u64,
    pub min_extent: u32,
    pub stats_interval: u32,
    pub missed_frame_ms: u64,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: 960,
            height: 540,
            title: "cadence".into(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();
        RenderCfg {
            frames_in_flight: pipeline.frames_in_flight,
            swapchain_images: 3,
            vsync: true,
            format: FormatCfg::default(),
            view_capacity: pipeline.view_capacity,
            wait_timeout_ms: pipeline.wait_timeout.as_millis() as u64,
            fixed_timestep: None,
            background: pipeline.background,
            foreground: pipeline.foreground,
        }
    }
}

impl Default for PacingCfg {
    fn default() -> Self {
        PacingCfg {
            loop_sleep_ms: 1,
            minimized_sleep_ms: 260,
            min_extent: 2,
            stats_interval: 30,
            missed_frame_ms: 50,
        }
    }
}

impl From<FormatCfg> for DisplayFormat {
    fn from(f: FormatCfg) -> Self {
        match f {
            FormatCfg::Bgra8Unorm => DisplayFormat::Bgra8Unorm,
            FormatCfg::Bgra8UnormSrgb => DisplayFormat::Bgra8UnormSrgb,
        }
    }
}

impl AppCfg {
    pub fn window_size(&self) -> RenderSize {
        RenderSize {
            width: self.window.width,
            height: self.window.height,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            frames_in_flight: self.render.frames_in_flight,
            view_capacity: self.render.view_capacity,
            view_format: self.render.format.into(),
            wait_timeout: Duration::from_millis(self.render.wait_timeout_ms),
            fixed_timestep: self.render.fixed_timestep,
            background: self.render.background,
            foreground: self.render.foreground,
            min_extent: self.pacing.min_extent,
            stats_interval: self.pacing.stats_interval,
            missed_frame_threshold: Duration::from_millis(self.pacing.missed_frame_ms),
            ..PipelineSettings::default()
        }
    }

    pub fn vk_options(&self, no_vsync: bool) -> VkOptions {
        VkOptions {
            image_count: self.render.swapchain_images,
            vsync: self.render.vsync && !no_vsync,
            format: self.render.format.into(),
            acquire_timeout: Duration::from_millis(self.render.wait_timeout_ms),
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// Missing file means defaults; a broken one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no config at {}, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_pipeline() {
        let cfg = AppCfg::default();
        assert_eq!(cfg.pipeline_settings(), PipelineSettings::default());
        assert_eq!(cfg.window_size(), RenderSize { width: 960, height: 540 });
        assert_eq!(cfg.render.swapchain_images, 3);
        assert_eq!(cfg.pacing.minimized_sleep_ms, 260);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            frames_in_flight = 3
            fixed_timestep = 0.016
            format = "bgra8_unorm"

            [pacing]
            stats_interval = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.fixed_timestep, Some(0.016));
        assert_eq!(cfg.render.format, FormatCfg::Bgra8Unorm);
        assert!(cfg.render.vsync);
        assert_eq!(cfg.pacing.stats_interval, 60);
        assert_eq!(cfg.pacing.loop_sleep_ms, 1);
        assert_eq!(cfg.window, WindowCfg::default());

        let settings = cfg.pipeline_settings();
        assert_eq!(settings.frames_in_flight, 3);
        assert_eq!(settings.view_format, DisplayFormat::Bgra8Unorm);
    }

    #[test]
    fn no_vsync_flag_overrides_config() {
        let cfg = AppCfg::default();
        assert!(cfg.vk_options(false).vsync);
        assert!(!cfg.vk_options(true).vsync);
        assert_eq!(cfg.vk_options(false).image_count, 3);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(parse_cfg("[render]\nframes_in_flight = \"two\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("/nonexistent/cadence-test.toml"));
        assert_eq!(cfg, AppCfg::default());
    }
}
