// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use trine_core::mib;
use trine_render_vk::pipeline::ShaderPaths;
use trine_render_vk::VkConfig;

pub const MAX_FRAMES_IN_FLIGHT: usize = 3;
pub const MAX_ARENA_MIB: usize = 4096;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file; missing file means defaults
    #[arg(long, default_value = "trine.toml")]
    pub config: PathBuf,

    /// Override [render].frames_in_flight (1..=3)
    #[arg(long)]
    pub frames_in_flight: Option<usize>,

    /// Never enable the Vulkan validation layer
    #[arg(long)]
    pub no_validation: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "trine (hello, triangle!)".into(),
            width: 1920 / 2,
            height: 1080 / 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub validation: bool,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub arena_mib: usize,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            vertex_shader: "res/shaders/vert.spv".into(),
            fragment_shader: "res/shaders/frag.spv".into(),
            arena_mib: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Missing file gives defaults; an unreadable or malformed one is logged
    /// and also gives defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(src) => match Self::parse(&src) {
                Ok(cfg) => {
                    info!("config: {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("config {} is malformed, using defaults: {e}", path.display());
                    Self::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("config: {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("config {} unreadable, using defaults: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Command-line switches win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
        if args.no_validation {
            self.render.validation = false;
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        let n = self.render.frames_in_flight;
        let clamped = n.clamp(1, MAX_FRAMES_IN_FLIGHT);
        if clamped != n {
            warn!("frames_in_flight = {n} out of range, using {clamped}");
        }
        clamped
    }

    pub fn arena_mib(&self) -> usize {
        let n = self.render.arena_mib;
        let clamped = n.clamp(1, MAX_ARENA_MIB);
        if clamped != n {
            warn!("arena_mib = {n} out of range, using {clamped}");
        }
        clamped
    }

    pub fn vk(&self) -> VkConfig {
        VkConfig {
            app_name: self.window.title.clone(),
            frames_in_flight: self.frames_in_flight(),
            validation: self.render.validation,
            shaders: ShaderPaths {
                vertex: self.render.vertex_shader.clone(),
                fragment: self.render.fragment_shader.clone(),
            },
            arena_bytes: mib(self.arena_mib()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.title, "trine (hello, triangle!)");
        assert_eq!((cfg.window.width, cfg.window.height), (960, 540));
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.arena_mib, 100);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            frames_in_flight = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.vertex_shader, PathBuf::from("res/shaders/vert.spv"));
        assert_eq!(cfg.window, WindowCfg::default());
    }

    #[test]
    fn malformed_is_an_error() {
        assert!(AppCfg::parse("[render]\nframes_in_flight = \"two\"").is_err());
        assert!(AppCfg::parse("[window").is_err());
    }

    #[test]
    fn load_falls_back_on_missing_and_malformed_files() {
        let dir = std::env::temp_dir().join(format!("trine-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        assert_eq!(AppCfg::load(&dir.join("absent.toml")), AppCfg::default());

        let bad = dir.join("bad.toml");
        fs::write(&bad, "[window]\nwidth = -1\n").unwrap();
        assert_eq!(AppCfg::load(&bad), AppCfg::default());

        let good = dir.join("good.toml");
        fs::write(&good, "[window]\ntitle = \"t\"\n").unwrap();
        assert_eq!(AppCfg::load(&good).window.title, "t");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut cfg = AppCfg::default();
        cfg.render.frames_in_flight = 0;
        assert_eq!(cfg.frames_in_flight(), 1);
        cfg.render.frames_in_flight = 8;
        assert_eq!(cfg.vk().frames_in_flight, 3);
    }

    #[test]
    fn arena_size_is_clamped_instead_of_overflowing() {
        let cfg = AppCfg::parse("[render]\narena_mib = 18446744073709551\n").unwrap();
        assert_eq!(cfg.arena_mib(), MAX_ARENA_MIB);
        assert_eq!(cfg.vk().arena_bytes, MAX_ARENA_MIB * 1024 * 1024);

        let cfg = AppCfg::parse("[render]\narena_mib = 0\n").unwrap();
        assert_eq!(cfg.vk().arena_bytes, 1024 * 1024);
    }

    #[test]
    fn cli_overrides_file() {
        let args =
            Args::try_parse_from(["trine", "--frames-in-flight", "3", "--no-validation"]).unwrap();
        assert_eq!(args.config, PathBuf::from("trine.toml"));

        let mut cfg = AppCfg::default();
        cfg.render.validation = true;
        cfg.apply_args(&args);
        let vk = cfg.vk();
        assert_eq!(vk.frames_in_flight, 3);
        assert!(!vk.validation);
        assert_eq!(vk.arena_bytes, 100 * 1024 * 1024);
    }
}
