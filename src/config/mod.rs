//! Configuration file management
//!
//! Loads TOML configuration files and provides application settings.
//! Default config path: ~/.config/gllock/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_GRAB_ATTEMPTS, DEFAULT_GRAB_RETRY_DELAY_MS, DEFAULT_IDLE_SLEEP_MS, DEFAULT_MAX_FPS,
    DEFAULT_PAM_SERVICE, MAX_FPS, MIN_FPS, PASSWORD_TIMEOUT_MS,
};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Render loop settings
    pub render: RenderConfig,
    /// Password entry settings
    pub password: PasswordConfig,
    /// Input grab settings
    pub grab: GrabConfig,
    /// Secondary display cover settings
    pub cover: CoverConfig,
    /// Input source settings
    pub input: InputConfig,
    /// Authentication settings
    pub auth: AuthConfig,
    /// Security settings
    pub security: SecurityConfig,
}

/// Render loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Frame rate cap (1-240)
    pub max_fps: u32,
    /// Longest single sleep while waiting for the next frame, in milliseconds
    pub idle_sleep_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_fps: DEFAULT_MAX_FPS,
            idle_sleep_ms: DEFAULT_IDLE_SLEEP_MS,
        }
    }
}

impl RenderConfig {
    /// Target interval between two produced frames
    pub fn frame_interval(&self) -> Duration {
        let fps = self.max_fps.clamp(MIN_FPS, MAX_FPS);
        Duration::from_secs_f64(1.0 / fps as f64)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms.max(1))
    }
}

/// Password entry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Inactivity after which the typed buffer is discarded, in milliseconds
    pub timeout_ms: u64,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            timeout_ms: PASSWORD_TIMEOUT_MS,
        }
    }
}

impl PasswordConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Input grab settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    /// Number of all-or-nothing grab attempts before giving up
    pub attempts: u32,
    /// Pause between attempts, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_GRAB_ATTEMPTS,
            retry_delay_ms: DEFAULT_GRAB_RETRY_DELAY_MS,
        }
    }
}

/// What to do when a cover window for a secondary display cannot be created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverFailurePolicy {
    /// Log and leave that display uncovered
    Skip,
    /// Refuse to lock
    Abort,
}

/// Secondary display cover settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverConfig {
    /// Solid fill color (RRGGBB)
    pub color: String,
    /// Paint the captured screen region instead of the solid color
    pub use_capture: bool,
    /// Behavior when a cover window fails to come up
    pub on_failure: CoverFailurePolicy,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            color: "000000".to_string(),
            use_capture: true,
            on_failure: CoverFailurePolicy::Skip,
        }
    }
}

impl CoverConfig {
    /// Solid fill color as 0x00RRGGBB pixel value
    pub fn color_pixel(&self) -> u32 {
        let (r, g, b) = parse_hex_color(&self.color);
        (r as u32) << 16 | (g as u32) << 8 | b as u32
    }
}

/// What to do when the input event source fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputErrorPolicy {
    /// End the session (the grab died with the connection)
    Terminate,
    /// Reconnect and re-grab; end the session only if that fails
    Reconnect,
}

/// Input source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub on_error: InputErrorPolicy,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            on_error: InputErrorPolicy::Terminate,
        }
    }
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// PAM service name (file under /etc/pam.d)
    pub service: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_PAM_SERVICE.to_string(),
        }
    }
}

/// Security settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Log typed password contents at debug level (never enable on a shared machine)
    pub log_secrets: bool,
}

/// Parse RRGGBB (optionally with leading '#'), falling back to black
pub fn parse_hex_color(hex: &str) -> (u8, u8, u8) {
    let hex = hex.trim_start_matches('#');
    if hex.len() >= 6 {
        if let (Some(r), Some(g), Some(b)) = (
            hex.get(0..2).and_then(|s| u8::from_str_radix(s, 16).ok()),
            hex.get(2..4).and_then(|s| u8::from_str_radix(s, 16).ok()),
            hex.get(4..6).and_then(|s| u8::from_str_radix(s, 16).ok()),
        ) {
            return (r, g, b);
        }
    }
    (0, 0, 0)
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/gllock/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. GLLOCK_CONFIG environment variable
        if let Ok(path) = std::env::var("GLLOCK_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/gllock/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("gllock").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/gllock/config.toml
        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. GLLOCK_CONFIG environment variable
    /// 2. ~/.config/gllock/config.toml (user config)
    /// 3. /etc/gllock/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            return Self::load_or_default(&path);
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load the given file, falling back to defaults when it is broken.
    /// A lock must still come up with a bad config file.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_file(path) {
            Ok(config) => {
                info!("Loaded config: {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to load config {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load settings from specified path
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse TOML config text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.render.max_fps, 60);
        assert_eq!(cfg.password.timeout(), Duration::from_secs(2));
        assert_eq!(cfg.cover.on_failure, CoverFailurePolicy::Skip);
        assert_eq!(cfg.input.on_error, InputErrorPolicy::Terminate);
        assert_eq!(cfg.auth.service, "login");
        assert!(!cfg.security.log_secrets);
    }

    #[test]
    fn test_parse_partial_config() {
        let cfg = Config::parse(
            r##"
            [render]
            max_fps = 24

            [cover]
            on_failure = "abort"
            color = "#102030"

            [input]
            on_error = "reconnect"
            "##,
        )
        .unwrap();
        assert_eq!(cfg.render.max_fps, 24);
        assert_eq!(cfg.render.idle_sleep_ms, DEFAULT_IDLE_SLEEP_MS);
        assert_eq!(cfg.cover.on_failure, CoverFailurePolicy::Abort);
        assert_eq!(cfg.cover.color_pixel(), 0x102030);
        assert!(cfg.cover.use_capture);
        assert_eq!(cfg.input.on_error, InputErrorPolicy::Reconnect);
        assert_eq!(cfg.grab.attempts, DEFAULT_GRAB_ATTEMPTS);
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        assert!(Config::parse("[cover]\non_failure = \"ignore\"\n").is_err());
    }

    #[test]
    fn test_frame_interval_clamped() {
        let mut render = RenderConfig::default();
        assert_eq!(render.frame_interval(), Duration::from_secs_f64(1.0 / 60.0));
        render.max_fps = 0;
        assert_eq!(render.frame_interval(), Duration::from_secs(1));
        render.max_fps = 10_000;
        assert_eq!(render.frame_interval(), Duration::from_secs_f64(1.0 / 240.0));
    }

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("ff0000"), (255, 0, 0));
        assert_eq!(parse_hex_color("#00ff80"), (0, 255, 128));
        assert_eq!(parse_hex_color("zz"), (0, 0, 0));
        assert_eq!(parse_hex_color("ééé"), (0, 0, 0));
    }
}
