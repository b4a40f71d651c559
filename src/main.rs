//! gllock - OpenGL screen locker for X11
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                Lock session                  │
//! ├──────────────────────┬───────────────────────┤
//! │  Password thread     │  Render loop (main)   │
//! │  xkb keys → PAM      │  capture → FBO →      │
//! │                      │  effect → swap        │
//! ├──────────────────────┴───────────────────────┤
//! │     close flag  ◀── unlock / SIGTERM / WM    │
//! └──────────────────────────────────────────────┘
//! ```

mod auth;
mod capture;
mod config;
mod constants;
mod gpu;
mod input;
mod session;
mod x11;

use anyhow::{anyhow, Result};
use log::{error, info};
use std::path::PathBuf;

use session::{CloseReason, LockOptions};

/// Parsed command line
#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    help: bool,
    version: bool,
    debug: bool,
    overlay: Option<PathBuf>,
    background: Option<PathBuf>,
    fps: Option<u32>,
    config: Option<PathBuf>,
}

/// Value of `--flag VALUE` or `--flag=VALUE`
fn flag_value<'a, I>(arg: &str, name: &str, rest: &mut I) -> Result<Option<String>>
where
    I: Iterator<Item = &'a String>,
{
    if arg == name {
        return rest
            .next()
            .map(|v| Some(v.clone()))
            .ok_or_else(|| anyhow!("{} requires a value", name));
    }
    Ok(arg
        .strip_prefix(name)
        .and_then(|tail| tail.strip_prefix('='))
        .map(str::to_string))
}

/// Parse arguments (without the program name)
fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => cli.help = true,
            "-V" | "--version" => cli.version = true,
            "--debug" => cli.debug = true,
            _ => {
                if let Some(v) = flag_value(arg, "--overlay", &mut iter)? {
                    cli.overlay = Some(PathBuf::from(v));
                } else if let Some(v) = flag_value(arg, "--bg", &mut iter)? {
                    cli.background = Some(PathBuf::from(v));
                } else if let Some(v) = flag_value(arg, "--config", &mut iter)? {
                    cli.config = Some(PathBuf::from(v));
                } else if let Some(v) = flag_value(arg, "--fps", &mut iter)? {
                    let fps = v
                        .parse()
                        .map_err(|_| anyhow!("Invalid --fps value: {}", v))?;
                    cli.fps = Some(fps);
                } else {
                    return Err(anyhow!("Unknown argument: {}", arg));
                }
            }
        }
    }
    Ok(cli)
}

/// Print help message
fn print_help() {
    println!(
        r#"gllock {} - OpenGL screen locker for X11

USAGE:
    gllock [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --bg <PATH>             Use an image as background instead of a screenshot
    --overlay <PATH>        Draw an image centered on top of the effect
    --fps <N>               Frame rate cap (1-240, default 60)
    --config <PATH>         Config file to load
    --debug                 Verbose logging

CONFIG FILE:
    $GLLOCK_CONFIG
    ~/.config/gllock/config.toml
    /etc/gllock/config.toml

Unlock by typing your password and pressing Enter.
"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("gllock: {}", e);
            eprintln!("Try 'gllock --help' for more information.");
            std::process::exit(2);
        }
    };

    let default_filter = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if cli.help {
        print_help();
        return;
    }
    if cli.version {
        println!("gllock {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    info!("gllock starting...");

    let mut cfg = match &cli.config {
        Some(path) => config::Config::load_or_default(path),
        None => config::Config::load(),
    };
    if let Some(fps) = cli.fps {
        cfg.render.max_fps = fps;
    }

    let options = LockOptions {
        background: cli.background,
        overlay: cli.overlay,
    };

    match session::run(&cfg, &options) {
        Ok(reason) => {
            info!("Session ended: {:?}", reason);
            if reason == CloseReason::InputFailed {
                error!("Lock ended because the keyboard input failed");
            }
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(parse_args(&[]).unwrap(), CliArgs::default());
    }

    #[test]
    fn test_parse_flags_and_values() {
        let cli = parse_args(&args(&[
            "--debug",
            "--overlay",
            "/tmp/logo.png",
            "--bg=/tmp/bg.jpg",
            "--fps",
            "24",
            "--config=/tmp/gllock.toml",
        ]))
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.overlay, Some(PathBuf::from("/tmp/logo.png")));
        assert_eq!(cli.background, Some(PathBuf::from("/tmp/bg.jpg")));
        assert_eq!(cli.fps, Some(24));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/gllock.toml")));
        assert!(!cli.help && !cli.version);
    }

    #[test]
    fn test_parse_short_flags() {
        let cli = parse_args(&args(&["-V", "-h"])).unwrap();
        assert!(cli.version);
        assert!(cli.help);
    }

    #[test]
    fn test_missing_value() {
        assert!(parse_args(&args(&["--overlay"])).is_err());
    }

    #[test]
    fn test_invalid_fps() {
        assert!(parse_args(&args(&["--fps", "fast"])).is_err());
    }

    #[test]
    fn test_unknown_argument() {
        assert!(parse_args(&args(&["--bgx"])).is_err());
        assert!(parse_args(&args(&["--unlock"])).is_err());
    }
}
