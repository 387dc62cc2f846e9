//! Server configuration: CLI flags with `GILE_*` environment fallbacks.
//!
//! Clap resolves each option as CLI-first, environment-second; the remaining
//! cross-option rules (colon-separated `GILE_DIRS`, theme-derived highlight
//! default, validation of every served directory) live in [`Config::from_cli`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;

use crate::net::TrustedProxy;

#[derive(Parser, Debug)]
#[command(
    name = "gilebrowser",
    version,
    about = "A clean, configurable read-only file download server"
)]
pub struct Cli {
    /// HTTP port to listen on
    #[arg(long, env = "GILE_PORT", default_value_t = 7887)]
    pub port: u16,

    /// Root directory to serve (repeatable; env GILE_DIRS is colon-separated)
    #[arg(long = "dir", value_name = "PATH")]
    pub dirs: Vec<PathBuf>,

    /// Additional root directories
    #[arg(value_name = "PATH")]
    pub extra_dirs: Vec<PathBuf>,

    /// Total upload bandwidth cap, e.g. 10mbps, 500kbps, or bytes/sec as a
    /// bare number; unlimited when omitted
    #[arg(long, env = "GILE_BANDWIDTH")]
    pub bandwidth: Option<String>,

    /// Site branding title
    #[arg(long, env = "GILE_TITLE", default_value = "GileBrowser")]
    pub title: String,

    /// Path to a custom favicon file
    #[arg(long, env = "GILE_FAVICON")]
    pub favicon: Option<PathBuf>,

    /// UI color scheme served to clients without a stored preference
    #[arg(long = "default-theme", env = "GILE_DEFAULT_THEME", default_value = "dark")]
    pub default_theme: String,

    /// Syntax highlighting theme for text previews
    #[arg(long = "highlight-theme", env = "GILE_HIGHLIGHT_THEME")]
    pub highlight_theme: Option<String>,

    /// Directory in which gile.json is stored
    #[arg(long = "stats-dir", env = "GILE_STATS_DIR")]
    pub stats_dir: Option<PathBuf>,

    /// Enable inline image previews
    #[arg(long = "preview-images", env = "GILE_PREVIEW_IMAGES", value_name = "BOOL")]
    pub preview_images: Option<String>,

    /// Enable text previews
    #[arg(long = "preview-text", env = "GILE_PREVIEW_TEXT", value_name = "BOOL")]
    pub preview_text: Option<String>,

    /// Enable rendered document previews (Markdown, HTML)
    #[arg(long = "preview-docs", env = "GILE_PREVIEW_DOCS", value_name = "BOOL")]
    pub preview_docs: Option<String>,

    /// IP or CIDR of a trusted reverse proxy for X-Forwarded-For
    #[arg(long = "trusted-proxy", env = "GILE_TRUSTED_PROXY")]
    pub trusted_proxy: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one root directory must be specified via --dir, GILE_DIRS, or a positional argument")]
    NoRoots,
    #[error("directory {0:?}: {1}")]
    BadRoot(PathBuf, std::io::Error),
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("favicon {0:?}: {1}")]
    BadFavicon(PathBuf, String),
    #[error("invalid --default-theme {0:?}: must be \"dark\" or \"light\"")]
    BadTheme(String),
    #[error("invalid bandwidth {0:?}: {1}")]
    BadBandwidth(String, String),
    #[error("invalid --trusted-proxy {0:?}: {1}")]
    BadProxy(String, String),
    #[error("could not determine current working directory: {0}")]
    NoCwd(std::io::Error),
}

/// UI color scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Dark,
    Light,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Dark => f.write_str("dark"),
            Theme::Light => f.write_str("light"),
        }
    }
}

impl FromStr for Theme {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            _ => Err(()),
        }
    }
}

/// Toggles for the preview subsystems.
#[derive(Debug, Clone, Copy)]
pub struct PreviewOptions {
    pub images: bool,
    pub text: bool,
    pub docs: bool,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            images: true,
            text: true,
            docs: true,
        }
    }
}

/// The complete, validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub dirs: Vec<PathBuf>,
    pub title: String,
    pub favicon: Option<PathBuf>,
    /// Total server-wide cap in bytes per second; 0 means unlimited.
    pub bandwidth_bps: f64,
    pub default_theme: Theme,
    pub highlight_theme: String,
    pub stats_dir: PathBuf,
    pub preview: PreviewOptions,
    pub trusted_proxy: TrustedProxy,
}

impl Config {
    /// Validates the parsed CLI/env options into a usable configuration.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let mut dirs = cli.dirs;
        dirs.extend(cli.extra_dirs);
        if dirs.is_empty() {
            if let Ok(v) = std::env::var("GILE_DIRS") {
                dirs.extend(
                    v.split(':')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(PathBuf::from),
                );
            }
        }
        if dirs.is_empty() {
            return Err(ConfigError::NoRoots);
        }
        for dir in &dirs {
            let meta = std::fs::metadata(dir)
                .map_err(|e| ConfigError::BadRoot(dir.clone(), e))?;
            if !meta.is_dir() {
                return Err(ConfigError::NotADirectory(dir.clone()));
            }
        }

        if let Some(favicon) = &cli.favicon {
            match std::fs::metadata(favicon) {
                Err(e) => return Err(ConfigError::BadFavicon(favicon.clone(), e.to_string())),
                Ok(meta) if meta.is_dir() => {
                    return Err(ConfigError::BadFavicon(
                        favicon.clone(),
                        "is a directory, not a file".into(),
                    ))
                }
                Ok(_) => {}
            }
        }

        let default_theme = cli
            .default_theme
            .parse::<Theme>()
            .map_err(|()| ConfigError::BadTheme(cli.default_theme.clone()))?;

        // Explicit highlight theme wins; otherwise it follows the UI scheme.
        let highlight_theme = match cli.highlight_theme {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => match default_theme {
                Theme::Dark => "catppuccin-mocha".to_string(),
                Theme::Light => "catppuccin-latte".to_string(),
            },
        };

        let bandwidth_bps = match &cli.bandwidth {
            Some(raw) if !raw.trim().is_empty() => parse_bandwidth(raw)
                .map_err(|e| ConfigError::BadBandwidth(raw.clone(), e))?,
            _ => 0.0,
        };

        let stats_dir = match cli.stats_dir {
            Some(d) => d,
            None => std::env::current_dir().map_err(ConfigError::NoCwd)?,
        };

        let preview = PreviewOptions {
            images: resolve_bool(cli.preview_images.as_deref(), true),
            text: resolve_bool(cli.preview_text.as_deref(), true),
            docs: resolve_bool(cli.preview_docs.as_deref(), true),
        };

        let trusted_proxy = match &cli.trusted_proxy {
            Some(s) if !s.trim().is_empty() => TrustedProxy::parse(s)
                .map_err(|e| ConfigError::BadProxy(s.clone(), e))?,
            _ => TrustedProxy::None,
        };

        Ok(Config {
            port: cli.port,
            dirs,
            title: cli.title,
            favicon: cli.favicon,
            bandwidth_bps,
            default_theme,
            highlight_theme,
            stats_dir,
            preview,
            trusted_proxy,
        })
    }
}

/// Converts a human-readable bandwidth string to bytes per second.
///
/// A bare number is bytes per second; the `bps`/`kbps`/`mbps`/`gbps` suffixes
/// are bits per second and divided by 8.
pub fn parse_bandwidth(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if s.is_empty() || s == "0" {
        return Ok(0.0);
    }

    let split = s
        .find(|c: char| c != '.' && !c.is_ascii_digit())
        .unwrap_or(s.len());
    if split == 0 {
        return Err("no numeric value found".into());
    }
    let value: f64 = s[..split]
        .parse()
        .map_err(|_| format!("invalid number {:?}", &s[..split]))?;
    if value < 0.0 {
        return Err(format!("invalid number {:?}", &s[..split]));
    }

    let unit = s[split..].trim().to_ascii_lowercase();
    match unit.as_str() {
        "" => Ok(value),
        "bps" => Ok(value / 8.0),
        "kbps" => Ok(value * 1_000.0 / 8.0),
        "mbps" => Ok(value * 1_000_000.0 / 8.0),
        "gbps" => Ok(value * 1_000_000_000.0 / 8.0),
        other => Err(format!(
            "unknown unit {other:?} (accepted: bps, kbps, mbps, gbps)"
        )),
    }
}

/// Parses a human boolean; unrecognized or missing values keep the default.
fn resolve_bool(value: Option<&str>, default: bool) -> bool {
    value.and_then(parse_bool).unwrap_or(default)
}

/// Accepted truthy strings: `1 true yes on`; falsy: `0 false no off`.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bandwidth_bare_number_is_bytes_per_second() {
        assert_eq!(parse_bandwidth("131072").unwrap(), 131072.0);
    }

    #[test]
    fn bandwidth_bit_units_convert_to_bytes() {
        assert_eq!(parse_bandwidth("8bps").unwrap(), 1.0);
        assert_eq!(parse_bandwidth("10mbps").unwrap(), 1_250_000.0);
        assert_eq!(parse_bandwidth("500 kbps").unwrap(), 62_500.0);
        assert_eq!(parse_bandwidth("1gbps").unwrap(), 125_000_000.0);
    }

    #[test]
    fn bandwidth_zero_and_empty_mean_unlimited() {
        assert_eq!(parse_bandwidth("0").unwrap(), 0.0);
        assert_eq!(parse_bandwidth("").unwrap(), 0.0);
    }

    #[test]
    fn bandwidth_rejects_garbage() {
        assert!(parse_bandwidth("mbps").is_err());
        assert!(parse_bandwidth("10tbps").is_err());
    }

    #[test]
    fn human_booleans() {
        for s in ["1", "true", "YES", "On", "t"] {
            assert_eq!(parse_bool(s), Some(true), "{s}");
        }
        for s in ["0", "false", "NO", "off", "f"] {
            assert_eq!(parse_bool(s), Some(false), "{s}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn theme_parsing() {
        assert_eq!(" Dark ".parse::<Theme>(), Ok(Theme::Dark));
        assert_eq!("light".parse::<Theme>(), Ok(Theme::Light));
        assert!("solarized".parse::<Theme>().is_err());
    }
}
