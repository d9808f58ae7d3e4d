use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use tracing::info;

use offroad_net::ControllerSettings;

// ─── Embedded Default ────────────────────────────────────────────────────
/// Baked into the binary at compile time; always available as the base layer.
const DEFAULT_CONFIG_TOML: &str = include_str!("../default_config.toml");

// ─── CLI Arguments (override layer) ─────────────────────────────────────
/// offroad-net: headless Wi-Fi and tethering controller.
///
/// Reads commands from stdin, one per line, and prints every state change
/// as a JSON line on stdout.
#[derive(Parser, Debug, Clone)]
#[command(name = "offroad-net", version, about, long_about = None)]
pub struct CliArgs {
    /// Wi-Fi interface to use (overrides config file)
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Log level filter (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Path to a custom config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Credential store file (overrides config file)
    #[arg(long)]
    pub credentials: Option<PathBuf>,

    /// Connect timeout in seconds (overrides config file)
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Log file path (defaults to ~/.local/share/offroad-net/offroad-net.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the default config to stdout and exit
    #[arg(long)]
    pub print_default_config: bool,
}

// ─── TOML Structs ───────────────────────────────────────────────────────

/// Root configuration: parsed from TOML, then overridden by CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub connect: ConnectConfig,
    #[serde(default)]
    pub tethering: TetheringSection,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Wi-Fi interface (empty string = auto-detect)
    pub interface: String,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub base_interval_secs: u64,
    pub max_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TetheringSection {
    pub ssid: String,
    pub password: String,
    pub min_password_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Empty = default path under the user data directory
    pub credentials_path: String,
}

// ─── Defaults ───────────────────────────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            log_level: "info".into(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: 5,
            max_interval_secs: 60,
        }
    }
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl Default for TetheringSection {
    fn default() -> Self {
        Self {
            ssid: "offroad".into(),
            password: "swordfish".into(),
            min_password_len: 8,
        }
    }
}

// ─── Path Resolution ────────────────────────────────────────────────────

impl Config {
    /// Standard config file path: ~/.config/offroad-net/config.toml
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offroad-net")
            .join("config.toml")
    }

    /// Data directory: ~/.local/share/offroad-net/
    pub fn data_dir() -> PathBuf {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offroad-net");
        std::fs::create_dir_all(&data_dir).ok();
        data_dir
    }

    /// Interface as Option<&str> (empty = None)
    pub fn interface(&self) -> Option<&str> {
        let iface = self.general.interface.trim();
        if iface.is_empty() { None } else { Some(iface) }
    }

    pub fn credentials_path(&self) -> PathBuf {
        let path = self.store.credentials_path.trim();
        if path.is_empty() {
            Self::data_dir().join("credentials.json")
        } else {
            PathBuf::from(path)
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            connect_timeout: Duration::from_secs(self.connect.timeout_secs.max(1)),
            scan_base_interval: Duration::from_secs(self.scan.base_interval_secs.max(1)),
            scan_max_interval: Duration::from_secs(self.scan.max_interval_secs.max(1)),
            tether_ssid: self.tethering.ssid.clone(),
            tether_password: self.tethering.password.clone(),
            tether_min_password_len: self.tethering.min_password_len,
        }
    }
}

// ─── Bootloader ─────────────────────────────────────────────────────────

/// The single entry point for configuration. Called once at startup.
///
/// 1. Resolve config file path (CLI override or default)
/// 2. If the file doesn't exist, create the directory tree and write defaults
/// 3. Parse TOML from disk into Config
/// 4. Apply CLI overrides on top
pub fn load(cli: &CliArgs) -> Result<Config> {
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&config_path, DEFAULT_CONFIG_TOML).wrap_err_with(|| {
            format!(
                "Failed to write default config to {}",
                config_path.display()
            )
        })?;
        info!("Created default config at {}", config_path.display());
    }

    let toml_str = std::fs::read_to_string(&config_path)
        .wrap_err_with(|| format!("Failed to read config from {}", config_path.display()))?;

    let mut config: Config = toml::from_str(&toml_str).wrap_err_with(|| {
        format!(
            "Failed to parse config at {}.\n\
             Delete the file to regenerate defaults, or run:\n  \
             offroad-net --print-default-config > {:?}",
            config_path.display(),
            config_path
        )
    })?;

    // ── CLI overrides ───────────────────────────────────────────────
    if let Some(ref iface) = cli.interface {
        config.general.interface = iface.clone();
    }
    if let Some(ref level) = cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(ref path) = cli.credentials {
        config.store.credentials_path = path.display().to_string();
    }
    if let Some(secs) = cli.connect_timeout {
        config.connect.timeout_secs = secs;
    }

    Ok(config)
}

pub fn default_config_toml() -> &'static str {
    DEFAULT_CONFIG_TOML
}
