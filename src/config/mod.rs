//! Configuration management

use anyhow::Result;
use serde::Deserialize;

use crate::catalog::{Activity, Device};
use crate::commands::DEFAULT_COMMAND_NAMESPACE;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub mqtt: Option<MqttConfig>,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default)]
    pub theaters: Vec<TheaterConfig>,
}

fn default_port() -> u16 {
    8089
}

#[derive(Debug, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_mqtt_port() -> u16 {
    1883
}

/// Outbound command settings.
#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_command_namespace")]
    pub namespace: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            namespace: default_command_namespace(),
        }
    }
}

fn default_command_namespace() -> String {
    DEFAULT_COMMAND_NAMESPACE.to_string()
}

/// One theater (room): a title plus its device and activity catalogs.
/// Catalogs are optional upstream; missing lists degrade to empty.
#[derive(Debug, Deserialize)]
pub struct TheaterConfig {
    pub title: String,

    #[serde(default)]
    pub devices: Vec<Device>,

    #[serde(default)]
    pub activities: Vec<Activity>,
}

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("THEATER_CONFIG_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home)
                .join("Library/Application Support/theater-control");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return std::path::PathBuf::from(xdg).join("theater-control");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".config/theater-control");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return std::path::PathBuf::from(appdata).join("theater-control");
        }
    }

    std::path::PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
pub fn get_data_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("THEATER_DATA_DIR") {
        return std::path::PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home)
                .join("Library/Application Support/theater-control");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return std::path::PathBuf::from(xdg).join("theater-control");
        }
        if let Ok(home) = std::env::var("HOME") {
            return std::path::PathBuf::from(home).join(".local/share/theater-control");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return std::path::PathBuf::from(appdata).join("theater-control");
        }
    }

    std::path::PathBuf::from("./data")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        // Start with defaults
        .set_default("port", 8089)?
        // Load from config file if it exists
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // Override with environment variables (THEATER_PORT, THEATER_MQTT__HOST, etc.)
        .add_source(
            ::config::Environment::with_prefix("THEATER")
                .separator("__")
                .try_parsing(true),
        );

    // Support PORT env vars with explicit precedence: THEATER_PORT > PORT > config > default
    if let Ok(port) = std::env::var("THEATER_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        // Legacy PORT fallback (Docker, process supervisors)
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    // Support MQTT_HOST/MQTT_PORT env vars (used by container deployments)
    if let Ok(host) = std::env::var("MQTT_HOST") {
        builder = builder.set_override("mqtt.host", host)?;
    }
    if let Ok(port) = std::env::var("MQTT_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("mqtt.port", port_num as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
