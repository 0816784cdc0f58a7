/// Configuration and persisted state — TOML files in the config directory.
///
/// Directory resolution: `OTS_CONFIG_DIR` env var, else `./config`.
///
/// Three namespaces, one file each:
///   config.toml    runtime options (port, mock switches, log dir)
///   wifi.toml      station credentials (the provisioning collaborator's
///                  load/save/exists/clear contract)
///   identity.toml  owner name + serial
///
/// Missing files mean defaults — a blank device boots into captive-portal
/// mode because `WifiStore::exists()` is false, it never crashes.
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;
pub const MAX_OWNER_LEN: usize = 32;
pub const MAX_SERIAL_LEN: usize = 32;

/// Resolve the configuration directory.
pub fn config_dir() -> PathBuf {
    std::env::var_os("OTS_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"))
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket listen port (TLS on it when built with the `tls` feature).
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Log file directory; empty = `<config>/logs`.
    #[serde(default)]
    pub log_dir: PathBuf,

    /// Simulated I²C devices instead of a physical bus adapter.
    #[serde(default = "default_true")]
    pub mock_hardware: bool,

    /// Log-only CAN transport instead of a physical controller.
    #[serde(default = "default_true")]
    pub mock_can: bool,
}

fn default_ws_port() -> u16 {
    crate::ws::server::DEFAULT_WS_PORT
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
            log_dir: PathBuf::new(),
            mock_hardware: true,
            mock_can: true,
        }
    }
}

pub fn load_or_default(dir: &Path) -> Result<AppConfig> {
    let path = dir.join("config.toml");
    if path.exists() {
        let raw = std::fs::read_to_string(&path)?;
        let cfg: AppConfig =
            toml::from_str(&raw).map_err(|e| anyhow::anyhow!("Config parse error: {}", e))?;
        Ok(cfg)
    } else {
        Ok(AppConfig::default())
    }
}

pub fn save(config: &AppConfig, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let raw = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("Config serialize error: {}", e))?;
    std::fs::write(dir.join("config.toml"), raw)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Wi-Fi credential store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

pub struct WifiStore {
    dir: PathBuf,
}

impl WifiStore {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join("wifi.toml")
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn load(&self) -> Result<WifiCredentials> {
        let raw = std::fs::read_to_string(self.path())?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("Wifi credential parse error: {}", e))
    }

    pub fn save(&self, creds: &WifiCredentials) -> Result<()> {
        if creds.ssid.is_empty() || creds.ssid.len() > MAX_SSID_LEN {
            bail!("SSID must be 1..={} bytes", MAX_SSID_LEN);
        }
        if creds.password.len() > MAX_PASSWORD_LEN {
            bail!("password must be at most {} bytes", MAX_PASSWORD_LEN);
        }
        std::fs::create_dir_all(&self.dir)?;
        let raw = toml::to_string_pretty(creds)?;
        std::fs::write(self.path(), raw)?;
        tracing::info!("Wi-Fi credentials saved for SSID {:?}", creds.ssid);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Device identity store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(default)]
    pub owner_name: String,
    #[serde(default)]
    pub serial: String,
}

pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join("identity.toml")
    }

    pub fn get(&self) -> DeviceIdentity {
        match std::fs::read_to_string(self.path()) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("Identity parse error ({}), using blank identity", e);
                DeviceIdentity::default()
            }),
            Err(_) => DeviceIdentity::default(),
        }
    }

    pub fn set(&self, identity: &DeviceIdentity) -> Result<()> {
        if identity.owner_name.len() > MAX_OWNER_LEN {
            bail!("owner name must be at most {} bytes", MAX_OWNER_LEN);
        }
        if identity.serial.len() > MAX_SERIAL_LEN {
            bail!("serial must be at most {} bytes", MAX_SERIAL_LEN);
        }
        std::fs::create_dir_all(&self.dir)?;
        let raw = toml::to_string_pretty(identity)?;
        std::fs::write(self.path(), raw)?;
        Ok(())
    }

    pub fn factory_reset(&self) -> Result<()> {
        match std::fs::remove_file(self.path()) {
            Ok(()) => {
                tracing::info!("Device identity factory-reset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
