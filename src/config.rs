use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_DB_PATH: &str = "watchdog.db";
const DEFAULT_DEVICE: &str = "stub://camera0";
const DEFAULT_FRAME_RATE: f64 = 5.0;
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_BIT_RATE: u32 = 600_000;
const DEFAULT_QUALITY: u8 = 40;
const DEFAULT_CODEC: &str = "h264";
const DEFAULT_FORMAT: &str = "mkv";
const DEFAULT_STORAGE_ROOT: &str = "data/feeds";
const DEFAULT_RETENTION_THRESHOLD: u32 = 50;
const DEFAULT_VOTING_WINDOW: u32 = 10;

/// Frame retention policy for the batch processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Keep every frame of every segment.
    Normal,
    /// Keep only frames near detected human presence.
    PresenceAware,
}

#[derive(Debug, Deserialize, Default)]
struct WatchdogConfigFile {
    db_path: Option<String>,
    mode: Option<OperatingMode>,
    capture: Option<CaptureConfigFile>,
    encoding: Option<EncodingConfigFile>,
    storage: Option<StorageConfigFile>,
    processing: Option<ProcessingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    frame_rate: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EncodingConfigFile {
    bit_rate: Option<u32>,
    quality: Option<u8>,
    codec: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    root: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ProcessingConfigFile {
    retention_threshold: Option<u32>,
    voting_window: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub db_path: String,
    pub mode: OperatingMode,
    pub capture: CaptureSettings,
    pub encoding: EncodingSettings,
    pub storage_root: PathBuf,
    pub retention_threshold: u32,
    pub voting_window: u32,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: String,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct EncodingSettings {
    pub bit_rate: u32,
    pub quality: u8,
    pub codec: String,
    pub format: String,
}

impl WatchdogConfig {
    /// Load from the file named by `WATCHDOG_CONFIG`, if any.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("WATCHDOG_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from an explicit config file path (`None` uses defaults).
    /// `WATCHDOG_*` environment overrides apply either way.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: WatchdogConfigFile) -> Self {
        let capture = CaptureSettings {
            device: file
                .capture
                .as_ref()
                .and_then(|capture| capture.device.clone())
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            frame_rate: file
                .capture
                .as_ref()
                .and_then(|capture| capture.frame_rate)
                .unwrap_or(DEFAULT_FRAME_RATE),
            width: file
                .capture
                .as_ref()
                .and_then(|capture| capture.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .capture
                .as_ref()
                .and_then(|capture| capture.height)
                .unwrap_or(DEFAULT_HEIGHT),
        };
        let encoding = EncodingSettings {
            bit_rate: file
                .encoding
                .as_ref()
                .and_then(|encoding| encoding.bit_rate)
                .unwrap_or(DEFAULT_BIT_RATE),
            quality: file
                .encoding
                .as_ref()
                .and_then(|encoding| encoding.quality)
                .unwrap_or(DEFAULT_QUALITY),
            codec: file
                .encoding
                .as_ref()
                .and_then(|encoding| encoding.codec.clone())
                .unwrap_or_else(|| DEFAULT_CODEC.to_string()),
            format: file
                .encoding
                .as_ref()
                .and_then(|encoding| encoding.format.clone())
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
        };
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            mode: file.mode.unwrap_or(OperatingMode::PresenceAware),
            capture,
            encoding,
            storage_root: file
                .storage
                .and_then(|storage| storage.root)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT)),
            retention_threshold: file
                .processing
                .as_ref()
                .and_then(|processing| processing.retention_threshold)
                .unwrap_or(DEFAULT_RETENTION_THRESHOLD),
            voting_window: file
                .processing
                .and_then(|processing| processing.voting_window)
                .unwrap_or(DEFAULT_VOTING_WINDOW),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("WATCHDOG_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(device) = std::env::var("WATCHDOG_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device;
            }
        }
        if let Ok(root) = std::env::var("WATCHDOG_STORAGE_ROOT") {
            if !root.trim().is_empty() {
                self.storage_root = PathBuf::from(root);
            }
        }
        if let Ok(mode) = std::env::var("WATCHDOG_MODE") {
            self.mode = match mode.trim() {
                "normal" => OperatingMode::Normal,
                "presence_aware" => OperatingMode::PresenceAware,
                other => {
                    return Err(anyhow!(
                        "WATCHDOG_MODE must be normal or presence_aware, got {:?}",
                        other
                    ))
                }
            };
        }
        if let Ok(rate) = std::env::var("WATCHDOG_FRAME_RATE") {
            self.capture.frame_rate = rate
                .parse()
                .map_err(|_| anyhow!("WATCHDOG_FRAME_RATE must be a number"))?;
        }
        if let Ok(threshold) = std::env::var("WATCHDOG_RETENTION_THRESHOLD") {
            self.retention_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("WATCHDOG_RETENTION_THRESHOLD must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.frame_rate <= 0.0 {
            return Err(anyhow!("frame rate must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        if !(1..=51).contains(&self.encoding.quality) {
            return Err(anyhow!(
                "encoding quality must be in 1..=51, got {}",
                self.encoding.quality
            ));
        }
        if self.voting_window == 0 {
            return Err(anyhow!("voting window must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<WatchdogConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
