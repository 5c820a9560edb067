use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "rflink.toml";
pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub transport: TransportConfig,
    pub transmitter: TransmitterConfig,
    pub receiver: ReceiverConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// `tcp://host:port` or `tcp-listen://host:port`
    pub endpoint: String,
    /// Air rate of the radio link. Set on the serial port by the bridge,
    /// used here for air-time estimates.
    pub baud_rate: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:7433".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitterConfig {
    pub mtu: usize,
    /// Pause after every frame so the radio's buffer can drain
    pub gap_ms: u64,
    pub window_size: usize,
    pub max_rounds: u32,
    pub ack_timeout_ms: u64,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            mtu: 256,
            gap_ms: 0,
            window_size: 12,
            max_rounds: 40,
            ack_timeout_ms: 5_000,
        }
    }
}

impl TransmitterConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.gap_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub sync_timeout_ms: u64,
    pub message_timeout_ms: u64,
    pub frame_timeout_ms: u64,
    /// Consecutive empty control waits before an open session is abandoned
    pub max_idle_waits: u32,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            sync_timeout_ms: 120_000,
            message_timeout_ms: 120_000,
            frame_timeout_ms: 2_500,
            max_idle_waits: 3,
        }
    }
}

impl ReceiverConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl LinkConfig {
    pub fn load_or_create(config_path: Option<&str>) -> Result<Self> {
        let config_file = config_path.unwrap_or(DEFAULT_CONFIG_FILE);

        if Path::new(config_file).exists() {
            Self::load(config_file)
        } else {
            let config = Self::default();
            config.save(config_file)?;
            tracing::info!("Wrote default configuration to {}", config_file);
            Ok(config)
        }
    }

    pub fn load(config_path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(config_path)?;
        let config: LinkConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, config_path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}
