//! YAML Configuration Structures
//!
//! Every section and field is optional, missing values take the defaults
//! below.

use layers::mac::MacConfig;
use layers::user::C_RNTI_RELEASE_TIMER_MS;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EnbConfig {
    /// Message queue configuration
    #[serde(default)]
    pub msgq: MsgqConfig,
    /// MAC configuration
    #[serde(default)]
    pub mac: MacSection,
    /// Timer configuration
    #[serde(default)]
    pub timers: TimerConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Run control
    #[serde(default)]
    pub run: RunConfig,
}

/// Message queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MsgqConfig {
    /// Capacity of every inter-layer queue
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

fn default_queue_capacity() -> usize {
    interfaces::msgq::DEFAULT_QUEUE_CAPACITY
}

impl Default for MsgqConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

/// MAC configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MacSection {
    /// Downlink resource blocks per subframe
    #[serde(default = "default_n_prbs")]
    pub n_dl_prbs: u32,
    /// Uplink resource blocks per subframe
    #[serde(default = "default_n_prbs")]
    pub n_ul_prbs: u32,
    /// Uplink capacity of one resource block in bits
    #[serde(default = "default_bits_per_prb")]
    pub bits_per_prb: u32,
    /// Uplink MCS
    #[serde(default = "default_ul_mcs")]
    pub ul_mcs: u8,
}

fn default_n_prbs() -> u32 {
    25 // 5 MHz
}

fn default_bits_per_prb() -> u32 {
    120
}

fn default_ul_mcs() -> u8 {
    4
}

impl Default for MacSection {
    fn default() -> Self {
        Self {
            n_dl_prbs: default_n_prbs(),
            n_ul_prbs: default_n_prbs(),
            bits_per_prb: default_bits_per_prb(),
            ul_mcs: default_ul_mcs(),
        }
    }
}

impl MacSection {
    /// MAC layer configuration for this section
    pub fn to_mac_config(&self) -> MacConfig {
        MacConfig {
            n_dl_prbs: self.n_dl_prbs,
            n_ul_prbs: self.n_ul_prbs,
            bits_per_prb: self.bits_per_prb,
            ul_mcs: self.ul_mcs,
            ..MacConfig::default()
        }
    }
}

/// Timer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimerConfig {
    /// C-RNTI release timer in milliseconds
    #[serde(default = "default_c_rnti_release_ms")]
    pub c_rnti_release_ms: u64,
}

fn default_c_rnti_release_ms() -> u64 {
    C_RNTI_RELEASE_TIMER_MS
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            c_rnti_release_ms: default_c_rnti_release_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// All layers log level
    #[serde(default = "default_log_level")]
    pub all_level: String,
    /// Message bus log level
    #[serde(default = "default_log_level")]
    pub msgq_level: String,
    /// MAC layer log level
    #[serde(default = "default_log_level")]
    pub mac_level: String,
    /// User context log level
    #[serde(default = "default_log_level")]
    pub user_level: String,
    /// Timer log level
    #[serde(default = "default_log_level")]
    pub timer_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            all_level: default_log_level(),
            msgq_level: default_log_level(),
            mac_level: default_log_level(),
            user_level: default_log_level(),
            timer_level: default_log_level(),
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directives for the configured levels
    pub fn filter_directives(&self) -> String {
        format!(
            "{},interfaces::msgq={},layers::mac={},layers::user={},layers::user_mgr={},layers::timer_mgr={}",
            self.all_level,
            self.msgq_level,
            self.mac_level,
            self.user_level,
            self.user_level,
            self.timer_level
        )
    }
}

/// Run control
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RunConfig {
    /// Stop after this many subframes, run until Ctrl-C if absent
    pub subframes: Option<u64>,
    /// Random access preambles injected at start-up
    #[serde(default)]
    pub prach_preambles: Vec<u32>,
}

impl EnbConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EnbConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: EnbConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.msgq.capacity, 100);
        assert_eq!(config.timers.c_rnti_release_ms, 500);
        assert_eq!(config.mac.n_ul_prbs, 25);
        assert!(config.run.subframes.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
msgq:
  capacity: 8
mac:
  n_ul_prbs: 50
log:
  mac_level: debug
run:
  subframes: 1000
  prach_preambles: [3, 17]
"#;
        let config: EnbConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.msgq.capacity, 8);
        assert_eq!(config.mac.n_ul_prbs, 50);
        assert_eq!(config.mac.n_dl_prbs, 25);
        assert_eq!(config.run.subframes, Some(1000));
        assert_eq!(config.run.prach_preambles, vec![3, 17]);
        assert!(config.log.filter_directives().contains("layers::mac=debug"));

        let mac = config.mac.to_mac_config();
        assert_eq!(mac.n_ul_prbs, 50);
        assert_eq!(mac.phy_queue, "mac_phy_mq");
    }
}
