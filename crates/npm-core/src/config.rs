use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_TOOL: &str = "iptables";
pub const DEFAULT_TABLE: &str = "filter";
pub const DEFAULT_LOCK_WAIT_SECONDS: u32 = 60;
pub const DEFAULT_NOT_FOUND_EXIT_CODE: i32 = 1;
pub const DEFAULT_FORWARD_CHAIN: &str = "FORWARD";
pub const DEFAULT_PEER_CHAIN: &str = "KUBE-SERVICES";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_METRICS_PORT: u16 = 10091;

/// Runtime configuration for the iptables manager, loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IptmConfig {
    #[serde(default)]
    pub iptables: IptablesSettings,
    /// Shared traversal chain that jumps into the entry chain.
    #[serde(default = "default_forward_chain")]
    pub forward_chain: String,
    /// Chain of the peer service-routing subsystem that must be traversed first.
    #[serde(default = "default_peer_chain")]
    pub peer_chain: String,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IptablesSettings {
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_lock_wait")]
    pub lock_wait_seconds: u32,
    /// Exit status the tool uses for "no such rule/chain".
    #[serde(default = "default_not_found_exit_code")]
    pub not_found_exit_code: i32,
}

fn default_tool() -> String {
    DEFAULT_TOOL.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_lock_wait() -> u32 {
    DEFAULT_LOCK_WAIT_SECONDS
}

fn default_not_found_exit_code() -> i32 {
    DEFAULT_NOT_FOUND_EXIT_CODE
}

fn default_forward_chain() -> String {
    DEFAULT_FORWARD_CHAIN.to_string()
}

fn default_peer_chain() -> String {
    DEFAULT_PEER_CHAIN.to_string()
}

fn default_reconcile_interval() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}

fn default_metrics_port() -> u16 {
    DEFAULT_METRICS_PORT
}

impl Default for IptablesSettings {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            table: default_table(),
            lock_wait_seconds: default_lock_wait(),
            not_found_exit_code: default_not_found_exit_code(),
        }
    }
}

impl Default for IptmConfig {
    fn default() -> Self {
        Self {
            iptables: IptablesSettings::default(),
            forward_chain: default_forward_chain(),
            peer_chain: default_peer_chain(),
            reconcile_interval_secs: default_reconcile_interval(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl IptmConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("reconcile_interval_secs must be at least 1");
        }
        if self.forward_chain.is_empty() || self.peer_chain.is_empty() {
            anyhow::bail!("forward_chain and peer_chain must not be empty");
        }
        Ok(())
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config {:?}", path))
    }

    /// Load `path` when given, otherwise fall back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }
}
