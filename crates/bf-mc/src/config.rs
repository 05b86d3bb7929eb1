//! Multicast manager configuration.

use crate::error::{McError, McResult};
use crate::handle::INDEX_BITS;
use bf_types::{BF_PIPE_COUNT, BF_PORT_COUNT};
use serde::{Deserialize, Serialize};

/// Per-device table sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Pipes present on the device
    #[serde(default = "default_num_pipes")]
    pub num_pipes: u32,

    /// Multicast group table size
    #[serde(default = "default_max_mgrps")]
    pub max_mgrps: u32,

    /// L1 node table size
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,

    /// ECMP group table size
    #[serde(default = "default_max_ecmps")]
    pub max_ecmps: u32,

    /// Nodes per ECMP group
    #[serde(default = "default_max_ecmp_members")]
    pub max_ecmp_members: u32,

    /// Port prune table size
    #[serde(default = "default_max_yids")]
    pub max_yids: u32,
}

/// Top-level manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McMgrConfig {
    /// Concurrent sessions allowed
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,

    /// Table sizes used by `device_add` when none are given
    #[serde(default)]
    pub device: DeviceConfig,
}

fn default_num_pipes() -> u32 {
    BF_PIPE_COUNT as u32
}

fn default_max_mgrps() -> u32 {
    1 << 16
}

fn default_max_nodes() -> u32 {
    32768
}

fn default_max_ecmps() -> u32 {
    8192
}

fn default_max_ecmp_members() -> u32 {
    32
}

fn default_max_yids() -> u32 {
    BF_PORT_COUNT as u32
}

fn default_max_sessions() -> u32 {
    16
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_pipes: default_num_pipes(),
            max_mgrps: default_max_mgrps(),
            max_nodes: default_max_nodes(),
            max_ecmps: default_max_ecmps(),
            max_ecmp_members: default_max_ecmp_members(),
            max_yids: default_max_yids(),
        }
    }
}

impl Default for McMgrConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            device: DeviceConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> McResult<()> {
        if self.num_pipes == 0 || self.num_pipes as usize > BF_PIPE_COUNT {
            return Err(McError::invalid_arg(format!(
                "num_pipes must be 1-{}, got {}",
                BF_PIPE_COUNT, self.num_pipes
            )));
        }
        if self.max_mgrps == 0 || self.max_mgrps > 1 << 16 {
            return Err(McError::invalid_arg(format!(
                "max_mgrps must be 1-65536, got {}",
                self.max_mgrps
            )));
        }
        let handle_space = 1u32 << INDEX_BITS;
        for (name, value) in [("max_nodes", self.max_nodes), ("max_ecmps", self.max_ecmps)] {
            if value == 0 || value > handle_space {
                return Err(McError::invalid_arg(format!(
                    "{} must be 1-{}, got {}",
                    name, handle_space, value
                )));
            }
        }
        if self.max_ecmp_members == 0 {
            return Err(McError::invalid_arg("max_ecmp_members must be > 0"));
        }
        if self.max_yids == 0 || self.max_yids > u16::MAX as u32 + 1 {
            return Err(McError::invalid_arg(format!(
                "max_yids must be 1-65536, got {}",
                self.max_yids
            )));
        }
        Ok(())
    }
}

impl McMgrConfig {
    pub fn validate(&self) -> McResult<()> {
        if self.max_sessions == 0 {
            return Err(McError::invalid_arg("max_sessions must be > 0"));
        }
        self.device.validate()
    }
}
