//! Device and port addressing.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of pipelines addressable on one device.
pub const BF_PIPE_COUNT: usize = 4;

/// Number of multicast-capable local ports per pipe.
pub const BF_PIPE_PORT_COUNT: usize = 72;

/// Size of the multicast port address space.
pub const BF_PORT_COUNT: usize = BF_PIPE_COUNT * BF_PIPE_PORT_COUNT;

/// Size of the multicast LAG address space.
pub const BF_LAG_COUNT: usize = 256;

/// ASIC device identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevId(pub u8);

impl fmt::Display for DevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Pipeline index within a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PipeId(u8);

impl PipeId {
    /// Creates a pipe id, rejecting values outside the device's pipe range.
    pub fn new(pipe: u32) -> Result<Self, ParseError> {
        if (pipe as usize) < BF_PIPE_COUNT {
            Ok(PipeId(pipe as u8))
        } else {
            Err(ParseError::InvalidPipe(pipe))
        }
    }

    pub const fn as_u32(&self) -> u32 {
        self.0 as u32
    }
}

impl TryFrom<u32> for PipeId {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        PipeId::new(value)
    }
}

impl From<PipeId> for u32 {
    fn from(pipe: PipeId) -> Self {
        pipe.as_u32()
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device port number in `bf_dev_port_t` encoding.
///
/// Bits 8..7 carry the pipe and bits 6..0 the pipe-local port. Only local
/// ports below [`BF_PIPE_PORT_COUNT`] take part in multicast replication, so
/// construction rejects anything outside that range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct DevPort(u16);

impl DevPort {
    /// Builds a port from its pipe and pipe-local port.
    pub fn new(pipe: PipeId, local_port: u16) -> Result<Self, ParseError> {
        if local_port as usize >= BF_PIPE_PORT_COUNT {
            return Err(ParseError::InvalidDevPort(format!(
                "local port {} out of range",
                local_port
            )));
        }
        Ok(DevPort(((pipe.0 as u16) << 7) | local_port))
    }

    /// Validates a raw `bf_dev_port_t` value.
    pub fn from_raw(raw: u16) -> Result<Self, ParseError> {
        if raw >> 9 != 0 {
            return Err(ParseError::InvalidDevPort(format!("{} has bits above pipe", raw)));
        }
        if (raw & 0x7F) as usize >= BF_PIPE_PORT_COUNT {
            return Err(ParseError::InvalidDevPort(format!(
                "{} local port {} out of range",
                raw,
                raw & 0x7F
            )));
        }
        Ok(DevPort(raw))
    }

    pub const fn as_raw(&self) -> u16 {
        self.0
    }

    /// `pipe = (port >> 7) & 3`
    pub const fn pipe(&self) -> PipeId {
        PipeId(((self.0 >> 7) & 3) as u8)
    }

    /// `local_port = port & 0x7F`
    pub const fn local_port(&self) -> u16 {
        self.0 & 0x7F
    }

    /// Position of this port in a multicast port bitmap.
    pub const fn bit_index(&self) -> usize {
        BF_PIPE_PORT_COUNT * self.pipe().0 as usize + self.local_port() as usize
    }

    /// Inverse of [`DevPort::bit_index`].
    pub fn from_bit_index(bit: usize) -> Result<Self, ParseError> {
        if bit >= BF_PORT_COUNT {
            return Err(ParseError::InvalidDevPort(format!("bit {} out of range", bit)));
        }
        let pipe = (bit / BF_PIPE_PORT_COUNT) as u16;
        let local = (bit % BF_PIPE_PORT_COUNT) as u16;
        Ok(DevPort((pipe << 7) | local))
    }
}

impl TryFrom<u16> for DevPort {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        DevPort::from_raw(value)
    }
}

impl From<DevPort> for u16 {
    fn from(port: DevPort) -> Self {
        port.0
    }
}

impl fmt::Display for DevPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DevPort {
    type Err = ParseError;

    /// Accepts either a raw port number (`"133"`) or `pipe/local` (`"1/5"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some((pipe, local)) = s.split_once('/') {
            let pipe: u32 = pipe
                .parse()
                .map_err(|_| ParseError::InvalidDevPort(s.to_string()))?;
            let local: u16 = local
                .parse()
                .map_err(|_| ParseError::InvalidDevPort(s.to_string()))?;
            return DevPort::new(PipeId::new(pipe)?, local);
        }
        let raw: u16 = s
            .parse()
            .map_err(|_| ParseError::InvalidDevPort(s.to_string()))?;
        DevPort::from_raw(raw)
    }
}

/// Multicast LAG identifier. Every `u8` is a valid LAG id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LagId(pub u8);

impl LagId {
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LagId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map(LagId)
            .map_err(|_| ParseError::InvalidLagId(s.to_string()))
    }
}
