//! Common device types for programming a packet switch ASIC.
//!
//! This crate provides type-safe representations of the addressing primitives
//! shared by the fixed-function blocks of the forwarding pipeline:
//!
//! - [`DevId`]: ASIC device identifier
//! - [`DevPort`]: `bf_dev_port_t` style port number (pipe + local port)
//! - [`PipeId`]: pipeline index
//! - [`LagId`]: multicast LAG identifier
//! - [`PortBitmap`], [`LagBitmap`], [`PipeBitmap`]: fixed-size membership sets

mod bitmap;
mod port;

pub use bitmap::{LagBitmap, PipeBitmap, PortBitmap, BF_MC_LAG_ARRAY_SIZE, BF_MC_PORT_ARRAY_SIZE};
pub use port::{
    DevId, DevPort, LagId, PipeId, BF_LAG_COUNT, BF_PIPE_COUNT, BF_PIPE_PORT_COUNT, BF_PORT_COUNT,
};

/// Common error type for parsing and range failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid device port: {0}")]
    InvalidDevPort(String),

    #[error("invalid pipe id: {0} (must be < {max})", max = BF_PIPE_COUNT)]
    InvalidPipe(u32),

    #[error("invalid LAG id: {0}")]
    InvalidLagId(String),

    #[error("invalid bitmap: {0}")]
    InvalidBitmap(String),
}
