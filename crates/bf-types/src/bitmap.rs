//! Fixed-size membership bitmaps matching the ASIC's port and LAG address
//! spaces.

use crate::port::{DevPort, LagId, PipeId, BF_LAG_COUNT, BF_PIPE_COUNT, BF_PORT_COUNT};
use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte length of a raw multicast port map (`bf_mc_port_map_t`).
pub const BF_MC_PORT_ARRAY_SIZE: usize = BF_PORT_COUNT.div_ceil(8);

/// Byte length of a raw multicast LAG map (`bf_mc_lag_map_t`).
pub const BF_MC_LAG_ARRAY_SIZE: usize = BF_LAG_COUNT.div_ceil(8);

const PORT_WORDS: usize = BF_PORT_COUNT.div_ceil(64);
const LAG_WORDS: usize = BF_LAG_COUNT.div_ceil(64);

/// Flat bit-vector backing the public bitmap types.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct Bits<const WORDS: usize> {
    words: [u64; WORDS],
}

impl<const WORDS: usize> Bits<WORDS> {
    const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    fn set(&mut self, bit: usize) {
        self.words[bit / 64] |= 1 << (bit % 64);
    }

    fn clear(&mut self, bit: usize) {
        self.words[bit / 64] &= !(1 << (bit % 64));
    }

    fn test(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn union(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
    }

    /// Ascending iteration over set bits, O(set bits + words).
    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let tz = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(i * 64 + tz)
            })
        })
    }

    fn nth(&self, mut n: usize) -> Option<usize> {
        for (i, &word) in self.words.iter().enumerate() {
            let ones = word.count_ones() as usize;
            if n >= ones {
                n -= ones;
                continue;
            }
            let mut w = word;
            for _ in 0..n {
                w &= w - 1;
            }
            return Some(i * 64 + w.trailing_zeros() as usize);
        }
        None
    }

    fn to_bytes<const N: usize>(&self, bits: usize) -> [u8; N] {
        let mut out = [0u8; N];
        for bit in self.iter().take_while(|b| *b < bits) {
            out[bit / 8] |= 1 << (bit % 8);
        }
        out
    }

    fn from_bytes(bytes: &[u8], bits: usize) -> Result<Self, ParseError> {
        if bytes.len() != bits.div_ceil(8) {
            return Err(ParseError::InvalidBitmap(format!(
                "expected {} bytes, got {}",
                bits.div_ceil(8),
                bytes.len()
            )));
        }
        let mut out = Self::new();
        for (byte_idx, byte) in bytes.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    let idx = byte_idx * 8 + bit;
                    if idx >= bits {
                        return Err(ParseError::InvalidBitmap(format!(
                            "bit {} set beyond {}",
                            idx, bits
                        )));
                    }
                    out.set(idx);
                }
            }
        }
        Ok(out)
    }
}

impl<const WORDS: usize> Default for Bits<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Set of multicast-capable device ports.
///
/// Ports are stored at [`DevPort::bit_index`], so iteration yields ports in
/// ascending pipe-then-local order, which is also ascending `DevPort` order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct PortBitmap {
    bits: Bits<PORT_WORDS>,
}

impl PortBitmap {
    pub const fn new() -> Self {
        Self { bits: Bits::new() }
    }

    pub fn set(&mut self, port: DevPort) {
        self.bits.set(port.bit_index());
    }

    pub fn clear(&mut self, port: DevPort) {
        self.bits.clear(port.bit_index());
    }

    pub fn contains(&self, port: DevPort) -> bool {
        self.bits.test(port.bit_index())
    }

    pub fn count(&self) -> usize {
        self.bits.count()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns the `n`-th set port in ascending order.
    pub fn nth(&self, n: usize) -> Option<DevPort> {
        self.bits.nth(n).and_then(|b| DevPort::from_bit_index(b).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = DevPort> + '_ {
        self.bits.iter().filter_map(|b| DevPort::from_bit_index(b).ok())
    }

    pub fn union_with(&mut self, other: &PortBitmap) {
        self.bits.union(&other.bits);
    }

    /// Pipes hosting at least one port of this bitmap.
    pub fn pipes(&self) -> PipeBitmap {
        let mut pipes = PipeBitmap::new();
        for port in self.iter() {
            pipes.set(port.pipe());
        }
        pipes
    }

    /// Raw `bf_mc_port_map_t` layout.
    pub fn to_bytes(&self) -> [u8; BF_MC_PORT_ARRAY_SIZE] {
        self.bits.to_bytes(BF_PORT_COUNT)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            bits: Bits::from_bytes(bytes, BF_PORT_COUNT)?,
        })
    }
}

impl FromIterator<DevPort> for PortBitmap {
    fn from_iter<I: IntoIterator<Item = DevPort>>(iter: I) -> Self {
        let mut map = PortBitmap::new();
        for port in iter {
            map.set(port);
        }
        map
    }
}

impl TryFrom<Vec<u16>> for PortBitmap {
    type Error = ParseError;

    fn try_from(ports: Vec<u16>) -> Result<Self, Self::Error> {
        ports.into_iter().map(DevPort::from_raw).collect()
    }
}

impl From<PortBitmap> for Vec<u16> {
    fn from(map: PortBitmap) -> Self {
        map.iter().map(|p| p.as_raw()).collect()
    }
}

impl fmt::Debug for PortBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|p| p.as_raw())).finish()
    }
}

/// Set of multicast LAG ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct LagBitmap {
    bits: Bits<LAG_WORDS>,
}

impl LagBitmap {
    pub const fn new() -> Self {
        Self { bits: Bits::new() }
    }

    pub fn set(&mut self, lag: LagId) {
        self.bits.set(lag.index());
    }

    pub fn clear(&mut self, lag: LagId) {
        self.bits.clear(lag.index());
    }

    pub fn contains(&self, lag: LagId) -> bool {
        self.bits.test(lag.index())
    }

    pub fn count(&self) -> usize {
        self.bits.count()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LagId> + '_ {
        self.bits.iter().map(|b| LagId(b as u8))
    }

    /// Raw `bf_mc_lag_map_t` layout.
    pub fn to_bytes(&self) -> [u8; BF_MC_LAG_ARRAY_SIZE] {
        self.bits.to_bytes(BF_LAG_COUNT)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            bits: Bits::from_bytes(bytes, BF_LAG_COUNT)?,
        })
    }
}

impl FromIterator<LagId> for LagBitmap {
    fn from_iter<I: IntoIterator<Item = LagId>>(iter: I) -> Self {
        let mut map = LagBitmap::new();
        for lag in iter {
            map.set(lag);
        }
        map
    }
}

impl From<Vec<u8>> for LagBitmap {
    fn from(lags: Vec<u8>) -> Self {
        lags.into_iter().map(LagId).collect()
    }
}

impl From<LagBitmap> for Vec<u8> {
    fn from(map: LagBitmap) -> Self {
        map.iter().map(|l| l.0).collect()
    }
}

impl fmt::Debug for LagBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|l| l.0)).finish()
    }
}

/// Set of pipelines.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipeBitmap(u8);

impl PipeBitmap {
    pub const fn new() -> Self {
        PipeBitmap(0)
    }

    /// Every pipe of a device with `num_pipes` pipelines.
    pub fn all(num_pipes: usize) -> Self {
        let n = num_pipes.min(BF_PIPE_COUNT);
        PipeBitmap(((1u16 << n) - 1) as u8)
    }

    pub fn set(&mut self, pipe: PipeId) {
        self.0 |= 1 << pipe.as_u32();
    }

    pub fn contains(&self, pipe: PipeId) -> bool {
        self.0 & (1 << pipe.as_u32()) != 0
    }

    pub fn union_with(&mut self, other: PipeBitmap) {
        self.0 |= other.0;
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = PipeId> + '_ {
        (0..BF_PIPE_COUNT as u32)
            .filter_map(|p| PipeId::new(p).ok())
            .filter(|p| self.contains(*p))
    }
}

impl fmt::Debug for PipeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeBitmap({:#06b})", self.0)
    }
}
