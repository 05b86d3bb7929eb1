//! Type-safe multicast object handles.
//!
//! Handles are opaque 32-bit values. Bits 31..28 carry the object kind,
//! bits 27..20 the arena slot generation and bits 19..0 the slot index, so a
//! handle that outlived its object never resolves to the slot's next tenant.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw handle value as exchanged with C callers.
pub type RawMcHandle = u32;

const KIND_SHIFT: u32 = 28;
const GEN_SHIFT: u32 = 20;
const GEN_MASK: u32 = 0xFF;
pub(crate) const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

/// Marker trait for multicast object kinds.
pub trait McObjectKind: Send + Sync + Clone + Copy + 'static {
    /// Kind tag stored in the top nibble of the handle.
    const TAG: u32;

    /// Object kind name for diagnostics.
    fn type_name() -> &'static str;
}

/// A handle to a multicast object of kind `T`.
///
/// The generation is 8 bits wide and wraps, so staleness is only detected
/// within 256 destroy/create cycles of the same slot. A handle kept across
/// more reuses than that can resolve to the slot's current object.
#[derive(Clone, Copy)]
pub struct McHandle<T: McObjectKind> {
    raw: RawMcHandle,
    _marker: PhantomData<T>,
}

impl<T: McObjectKind> McHandle<T> {
    /// The invalid handle sentinel (`-1` in the C interface).
    pub const INVALID: Self = Self {
        raw: u32::MAX,
        _marker: PhantomData,
    };

    /// Validates a raw handle value.
    ///
    /// Returns `None` for the sentinel or a handle of another kind.
    pub fn from_raw(raw: RawMcHandle) -> Option<Self> {
        if raw == u32::MAX || raw >> KIND_SHIFT != T::TAG {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    pub(crate) fn compose(index: u32, generation: u8) -> Self {
        Self {
            raw: (T::TAG << KIND_SHIFT) | ((generation as u32) << GEN_SHIFT) | (index & INDEX_MASK),
            _marker: PhantomData,
        }
    }

    pub const fn as_raw(&self) -> RawMcHandle {
        self.raw
    }

    pub(crate) fn index(&self) -> u32 {
        self.raw & INDEX_MASK
    }

    pub(crate) fn generation(&self) -> u8 {
        ((self.raw >> GEN_SHIFT) & GEN_MASK) as u8
    }

    pub const fn is_valid(&self) -> bool {
        self.raw != u32::MAX
    }
}

impl<T: McObjectKind> fmt::Debug for McHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#010x})", T::type_name(), self.raw)
    }
}

impl<T: McObjectKind> fmt::Display for McHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#010x}", T::type_name(), self.raw)
    }
}

impl<T: McObjectKind> PartialEq for McHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: McObjectKind> Eq for McHandle<T> {}

impl<T: McObjectKind> PartialOrd for McHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handles order by slot index, so enumeration follows arena order.
impl<T: McObjectKind> Ord for McHandle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index()
            .cmp(&other.index())
            .then(self.generation().cmp(&other.generation()))
    }
}

impl<T: McObjectKind> Hash for McHandle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: McObjectKind> Serialize for McHandle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.raw)
    }
}

impl<'de, T: McObjectKind> Deserialize<'de> for McHandle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;
        McHandle::from_raw(raw).ok_or_else(|| {
            serde::de::Error::custom(format!("{:#010x} is not a {} handle", raw, T::type_name()))
        })
    }
}

macro_rules! define_object_kind {
    ($name:ident, $tag:literal, $type_name:literal, $hdl_alias:ident) => {
        #[doc = concat!("Marker type for ", $type_name, " objects.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl McObjectKind for $name {
            const TAG: u32 = $tag;

            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("Handle to a ", $type_name, " object.")]
        pub type $hdl_alias = McHandle<$name>;
    };
}

define_object_kind!(MgrpKind, 1, "mgrp", MgrpHdl);
define_object_kind!(NodeKind, 2, "node", NodeHdl);
define_object_kind!(EcmpKind, 3, "ecmp", EcmpHdl);

/// Session handle returned by `session_create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub u32);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_layout() {
        let node = NodeHdl::compose(5, 3);
        assert_eq!(node.as_raw(), 0x2030_0005);
        assert_eq!(node.index(), 5);
        assert_eq!(node.generation(), 3);
        assert!(node.is_valid());
    }

    #[test]
    fn test_handle_kind_checked() {
        let node = NodeHdl::compose(1, 0);
        assert!(NodeHdl::from_raw(node.as_raw()).is_some());
        assert!(EcmpHdl::from_raw(node.as_raw()).is_none());
        assert!(NodeHdl::from_raw(u32::MAX).is_none());
        assert!(!NodeHdl::INVALID.is_valid());
    }

    #[test]
    fn test_handle_order_by_index() {
        let a = MgrpHdl::compose(1, 9);
        let b = MgrpHdl::compose(2, 0);
        assert!(a < b);
    }

    #[test]
    fn test_handle_debug() {
        let debug = format!("{:?}", EcmpHdl::compose(1, 0));
        assert_eq!(debug, "ecmp(0x30000001)");
    }

    #[test]
    fn test_handle_serde() {
        let node = NodeHdl::compose(7, 1);
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(serde_json::from_str::<NodeHdl>(&json).unwrap(), node);
        assert!(serde_json::from_str::<MgrpHdl>(&json).is_err());
    }
}
