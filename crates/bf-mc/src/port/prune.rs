//! L2 exclusion: per-yid port prune masks and the global RID register.

use crate::error::{McError, McResult};
use bf_types::{DevPort, PortBitmap};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneTable {
    masks: BTreeMap<u16, PortBitmap>,
    max_yids: u32,
    global_rid: u16,
}

impl PruneTable {
    pub fn new(max_yids: u32) -> Self {
        Self {
            masks: BTreeMap::new(),
            max_yids,
            global_rid: 0,
        }
    }

    pub fn check_yid(&self, yid: u16) -> McResult<()> {
        if yid as u32 >= self.max_yids {
            return Err(McError::invalid_arg(format!(
                "yid {} out of range (table size {})",
                yid, self.max_yids
            )));
        }
        Ok(())
    }

    pub fn set_mask(&mut self, yid: u16, ports: PortBitmap) -> McResult<()> {
        self.check_yid(yid)?;
        if ports.is_empty() {
            self.masks.remove(&yid);
        } else {
            self.masks.insert(yid, ports);
        }
        Ok(())
    }

    pub fn mask(&self, yid: u16) -> McResult<PortBitmap> {
        self.check_yid(yid)?;
        Ok(self.masks.get(&yid).copied().unwrap_or_default())
    }

    /// Out-of-range yids prune nothing.
    pub fn is_pruned(&self, yid: u16, port: DevPort) -> bool {
        self.masks.get(&yid).is_some_and(|mask| mask.contains(port))
    }

    pub fn global_rid(&self) -> u16 {
        self.global_rid
    }

    pub fn set_global_rid(&mut self, rid: u16) {
        self.global_rid = rid;
    }

    /// Non-empty masks in ascending yid order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &PortBitmap)> + '_ {
        self.masks.iter().map(|(yid, mask)| (*yid, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(raw: u16) -> DevPort {
        DevPort::from_raw(raw).unwrap()
    }

    #[test]
    fn test_mask_roundtrip() {
        let mut table = PruneTable::new(288);
        let mask: PortBitmap = [port(1), port(130)].into_iter().collect();
        table.set_mask(7, mask).unwrap();
        assert_eq!(table.mask(7).unwrap(), mask);
        assert!(table.is_pruned(7, port(130)));
        assert!(!table.is_pruned(7, port(2)));
        assert!(table.mask(8).unwrap().is_empty());
    }

    #[test]
    fn test_yid_range() {
        let mut table = PruneTable::new(4);
        assert!(matches!(
            table.set_mask(4, PortBitmap::new()),
            Err(McError::InvalidArg { .. })
        ));
        assert!(table.mask(4).is_err());
        assert!(!table.is_pruned(4, port(1)));
    }

    #[test]
    fn test_clearing_mask_drops_entry() {
        let mut table = PruneTable::new(16);
        table.set_mask(1, [port(3)].into_iter().collect()).unwrap();
        table.set_mask(1, PortBitmap::new()).unwrap();
        assert_eq!(table.iter().count(), 0);
    }
}
