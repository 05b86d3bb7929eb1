//! Generation-checked slot arena backing the object stores.

use crate::error::{McError, McResult};
use crate::handle::{McHandle, McObjectKind, INDEX_BITS};
use std::marker::PhantomData;

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u8,
    value: Option<T>,
}

/// Object arena handing out [`McHandle`]s.
///
/// A freed slot bumps its generation, so handles to the previous tenant are
/// rejected with `ObjectNotFound` instead of aliasing the new one.
#[derive(Debug, Clone)]
pub(crate) struct Arena<K: McObjectKind, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    capacity: usize,
    _kind: PhantomData<K>,
}

impl<K: McObjectKind, T> Arena<K, T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            capacity: capacity.min(1 << INDEX_BITS),
            _kind: PhantomData,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, value: T) -> McResult<McHandle<K>> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(McHandle::compose(index, slot.generation));
        }
        if self.slots.len() >= self.capacity {
            return Err(McError::no_resources(format!(
                "{} table full ({} entries)",
                K::type_name(),
                self.capacity
            )));
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(McHandle::compose(index, 0))
    }

    /// Places `value` at exactly `handle`. Used when restoring logged state;
    /// call [`Arena::rebuild_free_list`] once every entry is placed.
    pub(crate) fn insert_at(&mut self, handle: McHandle<K>, value: T) -> McResult<()> {
        let index = handle.index() as usize;
        if index >= self.capacity {
            return Err(McError::invalid_arg(format!(
                "{} index beyond table capacity {}",
                handle, self.capacity
            )));
        }
        while self.slots.len() <= index {
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
        }
        let slot = &mut self.slots[index];
        if slot.value.is_some() {
            return Err(McError::already_exists(handle.to_string()));
        }
        slot.generation = handle.generation();
        slot.value = Some(value);
        self.len += 1;
        Ok(())
    }

    pub(crate) fn rebuild_free_list(&mut self) {
        self.free = self
            .slots
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, slot)| slot.value.is_none())
            .map(|(i, _)| i as u32)
            .collect();
    }

    pub(crate) fn get(&self, handle: McHandle<K>) -> McResult<&T> {
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| McError::not_found(handle.to_string()))
    }

    pub(crate) fn get_mut(&mut self, handle: McHandle<K>) -> McResult<&mut T> {
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
            .ok_or_else(|| McError::not_found(handle.to_string()))
    }

    pub(crate) fn remove(&mut self, handle: McHandle<K>) -> McResult<T> {
        let slot = self
            .slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation() && slot.value.is_some())
            .ok_or_else(|| McError::not_found(handle.to_string()))?;
        let value = slot.value.take().ok_or_else(|| McError::not_found(handle.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.len -= 1;
        Ok(value)
    }

    /// Live entries in ascending slot order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (McHandle<K>, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (McHandle::compose(i as u32, slot.generation), v))
        })
    }

    pub(crate) fn handles(&self) -> impl Iterator<Item = McHandle<K>> + '_ {
        self.iter().map(|(h, _)| h)
    }
}

/// Cursor paging shared by every `get_next_i` style query: at most `count`
/// items strictly after `cursor`, in the iterator's order.
pub(crate) fn page_after<T: Ord + Copy>(
    items: impl Iterator<Item = T>,
    cursor: T,
    count: usize,
) -> Vec<T> {
    items.filter(|item| *item > cursor).take(count).collect()
}
