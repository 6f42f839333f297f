//! Value registry
//!
//! The registry keeps host-referenced values reachable. Each retained value
//! lives in an integer slot; releasing the slot drops the registry's share of
//! the value so it can be reclaimed. Freed slot numbers are recycled.
//!
//! Named metatables (created with `State::new_metatable`) are also kept here.

use std::collections::HashMap;
use std::fmt;

use crate::value::{TableRef, Value};

/// Registry slot key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u32);

impl Slot {
    /// Slot number as seen by the runtime (1-based)
    #[inline]
    pub const fn id(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot-indexed storage of retained values
#[derive(Default)]
pub struct Registry {
    slots: Vec<Option<Value>>,
    /// Released slot numbers available for reuse
    free: Vec<Slot>,
    live: usize,
    named: HashMap<String, TableRef>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retain a value in a fresh slot
    pub fn reference(&mut self, value: Value) -> Slot {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            self.slots[slot.index()] = Some(value);
            return slot;
        }
        self.slots.push(Some(value));
        Slot(self.slots.len() as u32)
    }

    /// Release a slot; returns false if it was not live
    pub fn release(&mut self, slot: Slot) -> bool {
        match self.slots.get_mut(slot.index()) {
            Some(entry @ Some(_)) => {
                *entry = None;
                self.free.push(slot);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Read the value held by a live slot
    pub fn get(&self, slot: Slot) -> Option<&Value> {
        self.slots.get(slot.index()).and_then(Option::as_ref)
    }

    /// Overwrite the value of a live slot in place
    pub fn set(&mut self, slot: Slot, value: Value) -> bool {
        match self.slots.get_mut(slot.index()) {
            Some(Some(entry)) => {
                *entry = value;
                true
            }
            _ => false,
        }
    }

    #[inline]
    pub fn is_live(&self, slot: Slot) -> bool {
        self.get(slot).is_some()
    }

    /// Number of live slots
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots ever allocated (live or free)
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn named(&self, name: &str) -> Option<&TableRef> {
        self.named.get(name)
    }

    pub fn insert_named(&mut self, name: &str, table: TableRef) {
        self.named.insert(name.to_string(), table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_and_release() {
        let mut registry = Registry::new();

        let slot = registry.reference(Value::Integer(7));
        assert_eq!(slot.id(), 1);
        assert_eq!(registry.get(slot), Some(&Value::Integer(7)));
        assert_eq!(registry.live(), 1);

        assert!(registry.release(slot));
        assert!(!registry.is_live(slot));
        assert_eq!(registry.live(), 0);

        // Double release is refused
        assert!(!registry.release(slot));
        assert_eq!(registry.live(), 0);
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut registry = Registry::new();

        let a = registry.reference(Value::Integer(1));
        let b = registry.reference(Value::Integer(2));
        registry.release(a);

        let c = registry.reference(Value::Integer(3));
        assert_eq!(c, a);
        assert_eq!(registry.capacity(), 2);
        assert_eq!(registry.get(b), Some(&Value::Integer(2)));
        assert_eq!(registry.get(c), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_set_preserves_slot() {
        let mut registry = Registry::new();

        let slot = registry.reference(Value::Nil);
        assert!(registry.set(slot, Value::string("new")));
        assert_eq!(registry.get(slot), Some(&Value::string("new")));

        registry.release(slot);
        assert!(!registry.set(slot, Value::Integer(1)));
    }

    #[test]
    fn test_release_drops_value() {
        let mut registry = Registry::new();
        let table = Value::new_table();
        let Value::Table(inner) = &table else { unreachable!() };
        let weak = std::rc::Rc::downgrade(inner);

        let slot = registry.reference(table.clone());
        drop(table);
        assert!(weak.upgrade().is_some());

        registry.release(slot);
        assert!(weak.upgrade().is_none());
    }
}
