//! Table storage
//!
//! Tables store their fields in a hash table with chained buckets over an
//! insertion-ordered entry array. Traversal with `next` walks the entry
//! array, so the order is stable while no new key is added.
//!
//! Layout:
//! - entries[]: (key, value, hash_next) in insertion order
//! - hash_table[hash_size]: 1-based indices into entries (0 = end of chain)
//!
//! Assigning nil to a field leaves a dead entry behind (key kept, value nil).
//! Dead entries keep `next` valid for keys cleared during traversal and are
//! dropped the next time the table grows.

use crate::error::RuntimeError;
use crate::value::{float_to_integer, TableRef, Value};

/// A field in the entry array
#[derive(Clone, Debug)]
struct Entry {
    key: Value,
    value: Value,
    /// 1-based index of the next entry in the same bucket (0 = end of chain)
    hash_next: u32,
}

/// Script table with an optional metatable
#[derive(Debug)]
pub struct Table {
    /// Number of live (non-nil) fields
    live: u32,
    /// Hash table mask (size - 1)
    hash_mask: u32,
    entries: Vec<Entry>,
    hash_table: Vec<u32>,
    metatable: Option<TableRef>,
}

impl Table {
    /// Minimum hash table size
    const MIN_HASH_SIZE: usize = 4;

    /// Maximum load factor before resize
    const MAX_LOAD_FACTOR: f64 = 0.75;

    /// Create a new empty table
    pub fn new() -> Self {
        Table {
            live: 0,
            hash_mask: (Self::MIN_HASH_SIZE - 1) as u32,
            entries: Vec::new(),
            hash_table: vec![0; Self::MIN_HASH_SIZE],
            metatable: None,
        }
    }

    /// Create a table with room for `capacity` fields
    pub fn with_capacity(capacity: usize) -> Self {
        let hash_size = capacity.next_power_of_two().max(Self::MIN_HASH_SIZE);
        Table {
            live: 0,
            hash_mask: (hash_size - 1) as u32,
            entries: Vec::with_capacity(capacity),
            hash_table: vec![0; hash_size],
            metatable: None,
        }
    }

    /// Number of live fields
    #[inline]
    pub fn field_count(&self) -> usize {
        self.live as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[inline]
    pub fn metatable(&self) -> Option<&TableRef> {
        self.metatable.as_ref()
    }

    #[inline]
    pub fn set_metatable(&mut self, metatable: Option<TableRef>) {
        self.metatable = metatable;
    }

    /// Hash a normalized key
    fn hash_key(key: &Value) -> u32 {
        let raw: u64 = match key {
            Value::Integer(i) => *i as u64,
            Value::Number(n) => n.to_bits(),
            Value::Boolean(b) => *b as u64 + 1,
            Value::String(s) => {
                // FNV-1a
                s.bytes().fold(0xcbf29ce484222325u64, |h, b| {
                    (h ^ b as u64).wrapping_mul(0x100000001b3)
                })
            }
            other => other.identity().unwrap_or(0) as u64,
        };

        // Mix bits for better distribution
        let mut h = (raw ^ (raw >> 32)) as u32;
        h ^= h >> 16;
        h = h.wrapping_mul(0x85ebca6b);
        h ^= h >> 13;
        h = h.wrapping_mul(0xc2b2ae35);
        h ^= h >> 16;
        h
    }

    /// Normalize a key: integral floats become integers, nil and NaN are rejected
    fn normalize_key(key: &Value) -> Result<Value, RuntimeError> {
        match key {
            Value::Nil => Err(RuntimeError::runtime("table index is nil")),
            Value::Number(n) if n.is_nan() => Err(RuntimeError::runtime("table index is NaN")),
            Value::Number(n) => Ok(float_to_integer(*n)
                .map(Value::Integer)
                .unwrap_or(Value::Number(*n))),
            other => Ok(other.clone()),
        }
    }

    /// Find the entry index of a key, including dead entries
    fn find(&self, key: &Value) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let hash = Self::hash_key(key);
        let mut idx = self.hash_table[(hash & self.hash_mask) as usize];

        while idx != 0 {
            let entry_idx = (idx - 1) as usize;
            let entry = &self.entries[entry_idx];
            if entry.key.raw_equal(key) {
                return Some(entry_idx);
            }
            idx = entry.hash_next;
        }

        None
    }

    /// Raw read; missing fields read as nil
    pub fn get(&self, key: &Value) -> Value {
        let Ok(key) = Self::normalize_key(key) else {
            return Value::Nil;
        };
        self.find(&key)
            .map(|idx| self.entries[idx].value.clone())
            .unwrap_or(Value::Nil)
    }

    /// Raw read of a string field
    pub fn get_str(&self, name: &str) -> Value {
        self.get(&Value::string(name))
    }

    /// Raw read of an integer field
    pub fn get_int(&self, n: i64) -> Value {
        self.get(&Value::Integer(n))
    }

    /// Raw write; assigning nil removes the field
    pub fn set(&mut self, key: Value, value: Value) -> Result<(), RuntimeError> {
        let key = Self::normalize_key(&key)?;

        if let Some(idx) = self.find(&key) {
            let entry = &mut self.entries[idx];
            match (entry.value.is_nil(), value.is_nil()) {
                (true, false) => self.live += 1,
                (false, true) => self.live -= 1,
                _ => {}
            }
            entry.value = value;
            return Ok(());
        }

        if value.is_nil() {
            return Ok(());
        }

        // Check if we need to resize
        let load = (self.entries.len() + 1) as f64 / (self.hash_mask + 1) as f64;
        if load > Self::MAX_LOAD_FACTOR {
            self.resize();
        }

        let hash = Self::hash_key(&key);
        let bucket = (hash & self.hash_mask) as usize;

        self.entries.push(Entry {
            key,
            value,
            hash_next: self.hash_table[bucket],
        });
        self.hash_table[bucket] = self.entries.len() as u32;
        self.live += 1;

        Ok(())
    }

    /// Raw write of a string field
    pub fn set_str(&mut self, name: &str, value: Value) {
        // String keys are never nil or NaN
        let _ = self.set(Value::string(name), value);
    }

    /// Raw write of an integer field
    pub fn set_int(&mut self, n: i64, value: Value) {
        let _ = self.set(Value::Integer(n), value);
    }

    /// Drop dead entries and rebuild the hash table at double size
    fn resize(&mut self) {
        self.entries.retain(|e| !e.value.is_nil());

        let wanted = ((self.entries.len() + 1) * 2).next_power_of_two();
        let new_size = wanted.max(Self::MIN_HASH_SIZE);
        self.hash_mask = (new_size - 1) as u32;
        self.hash_table = vec![0; new_size];

        for i in 0..self.entries.len() {
            let hash = Self::hash_key(&self.entries[i].key);
            let bucket = (hash & self.hash_mask) as usize;
            self.entries[i].hash_next = self.hash_table[bucket];
            self.hash_table[bucket] = (i + 1) as u32;
        }
    }

    /// Traversal step: the live field following `key` (nil starts the walk)
    ///
    /// Returns `Ok(None)` once the traversal is complete.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, RuntimeError> {
        let start = if key.is_nil() {
            0
        } else {
            let key = Self::normalize_key(key)?;
            match self.find(&key) {
                Some(idx) => idx + 1,
                None => return Err(RuntimeError::runtime("invalid key to 'next'")),
            }
        };

        Ok(self.entries[start.min(self.entries.len())..]
            .iter()
            .find(|e| !e.value.is_nil())
            .map(|e| (e.key.clone(), e.value.clone())))
    }

    /// Border of the sequence part: the largest n with t[1..=n] all non-nil
    pub fn len(&self) -> usize {
        let mut n = 0;
        while !self.get_int(n as i64 + 1).is_nil() {
            n += 1;
        }
        n
    }

    /// Iterate over live fields in traversal order
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .filter(|e| !e.value.is_nil())
            .map(|e| (&e.key, &e.value))
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}
