//! Value table
//!
//! Maps host values to the small integer ids the module embeds in boxed
//! slots. Three parallel structures are kept in step:
//!
//! - `values[id]` holds the value (or `None` once the id is reclaimed),
//! - `ids[key(value)]` is the reverse lookup, keyed by value identity,
//! - `ref_counts[id]` counts the references the module currently holds.
//!
//! An id whose count drops to zero through [`ValueTable::release`] is cleared
//! and pushed onto the free pool; the next new value takes it before the
//! table grows. Ids created by [`ValueTable::with_predefined`] are pinned.

use super::value::ValueKey;
use super::{HostError, Value};
use std::collections::HashMap;

/// Reference count of a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCount {
    /// Pre-registered entries the module hard-codes; never reclaimed
    Pinned,
    Live(u32),
}

/// Bidirectional value/id map with reference counting and id reuse
#[derive(Debug, Default)]
pub struct ValueTable {
    values: Vec<Option<Value>>,
    ids: HashMap<ValueKey, u32>,
    ref_counts: Vec<RefCount>,
    id_pool: Vec<u32>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose first ids are pinned to `values`, in order.
    pub fn with_predefined(values: impl IntoIterator<Item = Value>) -> Self {
        let mut table = Self::new();
        for value in values {
            let id = table.values.len() as u32;
            table.ids.insert(value.key(), id);
            table.values.push(Some(value));
            table.ref_counts.push(RefCount::Pinned);
        }
        table
    }

    /// Number of slots, live or free
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Ids waiting for reuse, most recently freed last
    pub fn free_ids(&self) -> &[u32] {
        &self.id_pool
    }

    pub fn id_of(&self, value: &Value) -> Option<u32> {
        self.ids.get(&value.key()).copied()
    }

    pub fn ref_count(&self, id: u32) -> Option<RefCount> {
        match self.values.get(id as usize) {
            Some(Some(_)) => self.ref_counts.get(id as usize).copied(),
            _ => None,
        }
    }

    /// The value behind a live id.
    ///
    /// # Errors
    /// Returns `UnknownRef` for ids that were never allocated or were reclaimed.
    pub fn get(&self, id: u32) -> Result<Value, HostError> {
        match self.values.get(id as usize) {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(HostError::UnknownRef(id)),
        }
    }

    /// Take a new reference to `value`, allocating an id on first sight.
    ///
    /// Reuses a freed id before growing the table.
    pub fn acquire(&mut self, value: Value) -> u32 {
        let key = value.key();
        let id = match self.ids.get(&key) {
            Some(&id) => id,
            None => {
                let id = match self.id_pool.pop() {
                    Some(id) => {
                        self.values[id as usize] = Some(value);
                        self.ref_counts[id as usize] = RefCount::Live(0);
                        id
                    }
                    None => {
                        self.values.push(Some(value));
                        self.ref_counts.push(RefCount::Live(0));
                        (self.values.len() - 1) as u32
                    }
                };
                tracing::debug!(id, "allocated value id");
                self.ids.insert(key, id);
                id
            }
        };

        if let RefCount::Live(count) = &mut self.ref_counts[id as usize] {
            *count += 1;
        }
        id
    }

    /// Drop one reference to `id`, reclaiming it when none remain.
    ///
    /// Returns `true` if the id went back to the free pool.
    ///
    /// # Errors
    /// Returns `UnknownRef` if `id` is not live.
    pub fn release(&mut self, id: u32) -> Result<bool, HostError> {
        let index = id as usize;
        if !matches!(self.values.get(index), Some(Some(_))) {
            return Err(HostError::UnknownRef(id));
        }

        let RefCount::Live(count) = &mut self.ref_counts[index] else {
            return Ok(false);
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return Ok(false);
        }

        if let Some(value) = self.values[index].take() {
            self.ids.remove(&value.key());
        }
        self.id_pool.push(id);
        tracing::debug!(id, "reclaimed value id");
        Ok(true)
    }
}
