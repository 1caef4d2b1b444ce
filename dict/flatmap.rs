//! A sparse map keyed by `Code`, backed by a dense vector.
//!
//! Codes are dense small integers handed out by the code dictionary, so a
//! `Vec<Option<T>>` indexed by the raw id beats a hash map for the hot
//! accumulation loops: lookup is a bounds check and an index. One generic
//! container serves every payload the accumulator needs (scalar weights,
//! nested text-weight maps, reservoir samplers).

use crate::types::Code;

#[derive(Debug, Clone)]
pub struct FlatMap<T> {
    entries: Vec<Option<T>>,
}

impl<T> Default for FlatMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FlatMap<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Returns the payload for `key`, or `None` if it was never inserted.
    pub fn find(&self, key: Code) -> Option<&T> {
        self.entries.get(key.0 as usize).and_then(Option::as_ref)
    }

    pub fn find_mut(&mut self, key: Code) -> Option<&mut T> {
        self.entries
            .get_mut(key.0 as usize)
            .and_then(Option::as_mut)
    }

    /// Returns a mutable reference to the payload for `key`, inserting
    /// `default` first if the key is absent.
    pub fn find_or_insert(&mut self, key: Code, default: T) -> &mut T {
        let index = key.0 as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index].get_or_insert(default)
    }

    /// Inserts or overwrites the payload for `key`.
    pub fn insert(&mut self, key: Code, value: T) {
        let index = key.0 as usize;
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, || None);
        }
        self.entries[index] = Some(value);
    }

    /// Present keys in ascending code order. The order is stable across
    /// insertions of other keys, which keeps downstream artifacts reproducible.
    pub fn keys(&self) -> impl Iterator<Item = Code> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| Code(i as u32)))
    }

    /// Iterates present entries in ascending code order.
    pub fn iter(&self) -> impl Iterator<Item = (Code, &T)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (Code(i as u32), v)))
    }

    /// Consumes the map, yielding owned entries in ascending code order.
    pub fn into_entries(self) -> impl Iterator<Item = (Code, T)> {
        self.entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|v| (Code(i as u32), v)))
    }
}
