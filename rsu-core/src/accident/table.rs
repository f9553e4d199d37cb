/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Fixed-capacity accident table.
//!
//! Rows are kept in a `Vec` and looked up by linear scan.  At the configured
//! size (a few hundred rows, one lookup per event) this is cheaper than
//! hashing and keeps insertion order stable for rebroadcast; swapping in a
//! `HashMap<u64, AccidentRecord>` is a local change if the table grows.
//!
//! Rows are never removed: an expired accident stays as an inactive row and
//! is re-armed in place if it is reported again.  When the table is full,
//! new ids are rejected.

use crate::clock::Millis;

use super::ServerAccidentDetails;

/// One known accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccidentRecord {
    pub accident_id: u64,
    pub active: bool,
    /// Monotonic time after which the next tick deactivates the record.
    pub expire_time: Millis,
    /// Latest server view; `None` until the server has spoken about it.
    pub last_details: Option<ServerAccidentDetails>,
}

impl AccidentRecord {
    fn new(accident_id: u64) -> Self {
        Self {
            accident_id,
            active: false,
            expire_time: 0,
            last_details: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccidentTable {
    records: Vec<AccidentRecord>,
    capacity: usize,
}

impl AccidentTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn position(&self, accident_id: u64) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.accident_id == accident_id)
    }

    pub fn get(&self, accident_id: u64) -> Option<&AccidentRecord> {
        self.position(accident_id).map(|i| &self.records[i])
    }

    /// Existing row for `accident_id`, or a new inactive row.
    ///
    /// Returns `None` when the id is unknown and the table is full.
    pub fn upsert(&mut self, accident_id: u64) -> Option<&mut AccidentRecord> {
        if let Some(i) = self.position(accident_id) {
            return Some(&mut self.records[i]);
        }
        if self.records.len() >= self.capacity {
            return None;
        }
        self.records.push(AccidentRecord::new(accident_id));
        self.records.last_mut()
    }

    pub fn any_active(&self) -> bool {
        self.records.iter().any(|r| r.active)
    }

    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.active).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccidentRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AccidentRecord> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_once_per_id() {
        let mut table = AccidentTable::new(4);
        table.upsert(7).unwrap().active = true;
        table.upsert(7).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get(7).unwrap().active);
    }

    #[test]
    fn new_rows_start_inactive_without_details() {
        let mut table = AccidentTable::new(1);
        let row = table.upsert(3).unwrap();
        assert!(!row.active);
        assert!(row.last_details.is_none());
    }

    #[test]
    fn full_table_rejects_unknown_ids_but_updates_known_ones() {
        let mut table = AccidentTable::new(2);
        table.upsert(1).unwrap();
        table.upsert(2).unwrap();
        assert!(table.is_full());
        assert!(table.upsert(3).is_none());
        assert!(table.upsert(2).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn any_active_tracks_rows() {
        let mut table = AccidentTable::new(4);
        assert!(!table.any_active());
        table.upsert(1).unwrap().active = true;
        table.upsert(2).unwrap();
        assert!(table.any_active());
        assert_eq!(table.active_count(), 1);
        table.upsert(1).unwrap().active = false;
        assert!(!table.any_active());
    }
}
