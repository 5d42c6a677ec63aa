// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Append-mostly transaction log.
//!
//! Records are keyed by [`RecordId`] for O(1) lookup, and each appended id is
//! also pushed to a lock-free outbox so exporters can stream records in the
//! order they were committed.

use crate::base::{RecordId, UserId};
use crate::transaction::{RecordDraft, TransactionRecord};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe store of [`TransactionRecord`]s.
#[derive(Debug, Default)]
pub struct TransactionLog {
    records: DashMap<RecordId, TransactionRecord>,

    /// Ids in commit order, not yet drained by an exporter.
    outbox: SegQueue<RecordId>,

    sequence: AtomicU64,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next id to `draft` and stores it.
    pub(crate) fn append(&self, draft: RecordDraft) -> TransactionRecord {
        let id = RecordId(self.sequence.fetch_add(1, Ordering::Relaxed) + 1);
        let record = TransactionRecord::from_draft(id, draft);

        match self.records.entry(id) {
            // The sequence never hands out an id twice.
            Entry::Occupied(_) => unreachable!("record id {id} reused"),
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                self.outbox.push(id);
            }
        }
        record
    }

    pub fn get(&self, id: RecordId) -> Option<TransactionRecord> {
        self.records.get(&id).map(|record| record.clone())
    }

    /// Exclusive handle on a record; holds its shard lock until dropped.
    pub(crate) fn get_mut(&self, id: RecordId) -> Option<RefMut<'_, RecordId, TransactionRecord>> {
        self.records.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records matching `predicate`, newest first.
    pub fn select<F>(&self, predicate: F) -> Vec<TransactionRecord>
    where
        F: Fn(&TransactionRecord) -> bool,
    {
        let mut selected: Vec<TransactionRecord> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        selected.sort_unstable_by(|a, b| b.id.cmp(&a.id));
        selected
    }

    pub fn pending_payouts_for(&self, instructor: UserId) -> Vec<TransactionRecord> {
        self.select(|record| record.is_pending_payout_for(instructor))
    }

    pub fn involving(&self, user: UserId) -> Vec<TransactionRecord> {
        self.select(|record| record.involves(user))
    }

    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        let mut records = self.select(|_| true);
        records.truncate(limit);
        records
    }

    /// Pops every id committed since the last drain, in commit order.
    pub fn drain_committed(&self) -> Vec<RecordId> {
        std::iter::from_fn(|| self.outbox.pop()).collect()
    }
}
