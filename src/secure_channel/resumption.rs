/*
 *
 *    Copyright (c) 2020-2022 Project CHIP Authors
 *
 *    Licensed under the Apache License, Version 2.0 (the "License");
 *    you may not use this file except in compliance with the License.
 *    You may obtain a copy of the License at
 *
 *        http://www.apache.org/licenses/LICENSE-2.0
 *
 *    Unless required by applicable law or agreed to in writing, software
 *    distributed under the License is distributed on an "AS IS" BASIS,
 *    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *    See the License for the specific language governing permissions and
 *    limitations under the License.
 */

//! The resumption store: maps the resumption identifier negotiated during
//! a successful handshake onto the material needed for the Sigma2Resume
//! fast path. The records contain only values that are safe to persist
//! alongside the fabric credentials.

use core::num::NonZeroU8;

use heapless::Vec;

use crate::crypto;
use crate::secure_channel::case::CASE_RESUMPTION_ID_LEN;

/// One resumable prior session. The transcript digest of the original
/// handshake rides along so that a resumed session derives channel keys
/// byte-identical to the session it shortcuts.
#[derive(Debug, Clone)]
pub struct ResumptionRecord {
    pub resumption_id: [u8; CASE_RESUMPTION_ID_LEN],
    pub shared_secret: [u8; crypto::ECDH_SHARED_SECRET_LEN_BYTES],
    pub message_digest: [u8; crypto::SHA256_HASH_LEN_BYTES],
    pub peer_nodeid: u64,
    pub fabric_idx: NonZeroU8,
}

/// A fixed-capacity, insertion-ordered store of resumption records.
/// Oldest records are evicted first when the capacity is exceeded.
pub struct ResumptionStore<const N: usize = 8> {
    records: Vec<ResumptionRecord, N>,
}

impl<const N: usize> Default for ResumptionStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ResumptionStore<N> {
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// Insert a record, replacing any record with the same resumption id;
    /// evicts the oldest record when the store is full
    pub fn put(&mut self, record: ResumptionRecord) {
        self.evict(&record.resumption_id);

        if self.records.len() == N {
            self.records.remove(0);
        }

        // Capacity was just ensured
        let _ = self.records.push(record);
    }

    /// Look up a record by the resumption id presented in Sigma1
    pub fn get(&self, resumption_id: &[u8]) -> Option<&ResumptionRecord> {
        self.records
            .iter()
            .find(|record| record.resumption_id == resumption_id)
    }

    /// Look up the most recent record for a peer; the initiator uses this
    /// to decide whether a fast-path Sigma1 can be attempted
    pub fn find_for_peer(&self, fabric_idx: NonZeroU8, peer_nodeid: u64) -> Option<&ResumptionRecord> {
        self.records
            .iter()
            .rev()
            .find(|record| record.fabric_idx == fabric_idx && record.peer_nodeid == peer_nodeid)
    }

    /// Drop the record with the given resumption id, if present
    pub fn evict(&mut self, resumption_id: &[u8]) {
        self.records
            .retain(|record| record.resumption_id != resumption_id);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u8, peer: u64) -> ResumptionRecord {
        ResumptionRecord {
            resumption_id: [id; CASE_RESUMPTION_ID_LEN],
            shared_secret: [0x5e; 32],
            message_digest: [0xd1; 32],
            peer_nodeid: peer,
            fabric_idx: NonZeroU8::new(1).unwrap(),
        }
    }

    #[test]
    fn test_put_get() {
        let mut store = ResumptionStore::<4>::new();
        store.put(record(1, 100));
        store.put(record(2, 200));

        assert_eq!(store.get(&[1; 16]).unwrap().peer_nodeid, 100);
        assert_eq!(store.get(&[2; 16]).unwrap().peer_nodeid, 200);
        assert!(store.get(&[3; 16]).is_none());
    }

    #[test]
    fn test_replace_same_id() {
        let mut store = ResumptionStore::<4>::new();
        store.put(record(1, 100));
        store.put(record(1, 300));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&[1; 16]).unwrap().peer_nodeid, 300);
    }

    #[test]
    fn test_evict_oldest_on_overflow() {
        let mut store = ResumptionStore::<2>::new();
        store.put(record(1, 100));
        store.put(record(2, 200));
        store.put(record(3, 300));

        assert_eq!(store.len(), 2);
        assert!(store.get(&[1; 16]).is_none());
        assert!(store.get(&[2; 16]).is_some());
        assert!(store.get(&[3; 16]).is_some());
    }

    #[test]
    fn test_find_for_peer_prefers_newest() {
        let mut store = ResumptionStore::<4>::new();
        store.put(record(1, 100));
        store.put(record(2, 100));

        assert_eq!(
            store
                .find_for_peer(NonZeroU8::new(1).unwrap(), 100)
                .unwrap()
                .resumption_id,
            [2; 16]
        );
        assert!(store.find_for_peer(NonZeroU8::new(2).unwrap(), 100).is_none());
    }
}
