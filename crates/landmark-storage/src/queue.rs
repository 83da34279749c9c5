//! Durable ingest queue.
//!
//! Requests are appended under monotonic sequence keys and removed only
//! when a consumer acknowledges them, giving at-least-once delivery.
//! Consumers must tolerate redelivery; atom ingest is idempotent.

use std::sync::atomic::Ordering;

use landmark_types::IngestRequest;
use rocksdb::{IteratorMode, WriteBatch};
use tracing::{debug, warn};

use crate::column_families::CF_INGEST_QUEUE;
use crate::db::Storage;
use crate::error::StorageError;
use crate::keys::SeqKey;

/// A persistent FIFO of ingest requests.
pub trait IngestQueue: Send + Sync {
    /// Append a request. Returns its sequence number.
    fn enqueue(&self, request: &IngestRequest) -> Result<u64, StorageError>;

    /// Oldest unacknowledged requests, without removing them.
    ///
    /// Entries that cannot be decoded are skipped; acknowledging past
    /// them removes them.
    fn dequeue(&self, limit: usize) -> Result<Vec<(u64, IngestRequest)>, StorageError>;

    /// Remove every entry up to and including `up_to`. Returns the count.
    fn ack(&self, up_to: u64) -> Result<usize, StorageError>;

    /// Unacknowledged entries, including undecodable ones
    fn depth(&self) -> Result<u64, StorageError>;
}

impl IngestQueue for Storage {
    fn enqueue(&self, request: &IngestRequest) -> Result<u64, StorageError> {
        let cf = self.cf(CF_INGEST_QUEUE)?;
        let seq = self.queue_sequence.fetch_add(1, Ordering::SeqCst);
        let key = SeqKey::new(SeqKey::QUEUE, seq);
        self.db.put_cf(cf, key.to_bytes(), request.to_bytes()?)?;
        debug!(seq, payload = %request.payload_ref, "Enqueued ingest request");
        Ok(seq)
    }

    fn dequeue(&self, limit: usize) -> Result<Vec<(u64, IngestRequest)>, StorageError> {
        let cf = self.cf(CF_INGEST_QUEUE)?;
        let mut results = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start).take(limit) {
            let (key, value) = item?;
            let seq_key = SeqKey::from_bytes(SeqKey::QUEUE, &key)?;
            match IngestRequest::from_bytes(&value) {
                Ok(request) => results.push((seq_key.sequence, request)),
                Err(e) => warn!(seq = seq_key.sequence, error = %e, "Skipping undecodable ingest request"),
            }
        }
        Ok(results)
    }

    fn ack(&self, up_to: u64) -> Result<usize, StorageError> {
        let cf = self.cf(CF_INGEST_QUEUE)?;

        let mut batch = WriteBatch::default();
        let mut count = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let seq_key = SeqKey::from_bytes(SeqKey::QUEUE, &key)?;
            if seq_key.sequence > up_to {
                break;
            }
            batch.delete_cf(cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
            debug!(count, up_to, "Acknowledged ingest requests");
        }
        Ok(count)
    }

    fn depth(&self) -> Result<u64, StorageError> {
        self.count_cf_entries(self.cf(CF_INGEST_QUEUE)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(i: usize) -> IngestRequest {
        IngestRequest::new(vec![i as f32, 1.0], format!("blob://{}", i))
    }

    #[test]
    fn test_enqueue_dequeue_ack() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();

        for i in 0..5 {
            assert_eq!(storage.enqueue(&request(i)).unwrap(), i as u64);
        }
        let batch = storage.dequeue(3).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].1.payload_ref, "blob://0");

        // Peek does not consume
        assert_eq!(storage.dequeue(10).unwrap().len(), 5);

        assert_eq!(storage.ack(batch[2].0).unwrap(), 3);
        let rest = storage.dequeue(10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].0, 3);
        assert_eq!(storage.depth().unwrap(), 2);
    }

    #[test]
    fn test_unacked_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            storage.enqueue(&request(0)).unwrap();
            storage.enqueue(&request(1)).unwrap();
            storage.ack(0).unwrap();
        }
        let storage = Storage::open(temp_dir.path()).unwrap();
        let pending = storage.dequeue(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, 1);
        // Sequence continues after the highest surviving key
        assert_eq!(storage.enqueue(&request(2)).unwrap(), 2);
    }
}
