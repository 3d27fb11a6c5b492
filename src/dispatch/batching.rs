//! Completion-order batch accumulation

use crate::types::{Batch, RawPayload};

/// Collects payloads as they complete and cuts them into fixed-size batches
///
/// The accumulator lives for the whole run, so a batch may hold items from
/// more than one chunk. Sequence numbers start at 1.
#[derive(Debug)]
pub(crate) struct BatchAccumulator {
    batch_size: usize,
    pending: Vec<RawPayload>,
    emitted: usize,
}

impl BatchAccumulator {
    pub(crate) fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            emitted: 0,
        }
    }

    /// Add a payload, returning a full batch once `batch_size` is reached
    pub(crate) fn push(&mut self, payload: RawPayload) -> Option<Batch> {
        self.pending.push(payload);
        if self.pending.len() >= self.batch_size {
            let items = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
            Some(self.cut(items))
        } else {
            None
        }
    }

    /// Take whatever is pending as a final, possibly short, batch
    pub(crate) fn flush(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            return None;
        }
        let items = std::mem::take(&mut self.pending);
        Some(self.cut(items))
    }

    /// Release spare buffer capacity
    pub(crate) fn reclaim(&mut self) {
        self.pending.shrink_to_fit();
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }

    fn cut(&mut self, items: Vec<RawPayload>) -> Batch {
        self.emitted += 1;
        Batch::new(self.emitted, items)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemId;
    use serde_json::Map;

    fn payload(n: usize) -> RawPayload {
        RawPayload {
            item_id: ItemId::from_link(&format!("p/{n}")).unwrap(),
            record: Map::new(),
        }
    }

    #[test]
    fn cuts_full_batches_and_flushes_remainder() {
        let mut acc = BatchAccumulator::new(2);

        assert!(acc.push(payload(1)).is_none());
        let first = acc.push(payload(2)).unwrap();
        assert_eq!(first.sequence(), 1);
        assert_eq!(first.len(), 2);

        assert!(acc.push(payload(3)).is_none());
        assert_eq!(acc.pending(), 1);

        let last = acc.flush().unwrap();
        assert_eq!(last.sequence(), 2);
        assert_eq!(last.items()[0].item_id.as_str(), "3");
        assert!(acc.flush().is_none());
    }

    #[test]
    fn preserves_completion_order_within_batch() {
        let mut acc = BatchAccumulator::new(3);
        acc.push(payload(9));
        acc.push(payload(4));
        let batch = acc.push(payload(7)).unwrap();

        let ids: Vec<&str> = batch.items().iter().map(|p| p.item_id.as_str()).collect();
        assert_eq!(ids, ["9", "4", "7"]);
    }

    #[test]
    fn flush_of_empty_accumulator_emits_nothing() {
        let mut acc = BatchAccumulator::new(5);
        acc.reclaim();
        assert!(acc.flush().is_none());
    }
}
