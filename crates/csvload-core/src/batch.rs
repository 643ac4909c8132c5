//! Batcher: groups parsed records into sealed, fixed-capacity batches

use std::num::NonZeroUsize;

use crate::record::RawRecord;

/// Default number of records per batch
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Sealed, immutable group of records in input order.
#[derive(Debug)]
pub struct Batch {
    seq: u64,
    records: Vec<RawRecord>,
}

impl Batch {
    /// 1-based position in seal order
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Data row number of the first record
    pub fn first_row(&self) -> u64 {
        self.records.first().map_or(0, RawRecord::row)
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<RawRecord> {
        self.records
    }
}

/// Accumulates records and seals a [`Batch`] every `capacity` records.
#[derive(Debug)]
pub struct Batcher {
    capacity: NonZeroUsize,
    buf: Vec<RawRecord>,
    sealed: u64,
}

impl Batcher {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            buf: Vec::with_capacity(capacity.get()),
            sealed: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Buffer a record; returns the sealed batch once capacity is reached
    pub fn push(&mut self, record: RawRecord) -> Option<Batch> {
        self.buf.push(record);
        if self.buf.len() >= self.capacity.get() {
            Some(self.seal())
        } else {
            None
        }
    }

    /// Seal the trailing partial batch, if any
    pub fn finish(&mut self) -> Option<Batch> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }

    /// Drop buffered records without sealing; returns how many were dropped
    pub fn discard(&mut self) -> usize {
        let n = self.buf.len();
        self.buf.clear();
        n
    }

    /// Records currently buffered (not yet sealed)
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Batches sealed so far
    pub fn sealed(&self) -> u64 {
        self.sealed
    }

    fn seal(&mut self) -> Batch {
        self.sealed += 1;
        let records = std::mem::replace(&mut self.buf, Vec::with_capacity(self.capacity.get()));
        Batch {
            seq: self.sealed,
            records,
        }
    }
}

impl Default for Batcher {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_BATCH_SIZE).expect("non-zero default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_header;

    fn records(n: u64) -> impl Iterator<Item = RawRecord> {
        let header = test_header(&["v"]);
        (1..=n).map(move |i| RawRecord::new(header.clone(), vec![i.to_string()], i))
    }

    fn batch_sizes(n: u64, cap: usize) -> Vec<usize> {
        let mut b = Batcher::new(NonZeroUsize::new(cap).unwrap());
        let mut sizes: Vec<usize> = records(n).filter_map(|r| b.push(r)).map(|b| b.len()).collect();
        sizes.extend(b.finish().map(|b| b.len()));
        sizes
    }

    #[test]
    fn seals_full_then_partial() {
        assert_eq!(batch_sizes(2500, 1000), vec![1000, 1000, 500]);
    }

    #[test]
    fn exact_multiple_has_no_trailing_batch() {
        assert_eq!(batch_sizes(2000, 1000), vec![1000, 1000]);
    }

    #[test]
    fn empty_input_emits_nothing() {
        assert!(batch_sizes(0, 10).is_empty());
    }

    #[test]
    fn batch_count_is_ceiling() {
        for (n, c) in [(1u64, 1usize), (7, 3), (9, 3), (10, 3), (999, 1000), (1001, 1000)] {
            let sizes = batch_sizes(n, c);
            assert_eq!(sizes.len() as u64, n.div_ceil(c as u64), "n={n} c={c}");
            assert!(sizes[..sizes.len() - 1].iter().all(|&s| s == c));
        }
    }

    #[test]
    fn preserves_order_and_sequence() {
        let mut b = Batcher::new(NonZeroUsize::new(2).unwrap());
        let mut sealed: Vec<Batch> = records(5).filter_map(|r| b.push(r)).collect();
        sealed.extend(b.finish());

        let seqs: Vec<u64> = sealed.iter().map(Batch::seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        let rows: Vec<u64> = sealed
            .iter()
            .flat_map(|b| b.records().iter().map(RawRecord::row))
            .collect();
        assert_eq!(rows, vec![1, 2, 3, 4, 5]);
        assert_eq!(sealed[1].first_row(), 3);
    }

    #[test]
    fn discard_drops_partial() {
        let mut b = Batcher::new(NonZeroUsize::new(10).unwrap());
        for r in records(3) {
            assert!(b.push(r).is_none());
        }
        assert_eq!(b.discard(), 3);
        assert!(b.finish().is_none());
        assert_eq!(b.sealed(), 0);
    }
}
