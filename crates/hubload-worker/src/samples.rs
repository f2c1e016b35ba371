//! Per-connection latency samples
//!
//! Every connection owns exactly one [`ConnectionSamples`] slot. The slot is
//! moved into that connection's receive loop while the run is live and moved
//! back into the [`SampleStore`] when the loop is joined, so recording never
//! takes a lock.

use hubload_core::Timestamp;

/// Latency samples of one connection, in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionSamples {
    index: usize,
    count: usize,
    latencies: Vec<f64>,
}

impl ConnectionSamples {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            count: 0,
            latencies: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Record an echo sent at `sent_at` that came off the wire at `received_at`
    pub fn record_at(&mut self, sent_at: Timestamp, received_at: Timestamp) {
        self.latencies.push(received_at.millis_since(&sent_at));
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn latencies(&self) -> &[f64] {
        &self.latencies
    }
}

/// Samples of all connections, indexed by connection ordinal
#[derive(Debug, Default)]
pub struct SampleStore {
    slots: Vec<Option<ConnectionSamples>>,
}

impl SampleStore {
    pub fn new(connections: usize) -> Self {
        Self {
            slots: (0..connections)
                .map(|index| Some(ConnectionSamples::new(index)))
                .collect(),
        }
    }

    /// Hand a slot to the receive loop of connection `index`
    pub fn take(&mut self, index: usize) -> Option<ConnectionSamples> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Return a slot taken with [`SampleStore::take`]
    pub fn restore(&mut self, samples: ConnectionSamples) {
        if let Some(slot) = self.slots.get_mut(samples.index()) {
            *slot = Some(samples);
        }
    }

    /// Counts and sorted latencies of every connection.
    ///
    /// A slot that never came back counts as a connection without samples.
    pub fn snapshot(&self) -> SampleSnapshot {
        let (counts, latencies): (Vec<usize>, Vec<Vec<f64>>) = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(samples) => {
                    let mut sorted = samples.latencies.clone();
                    sorted.sort_unstable_by(f64::total_cmp);
                    (samples.count, sorted)
                }
                None => (0, Vec::new()),
            })
            .unzip();

        SampleSnapshot { counts, latencies }
    }
}

/// Immutable view of a [`SampleStore`] once all receive loops are joined
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSnapshot {
    pub counts: Vec<usize>,
    /// Ascending, per connection
    pub latencies: Vec<Vec<f64>>,
}

impl SampleSnapshot {
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// All latencies merged into one ascending list
    pub fn merged(&self) -> Vec<f64> {
        let mut merged: Vec<f64> = self.latencies.iter().flatten().copied().collect();
        merged.sort_unstable_by(f64::total_cmp);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(micros: u64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn test_record_at_computes_millis() {
        let mut samples = ConnectionSamples::new(3);
        samples.record_at(ts(1_000), ts(3_500));
        samples.record_at(ts(2_000), ts(2_250));

        assert_eq!(samples.index(), 3);
        assert_eq!(samples.count(), 2);
        assert_eq!(samples.latencies(), &[2.5, 0.25]);
    }

    #[test]
    fn test_take_and_restore() {
        let mut store = SampleStore::new(2);
        let mut slot = store.take(1).unwrap();
        assert!(store.take(1).is_none(), "a slot can only be handed out once");

        slot.record_at(ts(0), ts(1_000));
        store.restore(slot);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.counts, vec![0, 1]);
        assert_eq!(snapshot.latencies[1], vec![1.0]);
    }

    #[test]
    fn test_missing_slot_counts_as_empty() {
        let mut store = SampleStore::new(3);
        let _lost = store.take(0);
        let mut slot = store.take(2).unwrap();
        slot.record_at(ts(0), ts(500));
        store.restore(slot);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.counts, vec![0, 0, 1]);
        assert_eq!(snapshot.total(), 1);
    }

    #[test]
    fn test_snapshot_sorts_and_merges() {
        let mut store = SampleStore::new(2);
        let mut a = store.take(0).unwrap();
        let mut b = store.take(1).unwrap();
        a.record_at(ts(0), ts(3_000));
        a.record_at(ts(0), ts(1_000));
        b.record_at(ts(0), ts(2_000));
        store.restore(a);
        store.restore(b);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.latencies[0], vec![1.0, 3.0]);
        assert_eq!(snapshot.merged(), vec![1.0, 2.0, 3.0]);
        assert_eq!(snapshot.total(), snapshot.merged().len());
    }
}
