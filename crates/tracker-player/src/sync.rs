//! Sample-position keyed history of decoder state.
//!
//! The pull loop records one [`SyncState`] per chunk, stamped with the number
//! of frames handed to the output so far. The UI asks for the entry covering
//! the frame the device is playing right now, which trails the render
//! position by whatever is still buffered.

use std::collections::VecDeque;

use crate::output::StreamFormat;

/// Entries kept behind the last match when compacting.
pub const RETAINED_HISTORY: usize = 5;
/// Compaction starts once the last match sits deeper than this.
pub const COMPACT_AFTER: usize = 10;

/// Decoder position captured just before a chunk was rendered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncState {
    /// Frames written before this chunk.
    pub sample_count: u64,
    pub row: usize,
    pub pattern: usize,
    pub channel_volumes: Vec<f32>,
}

/// Time-ordered [`SyncState`] log.
///
/// ## Invariants
/// - `sample_count` never decreases from front to back.
/// - Compaction never drops the last matched entry or anything after it.
#[derive(Debug, Default)]
pub struct SyncQueue {
    states: VecDeque<SyncState>,
    last_match: Option<usize>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, state: SyncState) {
        debug_assert!(
            self.states
                .back()
                .is_none_or(|last| last.sample_count <= state.sample_count),
            "sync states must be recorded in order"
        );
        self.states.push_back(state);
    }

    /// Latest state with `sample_count <= current_sample`, or the earliest
    /// state if every entry is newer. An empty queue yields the zero state.
    pub fn query(&mut self, current_sample: i64) -> SyncState {
        let current = current_sample.max(0) as u64;
        if self.states.is_empty() {
            return SyncState::default();
        }
        let idx = self
            .states
            .partition_point(|s| s.sample_count <= current)
            .saturating_sub(1);
        self.last_match = Some(idx);
        self.states[idx].clone()
    }

    /// Drop history older than [`RETAINED_HISTORY`] entries before the last
    /// match. Returns how many entries were removed.
    pub fn compact(&mut self) -> usize {
        let Some(idx) = self.last_match else {
            return 0;
        };
        if idx <= COMPACT_AFTER {
            return 0;
        }
        let dropped = idx - RETAINED_HISTORY;
        self.states.drain(..dropped);
        self.last_match = Some(RETAINED_HISTORY);
        dropped
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.last_match = None;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn oldest(&self) -> Option<&SyncState> {
        self.states.front()
    }
}

/// Frames written versus frames still waiting in the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackClock {
    pub samples_written: u64,
    pub unplayed_bytes: usize,
}

impl PlaybackClock {
    /// Frame the listener hears now, floored at zero.
    pub fn audible_sample(&self, format: StreamFormat) -> u64 {
        let unplayed = (self.unplayed_bytes / format.bytes_per_frame().max(1)) as u64;
        self.samples_written.saturating_sub(unplayed)
    }
}

/// Sync queue plus the frame counter it is keyed on, guarded together.
#[derive(Debug, Default)]
pub struct SyncClock {
    queue: SyncQueue,
    samples_written: u64,
}

impl SyncClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Log the state about to be rendered at the current frame count.
    pub fn record(&mut self, row: usize, pattern: usize, channel_volumes: Vec<f32>) {
        self.queue.record(SyncState {
            sample_count: self.samples_written,
            row,
            pattern,
            channel_volumes,
        });
    }

    pub fn advance(&mut self, frames: usize) {
        self.samples_written += frames as u64;
    }

    /// Start a fresh baseline at `samples_written` with no history.
    pub fn rebaseline(&mut self, samples_written: u64) {
        self.queue.clear();
        self.samples_written = samples_written;
    }

    /// State audible given `unplayed_bytes` still queued in the output, or
    /// `None` before anything has been recorded.
    pub fn lookup(&mut self, unplayed_bytes: usize, format: StreamFormat) -> Option<SyncState> {
        if self.queue.is_empty() {
            return None;
        }
        let clock = PlaybackClock {
            samples_written: self.samples_written,
            unplayed_bytes,
        };
        let audible = clock.audible_sample(format);
        let state = self.queue.query(audible as i64);
        self.queue.compact();
        Some(state)
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(sample_count: u64, row: usize) -> SyncState {
        SyncState {
            sample_count,
            row,
            pattern: 0,
            channel_volumes: vec![row as f32 / 100.0],
        }
    }

    fn filled(counts: &[u64]) -> SyncQueue {
        let mut q = SyncQueue::new();
        for (row, &count) in counts.iter().enumerate() {
            q.record(state(count, row));
        }
        q
    }

    #[test]
    fn empty_queue_yields_zero_state() {
        let mut q = SyncQueue::new();
        assert_eq!(q.query(1000), SyncState::default());
        assert_eq!(q.compact(), 0);
    }

    #[test]
    fn query_picks_latest_not_newer() {
        let mut q = filled(&[0, 1024, 2048, 3072]);
        assert_eq!(q.query(0).row, 0);
        assert_eq!(q.query(1023).row, 0);
        assert_eq!(q.query(1024).row, 1);
        assert_eq!(q.query(2500).row, 2);
        assert_eq!(q.query(1_000_000).row, 3);
    }

    #[test]
    fn query_before_first_entry_returns_earliest() {
        let mut q = filled(&[4096, 5120]);
        assert_eq!(q.query(100).sample_count, 4096);
        assert_eq!(q.query(-50).sample_count, 4096);
    }

    #[test]
    fn equal_sample_counts_resolve_to_the_last() {
        let mut q = filled(&[0, 1024, 1024, 2048]);
        assert_eq!(q.query(1500).row, 2);
    }

    #[test]
    fn compaction_waits_for_threshold() {
        let counts: Vec<u64> = (0..20).map(|i| i * 100).collect();
        let mut q = filled(&counts);
        q.query(1000);
        assert_eq!(q.compact(), 0);
        assert_eq!(q.len(), 20);
    }

    #[test]
    fn compaction_keeps_match_and_trailing_history() {
        let counts: Vec<u64> = (0..40).map(|i| i * 100).collect();
        let mut q = filled(&counts);
        let matched = q.query(2550);
        assert_eq!(matched.row, 25);

        let dropped = q.compact();
        assert_eq!(dropped, 25 - RETAINED_HISTORY);
        assert_eq!(q.oldest().map(|s| s.row), Some(25 - RETAINED_HISTORY));
        assert_eq!(q.query(2550), matched);
        for x in [2550, 2600, 3000, 3900, 10_000] {
            assert_eq!(q.query(x).row, (x as usize / 100).min(39));
        }
    }

    #[test]
    fn repeated_compaction_is_stable() {
        let counts: Vec<u64> = (0..40).map(|i| i * 100).collect();
        let mut q = filled(&counts);
        q.query(3000);
        q.compact();
        let len = q.len();
        q.query(3000);
        assert_eq!(q.compact(), 0);
        assert_eq!(q.len(), len);
    }

    #[test]
    fn playback_clock_subtracts_unplayed_frames() {
        let fmt = StreamFormat::stereo_i16(44_100);
        let clock = PlaybackClock {
            samples_written: 10_000,
            unplayed_bytes: 4 * 2_500,
        };
        assert_eq!(clock.audible_sample(fmt), 7_500);

        let early = PlaybackClock {
            samples_written: 100,
            unplayed_bytes: 4 * 1_000,
        };
        assert_eq!(early.audible_sample(fmt), 0);
    }

    #[test]
    fn sync_clock_records_at_current_count() {
        let fmt = StreamFormat::stereo_i16(44_100);
        let mut clock = SyncClock::new();
        assert!(clock.lookup(0, fmt).is_none());

        clock.record(0, 0, vec![0.1]);
        clock.advance(1024);
        clock.record(1, 0, vec![0.2]);
        clock.advance(1024);

        assert_eq!(clock.samples_written(), 2048);
        let heard = clock.lookup(1024 * 4, fmt).unwrap();
        assert_eq!(heard.row, 1);
        assert_eq!(heard.sample_count, 1024);
        let lagging = clock.lookup(1500 * 4, fmt).unwrap();
        assert_eq!(lagging.row, 0);
    }

    #[test]
    fn rebaseline_clears_history() {
        let mut clock = SyncClock::new();
        clock.record(3, 1, Vec::new());
        clock.advance(512);
        clock.rebaseline(88_200);
        assert_eq!(clock.samples_written(), 88_200);
        assert!(clock.queue().is_empty());
        clock.record(4, 1, Vec::new());
        assert_eq!(clock.queue().oldest().map(|s| s.sample_count), Some(88_200));
    }
}
