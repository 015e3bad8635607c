//! Bounded frame ring between a frame producer and the fulfillment worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use tracing::trace;

use crate::capture::{Frame, RawFrameSource};

/// Overwrite-oldest frame ring behind a mutex.
///
/// A producer (network feed, capture thread, synthetic generator) pushes
/// frames; every camera's fulfillment worker pops from the same ring, one
/// frame per output buffer. Several consumers and eviction from the push
/// side both need the whole ring, so it is not split into SPSC halves. The
/// lock only covers one push or pop of a frame reference.
pub struct FrameRing {
    /// Ring of frame references (the data itself is shared `Bytes`)
    ring: Mutex<HeapRb<Frame>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Snapshot of ring counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity.max(1))),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: push a frame, dropping the oldest one when full
    pub fn push(&self, frame: Frame) {
        let sequence = frame.meta.sequence;
        let evicted = self
            .ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_overwrite(frame);

        if evicted.is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(sequence, "frame ring full, dropped oldest frame");
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: pop the oldest frame
    pub fn pop(&self) -> Option<Frame> {
        let frame = self
            .ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    pub fn len(&self) -> usize {
        self.ring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            written: self.stats.frames_written.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

impl RawFrameSource for FrameRing {
    fn acquire_frame(&self) -> Option<Frame> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use bytes::Bytes;

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, 2, 2, PixelFormat::Rgb24, Bytes::from(vec![0u8; 12]))
    }

    #[test]
    fn test_shared_by_several_consumers() {
        let ring = std::sync::Arc::new(FrameRing::new(64));
        for sequence in 0..64 {
            ring.push(frame(sequence));
        }

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let ring = ring.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(frame) = ring.acquire_frame() {
                        seen.push(frame.meta.sequence);
                    }
                    seen
                })
            })
            .collect();

        let mut all: Vec<u64> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..64).collect::<Vec<_>>());
        assert_eq!(ring.stats().read, 64);
    }

    #[test]
    fn test_overwrites_oldest() {
        let ring = FrameRing::new(2);
        ring.push(frame(1));
        ring.push(frame(2));
        ring.push(frame(3));

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop().unwrap().meta.sequence, 2);
        assert_eq!(ring.acquire_frame().unwrap().meta.sequence, 3);
        assert!(ring.pop().is_none());
        assert_eq!(
            ring.stats(),
            RingStats {
                written: 3,
                read: 2,
                dropped: 1
            }
        );
    }
}
