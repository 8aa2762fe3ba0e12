//! The producer/consumer hand-off between the receiver threads and the application.
//!
//! Decoded frames are pushed by the receiver in arrival order; the consumer's `update`
//! tick releases them. With a zero buffer time every pending frame is released
//! immediately; with a positive buffer time a frame is held until it is `buffer_time`
//! seconds old, smoothing network jitter at the cost of a fixed latency. Relative order
//! is always preserved and the pending queue is bounded - on overflow the oldest frame
//! is dropped.
//!
//! All timestamps are seconds on the engine's monotonic clock, passed in explicitly so
//! the release logic stays deterministic under test.

use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::Arc;

/// Upper bound on frames held for a stalled consumer.
pub(crate) const MAX_PENDING: usize = 100;

/// The longest fixed delay a caller may configure, in seconds.
pub(crate) const MAX_BUFFER_TIME: f32 = 10.0;

#[derive(Default)]
pub(crate) struct Pipeline {
    pending: VecDeque<Arc<Frame>>,
    latest: Option<Arc<Frame>>,
    buffer_time: f32,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn buffer_time(&self) -> f32 {
        self.buffer_time
    }

    pub fn set_buffer_time(&mut self, seconds: f32) {
        self.buffer_time = seconds.clamp(0.0, MAX_BUFFER_TIME);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Enqueue a frame from the receiver thread, dropping the oldest on overflow.
    pub fn push(&mut self, frame: Arc<Frame>) {
        if self.pending.len() == MAX_PENDING {
            self.pending.pop_front();
        }
        self.pending.push_back(frame);
    }

    /// Release every pending frame older than `now - buffer_time`, making the last of
    /// them the newest published frame. Returns how many were released.
    pub fn release(&mut self, now: f64) -> usize {
        let horizon = now - self.buffer_time as f64;
        let mut released = 0;
        while let Some(front) = self.pending.front() {
            if front.timestamp >= horizon {
                break;
            }
            if let Some(frame) = self.pending.pop_front() {
                self.latest = Some(frame);
                released += 1;
            }
        }
        released
    }

    /// The newest released frame, if any.
    pub fn latest(&self) -> Option<&Arc<Frame>> {
        self.latest.as_ref()
    }

    /// Drop everything, published frame included. Used on disconnect and liveness loss.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.latest = None;
    }
}

/// One step of the exponential moving average over the packet rate, factor 0.1.
///
/// `dt` is the gap in seconds since the previous data packet.
pub(crate) fn update_data_rate(current: f32, dt: f64) -> f32 {
    if dt <= 0.0 {
        return current;
    }
    let rate = (1.0 / dt) as f32;
    current + (rate - current) * 0.1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_at(timestamp: f64, frame_number: i32) -> Arc<Frame> {
        Arc::new(Frame {
            timestamp,
            frame_number,
            ..Frame::default()
        })
    }

    #[test]
    fn zero_buffer_time_releases_immediately() {
        let mut pipeline = Pipeline::new();
        pipeline.push(frame_at(1.0, 1));
        pipeline.push(frame_at(1.01, 2));
        let released = pipeline.release(1.02);
        assert_eq!(released, 2);
        assert_eq!(pipeline.latest().map(|f| f.frame_number), Some(2));
        assert_eq!(pipeline.pending_len(), 0);
    }

    #[test]
    fn buffered_release_waits_out_the_delay() {
        let mut pipeline = Pipeline::new();
        pipeline.set_buffer_time(0.1);
        pipeline.push(frame_at(1.0, 1));
        // Too early: the frame is only 0.05s old.
        assert_eq!(pipeline.release(1.05), 0);
        assert!(pipeline.latest().is_none());
        // Old enough now.
        assert_eq!(pipeline.release(1.11), 1);
        assert_eq!(pipeline.latest().map(|f| f.frame_number), Some(1));
    }

    #[test]
    fn buffered_release_preserves_arrival_order() {
        let mut pipeline = Pipeline::new();
        pipeline.set_buffer_time(0.1);
        for i in 0..5 {
            pipeline.push(frame_at(1.0 + i as f64 * 0.01, i));
        }
        assert_eq!(pipeline.release(1.115), 2);
        assert_eq!(pipeline.latest().map(|f| f.frame_number), Some(1));
        assert_eq!(pipeline.release(1.2), 3);
        assert_eq!(pipeline.latest().map(|f| f.frame_number), Some(4));
    }

    #[test]
    fn pending_queue_is_bounded_dropping_oldest() {
        let mut pipeline = Pipeline::new();
        pipeline.set_buffer_time(MAX_BUFFER_TIME);
        for i in 0..150 {
            pipeline.push(frame_at(i as f64, i));
        }
        assert_eq!(pipeline.pending_len(), MAX_PENDING);
        // The 50 oldest were dropped; everything pending is still in order.
        pipeline.set_buffer_time(0.0);
        assert_eq!(pipeline.release(1000.0), MAX_PENDING);
        assert_eq!(pipeline.latest().map(|f| f.frame_number), Some(149));
    }

    #[test]
    fn buffer_time_is_clamped() {
        let mut pipeline = Pipeline::new();
        pipeline.set_buffer_time(-1.0);
        assert_eq!(pipeline.buffer_time(), 0.0);
        pipeline.set_buffer_time(100.0);
        assert_eq!(pipeline.buffer_time(), MAX_BUFFER_TIME);
    }

    #[test]
    fn clear_empties_the_published_snapshot() {
        let mut pipeline = Pipeline::new();
        pipeline.push(frame_at(1.0, 1));
        pipeline.release(2.0);
        assert!(pipeline.latest().is_some());
        pipeline.clear();
        assert!(pipeline.latest().is_none());
        assert_eq!(pipeline.pending_len(), 0);
    }

    #[test]
    fn data_rate_ema_converges() {
        let mut rate = 0.0;
        for _ in 0..200 {
            rate = update_data_rate(rate, 0.01);
        }
        assert!((rate - 100.0).abs() < 1.0);
        // A zero or negative gap leaves the estimate untouched.
        assert_eq!(update_data_rate(rate, 0.0), rate);
    }
}
