use crate::protocol::ProtocolRevision;
use std::time::{Duration, Instant};

/// Quiet time after which a partial frame is considered noise.
pub const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(100);

/// Reassembles fixed length frames from arbitrarily split serial reads.
///
/// The BCC protocol has no delimiter or checksum, so frame boundaries come from the
/// byte count alone. A partial frame left over after the line went quiet for longer
/// than the idle gap is noise. Transports feed timestamped reads through
/// [`FrameAccumulator::push_at`] and call [`FrameAccumulator::expire`] while the line
/// is silent; [`FrameAccumulator::push`] ignores timing, for offline captures.
#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    buffer: Vec<u8>,
    frame_len: usize,
    idle_gap: Duration,
    last_rx: Option<Instant>,
}

impl FrameAccumulator {
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "frame length must be positive");
        Self {
            buffer: Vec::with_capacity(frame_len),
            frame_len,
            idle_gap: DEFAULT_IDLE_GAP,
            last_rx: None,
        }
    }

    pub fn for_revision(revision: ProtocolRevision) -> Self {
        Self::new(revision.frame_len())
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn idle_gap(&self) -> Duration {
        self.idle_gap
    }

    pub fn set_idle_gap(&mut self, idle_gap: Duration) {
        log::trace!("set idle gap to {idle_gap:?}");
        self.idle_gap = idle_gap;
    }

    /// Appends `data` and returns every frame completed by it, oldest first.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let n_frames = self.buffer.len() / self.frame_len;
        let mut frames = Vec::with_capacity(n_frames);
        for _ in 0..n_frames {
            frames.push(self.buffer.drain(..self.frame_len).collect());
        }
        if !frames.is_empty() {
            log::trace!(
                "Assembled {} frame(s), {} byte(s) pending",
                frames.len(),
                self.buffer.len()
            );
        }
        frames
    }

    /// Like [`Self::push`] for data received at `now`. A partial frame older than the
    /// idle gap is dropped before `data` is appended.
    pub fn push_at(&mut self, data: &[u8], now: Instant) -> Vec<Vec<u8>> {
        self.expire(now);
        self.last_rx = Some(now);
        self.push(data)
    }

    /// Drops the partial frame if nothing arrived for longer than the idle gap before `now`.
    /// Returns the number of discarded bytes.
    pub fn expire(&mut self, now: Instant) -> usize {
        match self.last_rx {
            Some(last_rx) if now.saturating_duration_since(last_rx) > self.idle_gap => {
                self.discard_partial()
            }
            _ => 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drops an incomplete frame. Returns the number of discarded bytes.
    pub fn discard_partial(&mut self) -> usize {
        let discarded = self.buffer.len();
        if discarded > 0 {
            log::warn!(
                "Dropping incomplete frame - required={} received={}",
                self.frame_len,
                discarded
            );
            self.buffer.clear();
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_split_across_reads() {
        let mut framer = FrameAccumulator::for_revision(ProtocolRevision::Basic);
        let frame: Vec<u8> = (0..64).collect();
        assert!(framer.push(&frame[..10]).is_empty());
        assert!(framer.push(&frame[10..63]).is_empty());
        assert_eq!(framer.pending(), 63);
        let frames = framer.push(&frame[63..]);
        assert_eq!(frames, vec![frame]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn several_frames_in_one_read() {
        let mut framer = FrameAccumulator::new(8);
        let data: Vec<u8> = (0..20).collect();
        let frames = framer.push(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], (0..8).collect::<Vec<u8>>());
        assert_eq!(frames[1], (8..16).collect::<Vec<u8>>());
        assert_eq!(framer.pending(), 4);
    }

    #[test]
    fn discard_partial_resynchronises() {
        let mut framer = FrameAccumulator::new(8);
        framer.push(&[0xAA; 5]);
        assert_eq!(framer.discard_partial(), 5);
        assert_eq!(framer.discard_partial(), 0);
        let frames = framer.push(&[1; 8]);
        assert_eq!(frames, vec![vec![1; 8]]);
    }

    #[test]
    fn stale_partial_expires_after_idle_gap() {
        let start = Instant::now();
        let mut framer = FrameAccumulator::new(8);
        framer.set_idle_gap(Duration::from_millis(100));
        assert!(framer.push_at(&[0xAA; 5], start).is_empty());

        assert_eq!(framer.expire(start + Duration::from_millis(100)), 0);
        assert_eq!(framer.pending(), 5);
        assert_eq!(framer.expire(start + Duration::from_millis(101)), 5);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn late_data_starts_a_new_frame() {
        let start = Instant::now();
        let mut framer = FrameAccumulator::new(8);
        framer.push_at(&[0xAA; 5], start);
        // Line was quiet too long: the noise is dropped, not prefixed to the frame
        let frames = framer.push_at(&[1; 8], start + Duration::from_millis(250));
        assert_eq!(frames, vec![vec![1; 8]]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn reads_within_gap_keep_accumulating() {
        let start = Instant::now();
        let mut framer = FrameAccumulator::new(8);
        framer.push_at(&[1; 3], start);
        framer.push_at(&[1; 3], start + Duration::from_millis(90));
        let frames = framer.push_at(&[1; 2], start + Duration::from_millis(180));
        assert_eq!(frames, vec![vec![1; 8]]);
        assert_eq!(framer.expire(start + Duration::from_secs(10)), 0);
    }
}
