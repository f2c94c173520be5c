use super::mailbox::Handoff;
use super::Frame;

/// Reassembles variable-length capture reads into fixed-size frames.
pub struct FrameAccumulator<H> {
    frame_size: usize,
    frame: Vec<i16>,
    filled: usize,
    next_seq: u64,
    displaced: u64,
    out: H,
}

impl<H: Handoff<Frame>> FrameAccumulator<H> {
    pub fn new(frame_size: usize, out: H) -> Self {
        assert!(frame_size > 0, "frame size must be positive");
        Self {
            frame_size,
            frame: vec![0; frame_size],
            filled: 0,
            next_seq: 0,
            displaced: 0,
            out,
        }
    }

    /// Append the first `valid_len` samples of `block` and hand off every frame
    /// that fills up. Returns how many frames were completed.
    ///
    /// `valid_len` is clamped to the block length.
    pub fn submit(&mut self, block: &[i16], valid_len: usize) -> usize {
        let mut remaining = &block[..valid_len.min(block.len())];
        let mut completed = 0;

        while !remaining.is_empty() {
            let take = (self.frame_size - self.filled).min(remaining.len());
            self.frame[self.filled..self.filled + take].copy_from_slice(&remaining[..take]);
            self.filled += take;
            remaining = &remaining[take..];

            if self.filled == self.frame_size {
                let samples = std::mem::replace(&mut self.frame, vec![0; self.frame_size]);
                self.filled = 0;
                let frame = Frame {
                    seq: self.next_seq,
                    samples,
                };
                self.next_seq += 1;
                if self.out.accept(frame) {
                    self.displaced += 1;
                }
                completed += 1;
            }
        }

        completed
    }

    /// Samples buffered towards the next frame.
    pub fn pending(&self) -> usize {
        self.filled
    }

    pub fn frames_completed(&self) -> u64 {
        self.next_seq
    }

    /// Frames overwritten in the hand-off before anyone consumed them.
    pub fn frames_displaced(&self) -> u64 {
        self.displaced
    }
}
