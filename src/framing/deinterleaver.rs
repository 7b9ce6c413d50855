use std::collections::VecDeque;

use tracing::{debug, warn};

use super::{is_near_sync_byte, is_sync_byte, FEC_FRAME_LEN};
use crate::{Error, Result};

/// Value of the bytes pre-filling the branch delay lines.
pub const PLACEHOLDER: u8 = 0;

/// Number of consecutive misaligned frames after which the delay lines are restarted.
pub const RESET_AFTER_MISALIGNED: u32 = 8;

/// Fixed length FIFO where every push pops the oldest byte.
#[derive(Debug, Clone)]
struct DelayLine {
    cells: Box<[u8]>,
    head: usize,
}

impl DelayLine {
    fn new(delay: usize) -> Self {
        DelayLine {
            cells: vec![PLACEHOLDER; delay].into_boxed_slice(),
            head: 0,
        }
    }

    fn push(&mut self, b: u8) -> u8 {
        if self.cells.is_empty() {
            return b;
        }
        let out = std::mem::replace(&mut self.cells[self.head], b);
        self.head = (self.head + 1) % self.cells.len();
        out
    }

    fn reset(&mut self) {
        self.cells.fill(PLACEHOLDER);
        self.head = 0;
    }
}

/// Forney convolutional deinterleaver producing [FEC_FRAME_LEN] byte frames.
///
/// Branch `b` of `I` branches delays its bytes by `M * (I - 1 - b)` branch cycles, the
/// complement of the transmit interleaver, such that every byte sees a total delay of
/// `M * I * (I - 1)` bytes.
///
/// Bytes are framed starting at the first sync byte in the deinterleaved stream. By default
/// the framing is verified: a frame is only made available once the byte following it is
/// also a sync byte. Once an alignment has been confirmed, following sync bytes may have up
/// to [SYNC_BIT_TOLERANCE](super::SYNC_BIT_TOLERANCE) bit errors. Frames failing verification
/// are dropped and the search for alignment restarts within the dropped data. If [RESET_AFTER_MISALIGNED] frames in a row fail, the
/// delay lines are restarted as well.
///
/// Input must start on branch 0, i.e., at a packet boundary, which is always the case when
/// fed with frames from the [FrameSynchronizer](super::FrameSynchronizer).
///
/// # References
/// * ETSI EN 300 421 V1.1.2, Section 4.4.3
#[derive(Debug, Clone)]
pub struct Deinterleaver {
    branches: Vec<DelayLine>,
    depth: usize,
    commutator: usize,
    resync: bool,
    // Deinterleaved bytes still to discard after a (re)start
    skip: usize,
    synced: bool,
    // Current alignment has been confirmed by an exact sync byte
    confirmed: bool,
    resync_pending: bool,
    current: Vec<u8>,
    // Complete frame waiting on the next byte to confirm alignment
    candidate: Option<Vec<u8>>,
    // Queued frames, flagged when frames were dropped immediately before them
    frames: VecDeque<(Vec<u8>, bool)>,
    // Set when a frame is dropped or the delay lines restart; consumed by the next queued frame
    gap: bool,
    misaligned: u64,
    consecutive_misaligned: u32,
}

impl Deinterleaver {
    /// DVB-S interleaving depth.
    pub const DVBS_BRANCHES: usize = 12;
    /// DVB-S branch delay unit in bytes.
    pub const DVBS_DEPTH: usize = 17;

    /// Create a deinterleaver with `branches` branches (I) and a per branch delay unit of
    /// `depth` bytes (M).
    ///
    /// # Errors
    /// [Error::Config] if either value is 0.
    pub fn new(branches: usize, depth: usize) -> Result<Self> {
        if branches == 0 || depth == 0 {
            return Err(Error::Config(format!(
                "deinterleaver branches and depth must be non-zero, got I={branches} M={depth}"
            )));
        }
        Ok(Self::with_geometry(branches, depth))
    }

    /// Deinterleaver for DVB-S, I=12, M=17.
    #[must_use]
    pub fn dvbs() -> Self {
        Self::with_geometry(Self::DVBS_BRANCHES, Self::DVBS_DEPTH)
    }

    // branches and depth must be non-zero
    fn with_geometry(branches: usize, depth: usize) -> Self {
        let lines = (0..branches)
            .map(|b| DelayLine::new(depth * (branches - 1 - b)))
            .collect();
        let mut di = Deinterleaver {
            branches: lines,
            depth,
            commutator: 0,
            resync: true,
            skip: 0,
            synced: false,
            confirmed: false,
            resync_pending: false,
            current: Vec::with_capacity(FEC_FRAME_LEN),
            candidate: None,
            frames: VecDeque::new(),
            gap: false,
            misaligned: 0,
            consecutive_misaligned: 0,
        };
        di.skip = di.delay();
        di
    }

    /// When `false`, framing starts at the very first sync byte out of the delay lines, frames
    /// are not verified, and alignment is never recovered once lost.
    ///
    /// Default is `true`.
    #[must_use]
    pub fn with_resync(mut self, enabled: bool) -> Self {
        self.resync = enabled;
        self.skip = if enabled { self.delay() } else { 0 };
        self
    }

    /// Total delay through the transmit interleaver and this deinterleaver in bytes.
    #[must_use]
    pub fn delay(&self) -> usize {
        let num = self.branches.len();
        self.depth * num * (num - 1)
    }

    /// Deinterleave a single byte, returning the byte leaving the current branch.
    ///
    /// This bypasses framing entirely.
    pub fn push(&mut self, b: u8) -> u8 {
        let out = self.branches[self.commutator].push(b);
        self.commutator = (self.commutator + 1) % self.branches.len();
        out
    }

    /// Deinterleave `data` and queue any frames completed.
    pub fn put_data(&mut self, data: &[u8]) {
        for b in data {
            if self.resync_pending && self.commutator == 0 {
                self.reset();
            }
            let out = self.push(*b);
            self.accept(out);
        }
    }

    fn accept(&mut self, b: u8) {
        if self.skip > 0 {
            self.skip -= 1;
            return;
        }
        if self.resync_pending {
            return;
        }
        if let Some(frame) = self.candidate.take() {
            let aligned = if self.confirmed {
                is_near_sync_byte(b)
            } else {
                is_sync_byte(b)
            };
            if !aligned {
                self.realign(frame, b);
                return;
            }
            self.confirmed = true;
            self.consecutive_misaligned = 0;
            self.queue(frame);
        }
        if !self.synced {
            if !is_sync_byte(b) {
                return;
            }
            debug!("deinterleaver found sync");
            self.synced = true;
        }
        self.current.push(b);
        self.complete_frame();
    }

    fn queue(&mut self, frame: Vec<u8>) {
        let gap = std::mem::take(&mut self.gap);
        self.frames.push_back((frame, gap));
    }

    fn realign(&mut self, frame: Vec<u8>, next: u8) {
        self.gap = true;
        self.confirmed = false;
        self.misaligned += 1;
        self.consecutive_misaligned += 1;
        warn!(
            misaligned = self.misaligned,
            consecutive = self.consecutive_misaligned,
            "deinterleaved frame not followed by sync"
        );
        if self.consecutive_misaligned >= RESET_AFTER_MISALIGNED {
            self.synced = false;
            self.resync_pending = true;
            return;
        }

        let mut rest = frame;
        rest.push(next);
        match rest.iter().skip(1).position(|b| is_sync_byte(*b)) {
            Some(idx) => {
                self.current = rest.split_off(idx + 1);
                self.synced = true;
                self.complete_frame();
            }
            None => self.synced = false,
        }
    }

    fn complete_frame(&mut self) {
        if self.current.len() < FEC_FRAME_LEN {
            return;
        }
        let rest = self.current.split_off(FEC_FRAME_LEN);
        let frame = std::mem::replace(&mut self.current, rest);
        if self.resync {
            self.candidate = Some(frame);
        } else {
            self.queue(frame);
        }
    }

    /// Restart the delay lines with placeholders and drop any partial frame.
    ///
    /// Frames already queued are kept. Should be called when the input becomes discontinuous,
    /// e.g., the upstream synchronizer lost lock.
    pub fn reset(&mut self) {
        debug!(delay = self.delay(), "deinterleaver reset");
        for line in &mut self.branches {
            line.reset();
        }
        self.commutator = 0;
        self.skip = if self.resync { self.delay() } else { 0 };
        self.synced = false;
        self.confirmed = false;
        self.resync_pending = false;
        self.current.clear();
        self.candidate = None;
        self.consecutive_misaligned = 0;
        self.gap = true;
    }

    pub fn num_stored_frames(&self) -> usize {
        self.frames.len()
    }

    /// Take the oldest queued frame.
    pub fn get_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front().map(|(frame, _)| frame)
    }

    /// Take the oldest queued frame along with whether the stream is discontinuous right
    /// before it, i.e., frames were dropped or the delay lines restarted since the frame
    /// queued ahead of it.
    pub fn get_frame_with_gap(&mut self) -> Option<(Vec<u8>, bool)> {
        self.frames.pop_front()
    }

    /// True once a sync byte has been found and frames are being assembled.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Total number of frames dropped for failing alignment verification.
    pub fn misaligned_frames(&self) -> u64 {
        self.misaligned
    }
}
