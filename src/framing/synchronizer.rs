use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace_span, warn};

use super::{ConvolutionalDecoder, FEC_FRAME_LEN, PACKETS_PER_GROUP, TS_SYNC, TS_SYNC_INVERTED};
use crate::rotation::{Rotation, NUM_ROTATIONS, SOFT_ZERO};
use crate::{Error, Result};

/// Number of decoded bits from the end of one frame kept at the start of the next. Gives the
/// trellis decoder some history before the first bit of a frame.
pub const GUARD_BITS: usize = 32;
const GUARD_BYTES: usize = GUARD_BITS / 8;
const GUARD_SOFT_LEN: usize = GUARD_BITS * 2;

/// Decoded length of a synchronized frame, i.e., a full group of FEC frames.
pub const FRAME_LEN: usize = FEC_FRAME_LEN * PACKETS_PER_GROUP;
/// Decoded bits per synchronized frame.
pub const FRAME_BITS: usize = FRAME_LEN * 8;
/// Length of the soft symbol window decoded each cycle (2 soft bytes per decoded bit).
pub const SOFT_BUFFER_LEN: usize = (FRAME_BITS + GUARD_BITS) * 2;
/// Length of the decoded output of each cycle, guard bytes included.
pub const DECODED_LEN: usize = (FRAME_BITS + GUARD_BITS) / 8;

/// Frame offsets checked by the sync test along with the expected sync byte.
pub const SYNC_MARKERS: [(usize, u8); 5] = [
    (0, TS_SYNC_INVERTED),
    (FEC_FRAME_LEN, TS_SYNC),
    (FEC_FRAME_LEN * 2, TS_SYNC),
    (FEC_FRAME_LEN * 3, TS_SYNC),
    (FEC_FRAME_LEN * 4, TS_SYNC),
];
/// Sync is present when the total sync bit errors is less than this.
pub const SYNC_BIT_ERROR_LIMIT: u32 = 5;

/// Total number of bits differing from the expected sync bytes at [SYNC_MARKERS], or `None`
/// if `frame` is too short to contain them all.
#[must_use]
pub fn sync_bit_errors(frame: &[u8]) -> Option<u32> {
    let (last, _) = SYNC_MARKERS[SYNC_MARKERS.len() - 1];
    if frame.len() <= last {
        return None;
    }
    Some(
        SYNC_MARKERS
            .iter()
            .map(|(offset, expected)| (frame[*offset] ^ expected).count_ones())
            .sum(),
    )
}

/// Hamming-tolerant sync test.
#[must_use]
pub fn has_sync(frame: &[u8]) -> bool {
    sync_bit_errors(frame).is_some_and(|errs| errs < SYNC_BIT_ERROR_LIMIT)
}

/// Index of the first frame passing [has_sync].
pub fn find_sync<'a, I>(frames: I) -> Option<usize>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    frames.into_iter().position(has_sync)
}

/// Snapshot of the synchronizer lock state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
    /// Active hypothesis, `Some` only when locked.
    pub hypothesis: Option<Rotation>,
    pub frame_ready: bool,
    /// Raw decoder bit errors of the last decode for each hypothesis.
    pub bit_errors: [usize; NUM_ROTATIONS],
}

/// Decoding state for a single rotation hypothesis. Exclusively owned by one worker during a
/// decode cycle.
struct Hypothesis<D> {
    rotation: Rotation,
    decoder: D,
    scratch: Vec<u8>,
    decoded: Vec<u8>,
    bit_errors: usize,
}

impl<D: ConvolutionalDecoder> Hypothesis<D> {
    fn new(rotation: Rotation, decoder: D) -> Self {
        Hypothesis {
            rotation,
            decoder,
            scratch: vec![0u8; SOFT_BUFFER_LEN],
            decoded: vec![0u8; DECODED_LEN],
            bit_errors: 0,
        }
    }

    fn decode(&mut self, soft: &[u8]) {
        self.scratch.copy_from_slice(soft);
        self.rotation.apply(&mut self.scratch);
        self.bit_errors = self.decoder.decode(&self.scratch, &mut self.decoded);
    }

    fn frame(&self) -> &[u8] {
        &self.decoded[GUARD_BYTES..]
    }
}

struct State<D> {
    // Soft symbol window; always SOFT_BUFFER_LEN long
    buffer: Vec<u8>,
    // Number of valid bytes in buffer
    pos: usize,
    // Soft bytes waiting to enter buffer
    pending: VecDeque<u8>,
    hypotheses: Vec<Hypothesis<D>>,
    locked: Option<Rotation>,
    frame_ready: bool,
    acquisitions: u64,
    losses: u64,
}

impl<D: ConvolutionalDecoder> State<D> {
    fn fill(&mut self) {
        let num = self.pending.len().min(self.buffer.len() - self.pos);
        if num == 0 {
            return;
        }
        let dst = &mut self.buffer[self.pos..self.pos + num];
        for (d, s) in dst.iter_mut().zip(self.pending.drain(..num)) {
            *d = s;
        }
        self.pos += num;
    }

    fn shift(&mut self, num: usize) {
        if num == 0 {
            return;
        }
        if self.pos > num {
            self.buffer.copy_within(num.., 0);
            self.pos -= num;
        } else {
            self.pos = GUARD_SOFT_LEN;
            self.buffer[..GUARD_SOFT_LEN].fill(SOFT_ZERO);
        }
        self.fill();
    }

    // Keep the tail of the current window as the guard region of the next
    fn carry_guard(&mut self) {
        let len = self.buffer.len();
        self.buffer.copy_within(len - GUARD_SOFT_LEN.., 0);
        self.pos = GUARD_SOFT_LEN;
    }

    fn decode_all(&mut self, pool: Option<&rayon::ThreadPool>) {
        let buffer = &self.buffer;
        let hypotheses = &mut self.hypotheses;
        // par_iter_mut does not return until every hypothesis is decoded
        match pool {
            Some(pool) => {
                pool.install(|| hypotheses.par_iter_mut().for_each(|h| h.decode(buffer)));
            }
            None => hypotheses.par_iter_mut().for_each(|h| h.decode(buffer)),
        }
    }

    fn update_out(&mut self, pool: Option<&rayon::ThreadPool>) -> bool {
        self.fill();
        if self.pos != self.buffer.len() {
            return false;
        }

        let span = trace_span!("decode_cycle", locked = ?self.locked);
        let _guard = span.enter();

        if let Some(rotation) = self.locked {
            let hypothesis = &mut self.hypotheses[rotation.index()];
            hypothesis.decode(&self.buffer);
            if !has_sync(hypothesis.frame()) {
                warn!(
                    hypothesis = %rotation,
                    bit_errors = hypothesis.bit_errors,
                    "lost lock"
                );
                self.locked = None;
                self.losses += 1;
            }
        }

        if self.locked.is_none() {
            self.decode_all(pool);
        }

        true
    }

    fn select(&self) -> Option<Rotation> {
        match self.locked {
            Some(rotation) => {
                has_sync(self.hypotheses[rotation.index()].frame()).then_some(rotation)
            }
            None => find_sync(self.hypotheses.iter().map(Hypothesis::frame))
                .map(|idx| self.hypotheses[idx].rotation),
        }
    }
}

/// Locates DVB-S frames in a soft symbol stream.
///
/// Soft symbols are accumulated in a sliding window of [SOFT_BUFFER_LEN] bytes. When unlocked
/// the window is decoded under all 8 [Rotation] hypotheses in parallel and checked for the
/// sync bytes of a full group of packets. If none of the hypotheses show sync the window is
/// slid by a single soft byte and the search repeats. Once locked only the active hypothesis
/// is decoded until the sync test fails.
///
/// All methods take `&self`; state is kept behind a single mutex such that soft bits may be
/// provided from a different thread than the one searching for sync.
pub struct FrameSynchronizer<D> {
    state: Mutex<State<D>>,
    pool: Option<rayon::ThreadPool>,
}

impl<D: ConvolutionalDecoder> FrameSynchronizer<D> {
    /// Create a new synchronizer.
    ///
    /// `factory` is called once per rotation hypothesis to create its decoder. Hypotheses are
    /// decoded on the global rayon pool, see [Self::with_num_threads].
    pub fn new<F>(mut factory: F) -> Self
    where
        F: FnMut() -> D,
    {
        let mut buffer = vec![0u8; SOFT_BUFFER_LEN];
        buffer[..GUARD_SOFT_LEN].fill(SOFT_ZERO);
        let hypotheses = Rotation::ALL
            .iter()
            .map(|rotation| Hypothesis::new(*rotation, factory()))
            .collect();
        FrameSynchronizer {
            state: Mutex::new(State {
                buffer,
                pos: GUARD_SOFT_LEN,
                pending: VecDeque::new(),
                hypotheses,
                locked: None,
                frame_ready: false,
                acquisitions: 0,
                losses: 0,
            }),
            pool: None,
        }
    }

    /// Decode hypotheses using a dedicated pool of `num` threads. If `num` is 0 rayon chooses
    /// the number of threads.
    ///
    /// # Errors
    /// [Error::Config] if the thread pool cannot be created.
    pub fn with_num_threads(mut self, num: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("synchronizer::hypothesis{i}"))
            .num_threads(num)
            .build()
            .map_err(|err| Error::Config(format!("hypothesis thread pool: {err}")))?;
        self.pool = Some(pool);
        Ok(self)
    }

    fn state(&self) -> MutexGuard<'_, State<D>> {
        // State is plain data, so it remains usable even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue soft bits for decoding. Never drops data.
    pub fn put_soft_bits(&self, bits: &[u8]) {
        let mut state = self.state();
        state.pending.extend(bits);
        state.fill();
    }

    /// Number of soft bytes queued but not yet in the decode window.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Run a single decode cycle if the window is full.
    ///
    /// Returns `false` if more soft bits are needed before a cycle can run.
    pub fn update_out(&self) -> bool {
        self.state().update_out(self.pool.as_ref())
    }

    /// Search for sync, sliding the window one soft byte at a time, until sync is found or
    /// the queued soft bits run out.
    ///
    /// When sync is found the synchronizer is locked to the returned hypothesis and a frame is
    /// available from [Self::locked_frame].
    pub fn try_find_sync(&self) -> Option<Rotation> {
        let mut shifted = 0usize;
        loop {
            let mut state = self.state();
            if !state.update_out(self.pool.as_ref()) {
                if shifted > 0 {
                    debug!(shifted, "out of soft bits while searching for sync");
                }
                return None;
            }
            if let Some(rotation) = state.select() {
                if state.locked.is_none() {
                    info!(hypothesis = %rotation, shifted, "got lock");
                    state.acquisitions += 1;
                }
                state.locked = Some(rotation);
                state.frame_ready = true;
                state.carry_guard();
                return Some(rotation);
            }
            state.shift(1);
            shifted += 1;
        }
    }

    /// Take the current frame, [FRAME_LEN] bytes with guard bytes removed.
    ///
    /// Returns `None` if not locked or the frame was already taken.
    pub fn locked_frame(&self) -> Option<Vec<u8>> {
        let mut state = self.state();
        match state.locked {
            Some(rotation) if state.frame_ready => {
                state.frame_ready = false;
                Some(state.hypotheses[rotation.index()].frame().to_vec())
            }
            _ => None,
        }
    }

    /// Bit errors reported by the decoder for the active hypothesis, less the guard bits, or
    /// `None` if not locked.
    ///
    /// This is a raw count for the last frame, not a rate.
    pub fn ber(&self) -> Option<usize> {
        let state = self.state();
        state.locked.map(|rotation| {
            state.hypotheses[rotation.index()]
                .bit_errors
                .saturating_sub(GUARD_BITS)
        })
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked.is_some()
    }

    pub fn is_frame_ready(&self) -> bool {
        self.state().frame_ready
    }

    /// Number of times lock has been acquired from the unlocked state.
    pub fn lock_acquisitions(&self) -> u64 {
        self.state().acquisitions
    }

    /// Number of times lock has been lost.
    pub fn lock_losses(&self) -> u64 {
        self.state().losses
    }

    pub fn lock_state(&self) -> LockState {
        let state = self.state();
        let mut bit_errors = [0usize; NUM_ROTATIONS];
        for (dst, h) in bit_errors.iter_mut().zip(&state.hypotheses) {
            *dst = h.bit_errors;
        }
        LockState {
            locked: state.locked.is_some(),
            hypothesis: state.locked,
            frame_ready: state.frame_ready,
            bit_errors,
        }
    }
}
