//! Soft symbols to transport packets.
//!
//! [Pipeline] wires the [framing](crate::framing) stages together and delivers descrambled
//! groups of transport packets to a [TransportSink]. [decode_symbols] runs a pipeline in the
//! background and provides the groups as an iterator.
mod sink;

pub use sink::*;

use num_complex::Complex32;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::framing::{
    ConvolutionalDecoder, Deinterleaver, Descrambler, DvbReedSolomon, FrameSynchronizer,
    matches_sync, Integrity, ReedSolomon, PACKETS_PER_GROUP, TS_PACKET_LEN, TS_SYNC_INVERTED,
};
use crate::rotation::SOFT_ZERO;
use crate::{Error, Result};

/// Convert a normalized soft value in `[-1.0, 1.0]` to an offset soft byte, saturating values
/// outside the range.
#[must_use]
pub fn soft_byte(v: f32) -> u8 {
    let scale = f32::from(SOFT_ZERO);
    (v * scale + scale).clamp(0.0, 255.0) as u8
}

/// [Pipeline] configuration.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, Serialize, Deserialize)]
pub struct PipelineOpts {
    /// Number of packets per energy dispersal group.
    #[builder(default = PACKETS_PER_GROUP)]
    pub group_size: usize,
    /// Number of deinterleaver branches (I).
    #[builder(default = Deinterleaver::DVBS_BRANCHES)]
    pub interleave_branches: usize,
    /// Deinterleaver branch delay unit in bytes (M).
    #[builder(default = Deinterleaver::DVBS_DEPTH)]
    pub interleave_depth: usize,
    /// Verify and recover deinterleaver alignment. See [Deinterleaver::with_resync].
    #[builder(default = true)]
    pub resync: bool,
    /// Remove energy dispersal. When disabled groups are not aligned to the inverted sync byte
    /// and are delivered as corrected.
    #[builder(default = true)]
    pub descramble: bool,
    /// Size of the thread pools used for hypothesis decoding and Reed-Solomon. By default the
    /// value will be chosen automatically.
    #[builder(default)]
    pub num_threads: usize,
    /// Allowable number of groups waiting on the consumer of [decode_symbols].
    #[builder(default = 64)]
    pub buffer_size: usize,
}

impl Default for PipelineOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Running totals for a [Pipeline].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Synchronized frames passed to the deinterleaver.
    pub frames: u64,
    /// Transport packets delivered.
    pub packets: u64,
    /// Packet groups delivered.
    pub groups: u64,
    /// Symbols corrected by Reed-Solomon.
    pub corrected_symbols: u64,
    /// Codewords Reed-Solomon could not correct; their packets are delivered as received.
    pub uncorrectable_codewords: u64,
    /// Codewords dropped while aligning to the start of a dispersal group, including partial
    /// groups discarded when the codeword sequence is broken.
    pub dropped_codewords: u64,
    pub lock_acquisitions: u64,
    pub lock_losses: u64,
    /// Deinterleaved frames that failed alignment verification.
    pub misaligned_frames: u64,
}

/// Frame synchronization, deinterleaving, error correction and descrambling of a single
/// soft symbol stream.
///
/// Input is accepted in arbitrary sized chunks; output is produced in whole groups of
/// [PipelineOpts::group_size] packets as soon as enough input is available.
pub struct Pipeline<D, S> {
    opts: PipelineOpts,
    sync: FrameSynchronizer<D>,
    deinterleaver: Deinterleaver,
    descrambler: Descrambler,
    rs: Box<dyn ReedSolomon>,
    pool: rayon::ThreadPool,
    sink: S,
    soft: Vec<u8>,
    codewords: Vec<Vec<u8>>,
    losses_seen: u64,
    stats: PipelineStats,
}

impl<D: ConvolutionalDecoder, S: TransportSink> Pipeline<D, S> {
    /// Create a pipeline delivering to `sink`.
    ///
    /// `factory` creates a decoder for each rotation hypothesis, see [FrameSynchronizer::new].
    ///
    /// # Errors
    /// [Error::Config] if `opts` is invalid or thread pools cannot be created.
    pub fn new<F>(opts: PipelineOpts, factory: F, sink: S) -> Result<Self>
    where
        F: FnMut() -> D,
    {
        if opts.group_size == 0 {
            return Err(Error::Config("group size must be non-zero".into()));
        }
        let deinterleaver = Deinterleaver::new(opts.interleave_branches, opts.interleave_depth)?
            .with_resync(opts.resync);
        let sync = FrameSynchronizer::new(factory).with_num_threads(opts.num_threads)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("pipeline::reed_solomon{i}"))
            .num_threads(opts.num_threads)
            .build()
            .map_err(|err| Error::Config(format!("reed-solomon thread pool: {err}")))?;

        Ok(Pipeline {
            descrambler: Descrambler::new(opts.group_size),
            codewords: Vec::with_capacity(opts.group_size),
            opts,
            sync,
            deinterleaver,
            rs: Box::new(DvbReedSolomon),
            pool,
            sink,
            soft: Vec::new(),
            losses_seen: 0,
            stats: PipelineStats::default(),
        })
    }

    /// Use `rs` rather than [DvbReedSolomon].
    #[must_use]
    pub fn with_reed_solomon(mut self, rs: Box<dyn ReedSolomon>) -> Self {
        self.rs = rs;
        self
    }

    /// Process complex soft symbols, I and Q normalized to `[-1.0, 1.0]`.
    ///
    /// # Errors
    /// If the Reed-Solomon implementation fails or the sink does not accept packets.
    pub fn put_symbols(&mut self, symbols: &[Complex32]) -> Result<()> {
        let mut soft = std::mem::take(&mut self.soft);
        soft.clear();
        soft.extend(
            symbols
                .iter()
                .flat_map(|s| [soft_byte(s.re), soft_byte(s.im)]),
        );
        let zult = self.put_soft_bits(&soft);
        self.soft = soft;
        zult
    }

    /// Process soft bytes, 2 per symbol, already offset by [SOFT_ZERO].
    ///
    /// # Errors
    /// If the Reed-Solomon implementation fails or the sink does not accept packets.
    pub fn put_soft_bits(&mut self, bits: &[u8]) -> Result<()> {
        self.sync.put_soft_bits(bits);
        let zult = self.drain_sync();
        self.stats.lock_acquisitions = self.sync.lock_acquisitions();
        self.stats.lock_losses = self.sync.lock_losses();
        self.stats.misaligned_frames = self.deinterleaver.misaligned_frames();
        zult
    }

    fn drain_sync(&mut self) -> Result<()> {
        while self.sync.try_find_sync().is_some() {
            let Some(frame) = self.sync.locked_frame() else {
                continue;
            };
            let losses = self.sync.lock_losses();
            if losses != self.losses_seen {
                // the stream slid while re-acquiring; deinterleaver history no longer applies
                self.losses_seen = losses;
                self.discard_partial_group("lock lost");
                self.deinterleaver.reset();
            }
            self.stats.frames += 1;
            self.deinterleaver.put_data(&frame);
            self.drain_deinterleaver()?;
        }
        Ok(())
    }

    fn drain_deinterleaver(&mut self) -> Result<()> {
        while let Some((codeword, gap)) = self.deinterleaver.get_frame_with_gap() {
            if gap {
                self.discard_partial_group("deinterleaver dropped frames");
            }
            if self.opts.descramble {
                let group_start = codeword
                    .first()
                    .is_some_and(|b| matches_sync(*b, TS_SYNC_INVERTED));
                if group_start {
                    self.discard_partial_group("group started early");
                } else if self.codewords.is_empty() {
                    self.stats.dropped_codewords += 1;
                    debug!("dropping codeword before start of group");
                    continue;
                }
            }
            self.codewords.push(codeword);
            if self.codewords.len() == self.opts.group_size {
                self.deliver_group()?;
            }
        }
        Ok(())
    }

    // Partial groups cannot be descrambled once the codeword sequence breaks
    fn discard_partial_group(&mut self, reason: &str) {
        if self.codewords.is_empty() {
            return;
        }
        self.stats.dropped_codewords += self.codewords.len() as u64;
        warn!(codewords = self.codewords.len(), "discarding partial group: {reason}");
        self.codewords.clear();
    }

    fn deliver_group(&mut self) -> Result<()> {
        let codewords = std::mem::take(&mut self.codewords);
        let rs = &self.rs;
        let results: Vec<Result<(Integrity, Vec<u8>)>> = self
            .pool
            .install(|| codewords.par_iter().map(|cw| rs.correct(cw)).collect());

        let mut group = Vec::with_capacity(self.opts.group_size * TS_PACKET_LEN);
        for zult in results {
            let (integrity, payload) = zult?;
            if payload.len() != TS_PACKET_LEN {
                return Err(Error::IntegrityAlgorithm(format!(
                    "expected {TS_PACKET_LEN} byte payload, got {}",
                    payload.len()
                )));
            }
            match integrity {
                Integrity::Corrected(num) => self.stats.corrected_symbols += num as u64,
                Integrity::Uncorrectable => {
                    self.stats.uncorrectable_codewords += 1;
                    warn!("uncorrectable codeword");
                }
                Integrity::Ok => {}
            }
            group.extend_from_slice(&payload);
        }
        self.codewords = codewords;
        self.codewords.clear();

        if self.opts.descramble {
            self.descrambler.descramble(&mut group)?;
        }
        self.sink.put_packets(&group)?;

        self.stats.groups += 1;
        self.stats.packets += self.opts.group_size as u64;
        debug!(
            groups = self.stats.groups,
            corrected = self.stats.corrected_symbols,
            "delivered group"
        );
        Ok(())
    }

    /// Snapshot of the running totals.
    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    pub fn opts(&self) -> &PipelineOpts {
        &self.opts
    }

    pub fn synchronizer(&self) -> &FrameSynchronizer<D> {
        &self.sync
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the pipeline returning the sink. Partial groups are discarded.
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Decode chunks of soft symbols in the background, returning an iterator of descrambled
/// packet groups.
///
/// The pipeline runs on a dedicated thread. At most [PipelineOpts::buffer_size] groups are
/// buffered, after which decoding waits on the consumer. Decoding stops when `chunks` is
/// exhausted or the returned iterator is dropped.
///
/// # Errors
/// If the pipeline cannot be created or the thread fails to start.
pub fn decode_symbols<I, F, D>(
    chunks: I,
    opts: PipelineOpts,
    factory: F,
) -> Result<impl Iterator<Item = Vec<u8>>>
where
    I: IntoIterator<Item = Vec<Complex32>> + Send + 'static,
    F: FnMut() -> D,
    D: ConvolutionalDecoder + 'static,
{
    let (tx, rx) = crossbeam::channel::bounded(opts.buffer_size);
    let mut pipeline = Pipeline::new(opts, factory, tx)?;

    std::thread::Builder::new()
        .name("pipeline::decode".into())
        .spawn(move || {
            for chunk in chunks {
                match pipeline.put_symbols(&chunk) {
                    Ok(()) => {}
                    Err(Error::SinkClosed) => {
                        debug!("consumer went away");
                        break;
                    }
                    Err(err) => {
                        warn!("decoding failed: {err}");
                        break;
                    }
                }
            }
            debug!(stats = ?pipeline.stats(), "pipeline::decode thread exit");
        })?;

    Ok(rx.into_iter())
}
