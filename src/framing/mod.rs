//! DVB-S Frame Decoding.
//!
//! The stages, in the order they are applied to a received stream:
//!
//! 1. [FrameSynchronizer] aligns the soft symbol stream and resolves the constellation
//!    ambiguity using an external [ConvolutionalDecoder].
//! 2. [Deinterleaver] reverses the Forney convolutional interleaver producing RS codewords.
//! 3. [ReedSolomon] corrects each codeword into a transport packet.
//! 4. [Descrambler] removes the energy dispersal from each group of packets.
//!
//! # References
//! * ETSI EN 300 421 V1.1.2, Section 4
mod decoder;
mod deinterleaver;
mod descrambler;
mod reed_solomon;
mod synchronizer;

pub use decoder::*;
pub use deinterleaver::*;
pub use descrambler::*;
pub use reed_solomon::*;
pub use synchronizer::*;

/// MPEG transport stream sync byte.
pub const TS_SYNC: u8 = 0x47;
/// Bit-inverted sync byte marking the first packet of a scrambling group.
pub const TS_SYNC_INVERTED: u8 = 0xb8;
/// MPEG transport stream packet length.
pub const TS_PACKET_LEN: usize = 188;
/// Length of an RS(204,188) protected packet, i.e., the FEC frame.
pub const FEC_FRAME_LEN: usize = 204;
/// Number of packets in an energy dispersal group.
pub const PACKETS_PER_GROUP: usize = 8;

/// Bit errors tolerated in a sync byte found where one is expected.
pub const SYNC_BIT_TOLERANCE: u32 = 2;

/// Returns true if `b` is a sync byte, inverted or not.
#[must_use]
pub fn is_sync_byte(b: u8) -> bool {
    b == TS_SYNC || b == TS_SYNC_INVERTED
}

/// Returns true if `b` differs from `sync` by at most [SYNC_BIT_TOLERANCE] bits.
#[must_use]
pub fn matches_sync(b: u8, sync: u8) -> bool {
    (b ^ sync).count_ones() <= SYNC_BIT_TOLERANCE
}

/// Returns true if `b` is within [SYNC_BIT_TOLERANCE] bits of either sync byte.
///
/// The sync bytes are complements, so at most one of them can match.
#[must_use]
pub fn is_near_sync_byte(b: u8) -> bool {
    matches_sync(b, TS_SYNC) || matches_sync(b, TS_SYNC_INVERTED)
}
