#![allow(dead_code)]
//! Test transmitter producing soft symbols for a DVB-S like stream.
//!
//! The inner code is a whitened rate 1/2 repetition code rather than the real K=7
//! convolutional code. Each bit is sent on both I and Q, XORed with a position dependent
//! whitening sequence, so that decoding only succeeds at the right alignment and under the
//! right rotation hypothesis.
use std::collections::VecDeque;
use std::sync::OnceLock;

use dvbs::framing::{
    ConvolutionalDecoder, Descrambler, FEC_FRAME_LEN, FRAME_BITS, FRAME_LEN, GUARD_BITS,
    PACKETS_PER_GROUP, PARITY_LEN, TS_PACKET_LEN, TS_SYNC,
};
use dvbs::rotation::SOFT_ZERO;
use num_complex::Complex32;
use rand::Rng;
use reed_solomon::Encoder;

pub const HI: u8 = 227;
pub const LO: u8 = 27;

fn splitmix(k: u64) -> u64 {
    let mut z = k.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Whitening bits for I and Q at each bit position of a decode window.
fn whitening() -> &'static [(u8, u8)] {
    static TABLE: OnceLock<Vec<(u8, u8)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0..(FRAME_BITS + GUARD_BITS) as u64)
            .map(splitmix)
            .map(|z| ((z & 1) as u8, ((z >> 1) & 1) as u8))
            .collect()
    })
}

fn hard(soft: u8) -> u8 {
    u8::from(soft > SOFT_ZERO)
}

/// Decoder for the whitened test code. Even bits are read from I and odd bits from Q, the
/// other channel counting as a bit error when it disagrees.
#[derive(Default)]
pub struct WhitenedDecoder;

impl ConvolutionalDecoder for WhitenedDecoder {
    fn decode(&mut self, encoded: &[u8], decoded: &mut [u8]) -> usize {
        let table = whitening();
        decoded.fill(0);
        let mut errors = 0;
        for (k, sym) in encoded.chunks_exact(2).enumerate() {
            let (p, q) = table[k % table.len()];
            let i = hard(sym[0]) ^ p;
            let q = hard(sym[1]) ^ q;
            let (bit, other) = if k % 2 == 0 { (i, q) } else { (q, i) };
            if bit != other {
                errors += 1;
            }
            decoded[k / 8] |= bit << (7 - k % 8);
        }
        errors
    }
}

/// Encode `stream`, a whole number of [FRAME_LEN] frames, into soft bytes using `hi` for a 1
/// and `lo` for a 0.
pub fn encode_frames(stream: &[u8], hi: u8, lo: u8) -> Vec<u8> {
    assert_eq!(stream.len() % FRAME_LEN, 0);
    let table = whitening();
    let mut soft = Vec::with_capacity(stream.len() * 16);
    for frame in stream.chunks(FRAME_LEN) {
        for j in 0..FRAME_BITS {
            let bit = (frame[j / 8] >> (7 - j % 8)) & 1;
            let (p, q) = table[GUARD_BITS + j];
            for b in [bit ^ p, bit ^ q] {
                soft.push(if b == 1 { hi } else { lo });
            }
        }
    }
    soft
}

/// Random hard soft bytes, `hi` or `lo`, carrying no frames.
pub fn noise(len: usize, hi: u8, lo: u8) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| if rng.gen::<bool>() { hi } else { lo })
        .collect()
}

/// Soft bytes to normalized complex symbols.
pub fn to_symbols(soft: &[u8]) -> Vec<Complex32> {
    let scale = f32::from(SOFT_ZERO);
    soft.chunks_exact(2)
        .map(|s| {
            Complex32::new(
                (f32::from(s[0]) - scale) / scale,
                (f32::from(s[1]) - scale) / scale,
            )
        })
        .collect()
}

/// Random transport packets for `groups` dispersal groups.
pub fn transport_packets(groups: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut packets = vec![0u8; groups * PACKETS_PER_GROUP * TS_PACKET_LEN];
    rng.fill(&mut packets[..]);
    for pkt in packets.chunks_mut(TS_PACKET_LEN) {
        pkt[0] = TS_SYNC;
    }
    packets
}

/// Energy dispersal, one group at a time. The first sync of each group becomes 0xb8.
pub fn scramble(packets: &[u8]) -> Vec<u8> {
    let mut ds = Descrambler::default();
    let mut zult = packets.to_vec();
    for group in zult.chunks_mut(PACKETS_PER_GROUP * TS_PACKET_LEN) {
        ds.descramble(group).unwrap();
    }
    zult
}

pub fn rs_encode(packets: &[u8]) -> Vec<u8> {
    let enc = Encoder::new(PARITY_LEN);
    packets
        .chunks(TS_PACKET_LEN)
        .flat_map(|pkt| enc.encode(pkt).to_vec())
        .collect()
}

/// Forney interleaver with I=12 and M=17, branch b delays by M * b.
pub struct Interleaver {
    lines: Vec<VecDeque<u8>>,
    commutator: usize,
}

impl Default for Interleaver {
    fn default() -> Self {
        Interleaver {
            lines: (0..12).map(|b| VecDeque::from(vec![0u8; 17 * b])).collect(),
            commutator: 0,
        }
    }
}

impl Interleaver {
    pub fn interleave(&mut self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .map(|b| {
                let line = &mut self.lines[self.commutator];
                line.push_back(*b);
                let out = line.pop_front().unwrap();
                self.commutator = (self.commutator + 1) % self.lines.len();
                out
            })
            .collect()
    }
}

/// Transmit `packets` up to, but not including, the inner code.
///
/// `corrupt` is called with each RS codeword index and codeword so tests can inject errors.
pub fn transmit<F>(packets: &[u8], mut corrupt: F) -> Vec<u8>
where
    F: FnMut(usize, &mut [u8]),
{
    let mut codewords = rs_encode(&scramble(packets));
    for (idx, cw) in codewords.chunks_mut(FEC_FRAME_LEN).enumerate() {
        corrupt(idx, cw);
    }
    Interleaver::default().interleave(&codewords)
}
