use super::{PACKETS_PER_GROUP, TS_PACKET_LEN};
use crate::{Error, Result};

/// Initial state of the energy dispersal LFSR, loaded at the start of every group.
pub const PRBS_SEED: u16 = 0x00a9;

/// Keystream byte at the start of a group, inverting the group's 0xb8 sync to 0x47.
pub const GROUP_SYNC_MASK: u8 = 0xff;

/// Generate the energy dispersal keystream for a group of `packets` transport packets.
///
/// The group starts with [GROUP_SYNC_MASK]. From the following byte the 15-bit LFSR
/// (`1 + x^14 + x^15`) runs continuously to the end of the group, 8 bits per byte MSB first.
/// The keystream is zero at each remaining packet sync byte, where the generator output is
/// unused.
#[must_use]
pub fn keystream(packets: usize) -> Vec<u8> {
    let len = packets * TS_PACKET_LEN;
    if len == 0 {
        return Vec::new();
    }
    let mut state = PRBS_SEED;
    let mut stream = Vec::with_capacity(len);
    stream.push(GROUP_SYNC_MASK);
    stream.extend((1..len).map(|idx| {
        let mut byte = 0u8;
        for _ in 0..8 {
            let bit = ((state >> 13) ^ (state >> 14)) & 1;
            byte = (byte << 1) | bit as u8;
            state = (state << 1) | bit;
        }
        if idx % TS_PACKET_LEN == 0 {
            0
        } else {
            byte
        }
    }));
    stream
}

/// Removes DVB energy dispersal from groups of transport packets.
///
/// The keystream is cached and only regenerated when the group length changes.
///
/// # References
/// * ETSI EN 300 421 V1.1.2, Section 4.4.1
#[derive(Debug, Clone)]
pub struct Descrambler {
    table: Vec<u8>,
}

impl Default for Descrambler {
    fn default() -> Self {
        Self::new(PACKETS_PER_GROUP)
    }
}

impl Descrambler {
    /// Create with a keystream prepared for groups of `packets` packets.
    #[must_use]
    pub fn new(packets: usize) -> Self {
        Descrambler {
            table: keystream(packets),
        }
    }

    /// The current keystream.
    #[must_use]
    pub fn keystream(&self) -> &[u8] {
        &self.table
    }

    /// XOR the keystream over `group` in place.
    ///
    /// Descrambling is its own inverse, so this also scrambles.
    ///
    /// # Errors
    /// [Error::InvalidLength] if `group` is empty or not a whole number of packets.
    pub fn descramble(&mut self, group: &mut [u8]) -> Result<()> {
        if group.is_empty() || group.len() % TS_PACKET_LEN != 0 {
            return Err(Error::InvalidLength {
                actual: group.len(),
                expected: TS_PACKET_LEN * (group.len() / TS_PACKET_LEN).max(1),
            });
        }
        if self.table.len() != group.len() {
            self.table = keystream(group.len() / TS_PACKET_LEN);
        }
        for (b, k) in group.iter_mut().zip(&self.table) {
            *b ^= k;
        }
        Ok(())
    }
}
