use reed_solomon::Decoder;
use tracing::trace;

use super::{FEC_FRAME_LEN, TS_PACKET_LEN};
use crate::{Error, Result};

/// Number of RS check bytes in a DVB FEC frame.
pub const PARITY_LEN: usize = FEC_FRAME_LEN - TS_PACKET_LEN;

/// Disposition of a codeword after error correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Integrity {
    /// Codeword did not require correction.
    Ok,
    /// Codeword was corrected, with the number of symbols corrected.
    Corrected(usize),
    /// Codeword had more errors than can be corrected. Data is as received.
    Uncorrectable,
}

impl Integrity {
    /// True unless the codeword was uncorrectable.
    #[must_use]
    pub fn ok(&self) -> bool {
        !matches!(self, Integrity::Uncorrectable)
    }

    /// Number of symbols corrected.
    #[must_use]
    pub fn corrected(&self) -> usize {
        match self {
            Integrity::Corrected(num) => *num,
            _ => 0,
        }
    }
}

/// Reed-Solomon outer code decoding an FEC frame into a transport packet.
pub trait ReedSolomon: Send + Sync {
    /// Correct `codeword`, returning its disposition and the payload with parity removed.
    ///
    /// The payload is returned even when uncorrectable, as received.
    ///
    /// # Errors
    /// If `codeword` is not a length this implementation can correct.
    fn correct(&self, codeword: &[u8]) -> Result<(Integrity, Vec<u8>)>;
}

/// DVB RS(204,188, t=8), shortened from RS(255,239).
///
/// # References
/// * ETSI EN 300 421 V1.1.2, Section 4.4.2
#[derive(Clone, Debug, Default)]
pub struct DvbReedSolomon;

impl ReedSolomon for DvbReedSolomon {
    fn correct(&self, codeword: &[u8]) -> Result<(Integrity, Vec<u8>)> {
        if codeword.len() != FEC_FRAME_LEN {
            return Err(Error::InvalidLength {
                actual: codeword.len(),
                expected: FEC_FRAME_LEN,
            });
        }

        match Decoder::new(PARITY_LEN).correct_err_count(codeword, None) {
            Ok((buf, 0)) => Ok((Integrity::Ok, buf.data().to_vec())),
            Ok((buf, num)) => Ok((Integrity::Corrected(num), buf.data().to_vec())),
            Err(err) => {
                trace!("uncorrectable codeword: {err:?}");
                Ok((Integrity::Uncorrectable, codeword[..TS_PACKET_LEN].to_vec()))
            }
        }
    }
}
