/// A rate 1/2 convolutional (trellis) decoder.
///
/// The decoder consumes soft symbols, 2 soft bytes per decoded bit, each byte offset by
/// [SOFT_ZERO](crate::rotation::SOFT_ZERO), and produces packed decoded bytes MSB first.
///
/// Implementations must not carry state across calls for a given code configuration; the
/// [FrameSynchronizer](super::FrameSynchronizer) hands each instance arbitrary, possibly
/// overlapping, windows of the stream. One instance is created per rotation hypothesis so
/// implementations are free to keep internal scratch memory.
pub trait ConvolutionalDecoder: Send {
    /// Decode `encoded` into `decoded`, returning the number of bit errors detected while
    /// decoding.
    ///
    /// `encoded.len()` is always `decoded.len() * 16`.
    fn decode(&mut self, encoded: &[u8], decoded: &mut [u8]) -> usize;
}

impl<D: ConvolutionalDecoder + ?Sized> ConvolutionalDecoder for Box<D> {
    fn decode(&mut self, encoded: &[u8], decoded: &mut [u8]) -> usize {
        (**self).decode(encoded, decoded)
    }
}
