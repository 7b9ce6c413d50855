use std::io::Write;

use crossbeam::channel::Sender;

use crate::{Error, Result};

/// Downstream consumer of descrambled transport packets.
pub trait TransportSink {
    /// Receive one group of transport packets, `188 * group_size` bytes.
    ///
    /// # Errors
    /// If the consumer can no longer accept packets.
    fn put_packets(&mut self, group: &[u8]) -> Result<()>;
}

impl TransportSink for Vec<u8> {
    fn put_packets(&mut self, group: &[u8]) -> Result<()> {
        self.extend_from_slice(group);
        Ok(())
    }
}

impl TransportSink for Sender<Vec<u8>> {
    fn put_packets(&mut self, group: &[u8]) -> Result<()> {
        self.send(group.to_vec()).map_err(|_| Error::SinkClosed)
    }
}

impl<S: TransportSink + ?Sized> TransportSink for &mut S {
    fn put_packets(&mut self, group: &[u8]) -> Result<()> {
        (**self).put_packets(group)
    }
}

/// Writes transport packets to any [Write], e.g., a `.ts` file.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }

    /// Flush and return the underlying writer.
    ///
    /// # Errors
    /// [Error::Io] if flushing fails.
    pub fn into_inner(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> TransportSink for WriterSink<W> {
    fn put_packets(&mut self, group: &[u8]) -> Result<()> {
        self.writer.write_all(group)?;
        Ok(())
    }
}
