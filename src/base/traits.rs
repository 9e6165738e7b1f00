use crate::base::error::Result;
use crate::base::message::Message;
use serialport::{ClearBuffer, SerialPort};
use std::io;

/// Defines the behavior for decoding byte streams into `Message` objects.
pub trait ProtocolDecoder {
    /// Attempts to decode a `Message` from the provided buffer.
    ///
    /// Returns a `Result` containing a tuple:
    /// * The number of bytes consumed from the buffer.
    /// * An `Option<Message>` which is `Some` if a complete message was decoded, or `None` otherwise.
    ///
    /// # Arguments
    ///
    /// * `buf` - The byte slice containing the data to decode.
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Message>)>;
}

/// Defines the behavior for encoding `Message` objects into byte streams.
pub trait ProtocolEncoder {
    /// Encodes a `Message` into the provided byte buffer.
    ///
    /// Returns the number of bytes written to the buffer upon successful encoding.
    ///
    /// # Arguments
    ///
    /// * `msg` - The `Message` to encode.
    /// * `bytes` - The mutable byte slice to write the encoded message into.
    fn encode(&mut self, msg: &Message, bytes: &mut [u8]) -> Result<usize>;

    /// Estimates the maximum size in bytes required to encode the given `Message`.
    /// The actual encoded size must be less than or equal to this estimate.
    ///
    /// # Arguments
    ///
    /// * `msg` - The `Message` for which to estimate the encoded size.
    fn estimate_encoded_size(&mut self, msg: &Message) -> Result<usize>;

    /// Encodes a `Message` and writes it directly to a `Transport` (e.g., a serial port).
    ///
    /// Returns the number of bytes successfully written to the destination.
    ///
    /// # Arguments
    ///
    /// * `msg` - The `Message` to encode and write.
    /// * `dest` - The `Transport` to write the encoded bytes to.
    fn write_to<D: Transport + ?Sized>(&mut self, msg: &Message, dest: &mut D) -> Result<usize>;
}

/// A half-duplex byte link to the controller.
///
/// The serial port is configured 8N1 by whoever opens it; this trait only moves bytes.
pub trait Transport {
    /// Writes all of `bytes` to the link.
    fn send_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Number of received bytes that can be read without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Reads up to `buf.len()` already received bytes.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drops every received byte not read yet.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Drops every byte queued for transmission.
    fn discard_output(&mut self) -> io::Result<()>;
}

impl Transport for dyn SerialPort {
    fn send_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, bytes)?;
        io::Write::flush(self)
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(self.clear(ClearBuffer::Input)?)
    }

    fn discard_output(&mut self) -> io::Result<()> {
        Ok(self.clear(ClearBuffer::Output)?)
    }
}
