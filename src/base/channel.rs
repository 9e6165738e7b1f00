use crate::base::cancel::CancellationToken;
use crate::base::error::{Error, Result};
use crate::base::message::Message;
use crate::base::traits::{ProtocolDecoder, ProtocolEncoder, Transport};
use crate::protocol::{FrameDecoder, FrameEncoder};
use log::{error, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_CHANNEL_READ_CHUNK_SIZE: usize = 256;

/// Channel encodes messages into frames, and sends and receives them via a transport
///
/// Every send discards whatever the transport still buffers in both directions,
/// and every read assembles exactly one frame with a fresh `FrameDecoder`.
///
/// # Examples
/// ```ignore
/// let mut channel = Channel::new(serial_port);
///
/// let resp = channel.invoke(&Message::new(12), Duration::from_secs(5), None).unwrap();
/// ```
#[derive(Debug)]
pub struct Channel<T: ?Sized> {
    encoder: FrameEncoder,
    next_frame_id: u16,
    stream: Box<T>,
}

impl<T: ?Sized> Channel<T>
where
    T: Transport,
{
    /// Create a new `Channel` to read and write messages
    pub fn new(stream: Box<T>) -> Channel<T> {
        trace!("Creating new Channel");
        Channel {
            encoder: FrameEncoder::new(),
            next_frame_id: 0,
            stream,
        }
    }

    /// Read one frame until timeout or cancellation
    ///
    /// Bytes are pulled from the transport only when it reports them available.
    /// A frame with a failing CRC ends the read with `Error::ChecksumMismatch`.
    ///
    /// # Example
    /// ```ignore
    /// let msg = channel.read_until(Duration::from_secs(1), None)?;
    /// ```
    pub fn read_until(
        &mut self,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        trace!("Channel read_until called with timeout {:?}", timeout);
        let start = Instant::now();
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; DEFAULT_CHANNEL_READ_CHUNK_SIZE];

        loop {
            let elapsed = start.elapsed();
            if elapsed > timeout {
                warn!("Timeout reached after {:?} waiting for a frame", elapsed);
                return Err(Error::OperationTimeout);
            }

            if cancel.map_or(false, |c| c.is_cancelled()) {
                warn!("Read cancelled after {:?}", elapsed);
                return Err(Error::OperationCancelled);
            }

            let available = match self.stream.available() {
                Ok(n) => n,
                Err(e) => {
                    error!("IO error polling stream: {}", e);
                    return Err(e.into());
                }
            };

            if available == 0 {
                thread::yield_now();
                continue;
            }

            let to_read = available.min(buf.len());
            let read = match self.stream.receive(&mut buf[..to_read]) {
                Ok(n) => n,
                Err(e) => {
                    error!("IO error reading from stream: {}", e);
                    return Err(e.into());
                }
            };
            trace!("Read {} bytes from stream: {:02X?}", read, &buf[..read]);

            let (consumed, msg) = decoder.decode(&buf[..read])?;
            if let Some(msg) = msg {
                if consumed < read {
                    trace!("Ignoring {} bytes after the frame", read - consumed);
                }
                trace!(
                    "Decoded message: cmd={:02X}, frame_id={}, data_len={}",
                    msg.cmd,
                    msg.frame_id,
                    msg.data.len()
                );
                return Ok(msg);
            }
        }
    }

    /// Write message to channel
    ///
    /// Stale bytes in both directions are discarded first and the message gets
    /// the next frame id.
    ///
    /// # Example
    /// ```ignore
    /// channel.write(&Message::new(6)).unwrap();
    /// ```
    pub fn write(&mut self, msg: &Message) -> Result<usize> {
        trace!(
            "Channel write called: cmd={:02X}, data_len={}",
            msg.cmd,
            msg.data.len()
        );
        self.stream.discard_input()?;
        self.stream.discard_output()?;

        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);
        let msg = msg.clone().with_frame_id(frame_id);

        let written = self.encoder.write_to(&msg, &mut *self.stream)?;
        trace!("Wrote frame {} ({} bytes)", frame_id, written);
        Ok(written)
    }

    /// Send a request to channel and wait for response
    ///
    /// # Example
    /// ```ignore
    /// let resp = channel.invoke(&Message::new(12), Duration::from_secs(1), None);
    /// ```
    pub fn invoke(
        &mut self,
        request: &Message,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        trace!(
            "Channel invoke called: cmd={:02X}, data_len={}, timeout={:?}",
            request.cmd,
            request.data.len(),
            timeout
        );
        if let Err(e) = self.write(request) {
            error!("Invoke: failed to write request: {:?}", e);
            return Err(e);
        }
        let result = self.read_until(timeout, cancel);
        match &result {
            Ok(resp) => trace!(
                "Invoke: received response: cmd={:02X}, data_len={}",
                resp.cmd,
                resp.data.len()
            ),
            Err(e) => error!("Invoke: error waiting for response: {:?}", e),
        }
        result
    }
}
