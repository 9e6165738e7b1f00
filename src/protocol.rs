use crate::base::{Error, Message, ProtocolDecoder, ProtocolEncoder, Result, Transport};
use crate::checksum::Checksum;
use byteorder::{ByteOrder, LittleEndian};
use log::error;
use log::trace;

/// First byte of every frame.
pub(crate) const M12_FRAME_HEADER: u8 = 0x7E;

/// API identifier of data frames.
pub(crate) const M12_API_ID_DATA: u8 = 0x69;

/// Header byte plus the two length bytes.
const M12_FRAME_PREFIX_SIZE: usize = 3;

/// Size of the trailing CRC32.
const M12_FRAME_CRC_SIZE: usize = 4;

/// Bytes of a frame not counted by its length field.
const M12_FRAME_OVERHEAD: usize = M12_FRAME_PREFIX_SIZE + M12_FRAME_CRC_SIZE;

/// Smallest legal value of the length field: API id, frame id and opcode.
const M12_FRAME_MIN_LENGTH: usize = 4;

/// Largest payload that still fits the 16-bit length field.
const M12_FRAME_MAX_PAYLOAD: usize = u16::MAX as usize - M12_FRAME_MIN_LENGTH;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecodeStatus {
    AwaitHeader,
    Accumulating,
    Complete { crc_passed: bool },
}

/// Assembles one response frame from the byte stream.
///
/// A decoder is single-use: once it has seen a complete frame it stays terminal
/// and a new decoder is created for the next expected frame. A header byte seen
/// inside an accepted frame is data, there is no resynchronisation.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDecoder {
    status: DecodeStatus,
    buffer: Vec<u8>,
    declared_len: Option<usize>,
}

impl FrameDecoder {
    /// Creates a new `FrameDecoder` waiting for the header byte.
    pub fn new() -> FrameDecoder {
        trace!("Creating new FrameDecoder");
        FrameDecoder {
            status: DecodeStatus::AwaitHeader,
            buffer: Vec::new(),
            declared_len: None,
        }
    }

    /// Returns `true` once a structurally complete frame has been buffered.
    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self.status, DecodeStatus::Complete { .. })
    }

    /// Returns `true` if the complete frame carried a matching CRC.
    #[inline]
    pub fn is_crc_passed(&self) -> bool {
        self.status == DecodeStatus::Complete { crc_passed: true }
    }

    /// Feeds one byte into the state machine.
    pub fn push(&mut self, byte: u8) -> Result<()> {
        match self.status {
            DecodeStatus::AwaitHeader => {
                if byte == M12_FRAME_HEADER {
                    trace!("Header found, decoder state -> Accumulating");
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.status = DecodeStatus::Accumulating;
                } else {
                    trace!("Skipping byte {:02X} while waiting for header", byte);
                }
                Ok(())
            }
            DecodeStatus::Accumulating => {
                self.buffer.push(byte);

                if self.buffer.len() == M12_FRAME_PREFIX_SIZE {
                    let declared = LittleEndian::read_u16(&self.buffer[1..3]) as usize;
                    trace!("Declared frame length: {}", declared);
                    self.declared_len = Some(declared);
                }

                if let Some(declared) = self.declared_len {
                    if self.buffer.len() == declared + M12_FRAME_OVERHEAD {
                        self.finish();
                    }
                }
                Ok(())
            }
            DecodeStatus::Complete { .. } => {
                error!("Byte {:02X} pushed into a terminal decoder", byte);
                Err(Error::ProtocolError {
                    description: "frame decoder already complete".to_owned(),
                })
            }
        }
    }

    fn finish(&mut self) {
        let crc_offset = self.buffer.len() - M12_FRAME_CRC_SIZE;
        let calculated = Checksum::of(&self.buffer[..crc_offset]);
        let received = LittleEndian::read_u32(&self.buffer[crc_offset..]);
        let crc_passed = calculated == received;
        trace!(
            "Frame complete ({} bytes), crc received {:08X} calculated {:08X}",
            self.buffer.len(),
            received,
            calculated
        );
        self.status = DecodeStatus::Complete { crc_passed };
    }

    fn crc_pair(&self) -> (u32, u32) {
        let crc_offset = self.buffer.len() - M12_FRAME_CRC_SIZE;
        (
            LittleEndian::read_u32(&self.buffer[crc_offset..]),
            Checksum::of(&self.buffer[..crc_offset]),
        )
    }

    /// Builds the `Message` of a complete frame with a matching CRC.
    pub fn message(&self) -> Result<Message> {
        match self.status {
            DecodeStatus::Complete { crc_passed: true } => {}
            DecodeStatus::Complete { crc_passed: false } => {
                let (received, calculated) = self.crc_pair();
                return Err(Error::ChecksumMismatch {
                    received,
                    calculated,
                });
            }
            _ => {
                return Err(Error::ProtocolError {
                    description: "frame is not complete".to_owned(),
                })
            }
        }

        let declared = self.declared_len.unwrap_or(0);
        if declared < M12_FRAME_MIN_LENGTH {
            error!("Declared frame length {} is below the minimum", declared);
            return Err(Error::ProtocolError {
                description: format!("declared frame length {} is too short", declared),
            });
        }

        let body = &self.buffer[M12_FRAME_PREFIX_SIZE..self.buffer.len() - M12_FRAME_CRC_SIZE];
        Ok(Message {
            api_id: body[0],
            frame_id: LittleEndian::read_u16(&body[1..3]),
            cmd: body[3],
            data: body[4..].to_vec(),
        })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolDecoder for FrameDecoder {
    /// Feeds bytes one at a time until the frame is terminal.
    ///
    /// Bytes after the end of the frame are not consumed.
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Message>)> {
        trace!(
            "decode called with {} bytes, current state: {:?}",
            buf.len(),
            self.status
        );

        for (i, byte) in buf.iter().enumerate() {
            self.push(*byte)?;

            if self.is_complete() {
                return match self.message() {
                    Ok(msg) => {
                        trace!(
                            "Decoded frame: cmd={:02X}, frame_id={}, data_len={}",
                            msg.cmd,
                            msg.frame_id,
                            msg.data.len()
                        );
                        Ok((i + 1, Some(msg)))
                    }
                    Err(e) => {
                        error!("Complete frame rejected: {}", e);
                        Err(e)
                    }
                };
            }
        }

        trace!("decode consumed {} bytes, frame incomplete", buf.len());
        Ok((buf.len(), None))
    }

}

/// Encodes command messages into M12 frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn new() -> FrameEncoder {
        FrameEncoder
    }
}

impl ProtocolEncoder for FrameEncoder {
    /// Writes `[HEADER][LEN][API][FRAME_ID][OPCODE][PAYLOAD][CRC32]` into `bytes`.
    fn encode(&mut self, msg: &Message, bytes: &mut [u8]) -> Result<usize> {
        trace!(
            "Encoding message: cmd={:02X}, frame_id={}, data_len={}",
            msg.cmd,
            msg.frame_id,
            msg.data.len()
        );
        let total_len = self.estimate_encoded_size(msg)?;

        if total_len > bytes.len() {
            error!(
                "Buffer too small: required {}, available {}",
                total_len,
                bytes.len()
            );
            return Err(Error::BufferTooSmall);
        }

        let length = M12_FRAME_MIN_LENGTH + msg.data.len();
        bytes[0] = M12_FRAME_HEADER;
        LittleEndian::write_u16(&mut bytes[1..3], length as u16);
        bytes[3] = msg.api_id;
        LittleEndian::write_u16(&mut bytes[4..6], msg.frame_id);
        bytes[6] = msg.cmd;
        bytes[7..7 + msg.data.len()].copy_from_slice(&msg.data);

        let crc_offset = total_len - M12_FRAME_CRC_SIZE;
        let mut checksum = Checksum::new();
        checksum.push_slice(&bytes[..crc_offset]);
        let crc = checksum.checksum();
        LittleEndian::write_u32(&mut bytes[crc_offset..total_len], crc);
        trace!("Calculated checksum: {:08X}, frame length {}", crc, total_len);

        Ok(total_len)
    }

    fn estimate_encoded_size(&mut self, msg: &Message) -> Result<usize> {
        if msg.data.len() > M12_FRAME_MAX_PAYLOAD {
            error!(
                "Payload too large: {} bytes (max {})",
                msg.data.len(),
                M12_FRAME_MAX_PAYLOAD
            );
            return Err(Error::OperationFail {
                description: "payload too big".to_owned(),
            });
        }
        Ok(M12_FRAME_OVERHEAD + M12_FRAME_MIN_LENGTH + msg.data.len())
    }

    fn write_to<D: Transport + ?Sized>(&mut self, msg: &Message, dest: &mut D) -> Result<usize> {
        let mut buf = vec![0; self.estimate_encoded_size(msg)?];
        let encoded_size = self.encode(msg, &mut buf)?;
        trace!("Writing {} bytes: {:02X?}", encoded_size, &buf[..encoded_size]);
        match dest.send_bytes(&buf[..encoded_size]) {
            Ok(()) => Ok(encoded_size),
            Err(err) => {
                error!("IO error while sending frame: {}", err);
                Err(err.into())
            }
        }
    }
}

/// Encodes `msg` into a freshly allocated frame.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
    let mut encoder = FrameEncoder::new();
    let mut buf = vec![0; encoder.estimate_encoded_size(msg)?];
    let len = encoder.encode(msg, &mut buf)?;
    buf.truncate(len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(bytes: &[u8]) -> FrameDecoder {
        let mut decoder = FrameDecoder::new();
        for b in bytes {
            if decoder.is_complete() {
                break;
            }
            decoder.push(*b).unwrap();
        }
        decoder
    }

    #[test]
    fn protocol_encode() {
        let msg = Message::with_data(0x06, &[0x03]).with_frame_id(0x0102);
        let frame = encode_frame(&msg).unwrap();

        assert_eq!(&frame[..8], &[0x7E, 0x05, 0x00, 0x69, 0x02, 0x01, 0x06, 0x03]);
        let crc = crc32fast::hash(&frame[..8]);
        assert_eq!(&frame[8..], &crc.to_le_bytes());
    }

    #[test]
    fn protocol_encode_without_payload() {
        let frame = encode_frame(&Message::new(0x0C)).unwrap();
        assert_eq!(frame.len(), 11);
        assert_eq!(&frame[..7], &[0x7E, 0x04, 0x00, 0x69, 0x00, 0x00, 0x0C]);
    }

    #[test]
    fn protocol_decode_round_trip() {
        let msg = Message::with_data(0x0F, &[1, 2, 3, 0x7E, 5]).with_frame_id(77);
        let frame = encode_frame(&msg).unwrap();

        let mut decoder = FrameDecoder::new();
        let (consumed, decoded) = decoder.decode(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, Some(msg));
        assert!(decoder.is_complete());
        assert!(decoder.is_crc_passed());
    }

    #[test]
    fn protocol_decode_skips_noise_and_split_input() {
        let msg = Message::with_data(0x0A, &[9, 8, 7, 6, 5, 4, 3]);
        let frame = encode_frame(&msg).unwrap();
        let mut stream = vec![0x00, 0xFF, 0x12];
        stream.extend_from_slice(&frame);
        stream.extend_from_slice(&[0xAA, 0xBB]);

        let mut decoder = FrameDecoder::new();
        let (consumed, decoded) = decoder.decode(&stream[..6]).unwrap();
        assert_eq!(consumed, 6);
        assert_eq!(decoded, None);

        let (consumed, decoded) = decoder.decode(&stream[6..]).unwrap();
        assert_eq!(consumed, frame.len() - 3);
        assert_eq!(decoded, Some(msg));
    }

    #[test]
    fn protocol_crc_single_bit_sensitivity() {
        let msg = Message::with_data(0x02, &[1, 0x10, 0, 0, 0, 50]).with_frame_id(3);
        let frame = encode_frame(&msg).unwrap();
        assert!(feed(&frame).is_crc_passed());

        // every bit between the length field and the CRC
        for byte in 3..frame.len() - 4 {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                let decoder = feed(&corrupted);
                assert!(decoder.is_complete(), "byte {} bit {}", byte, bit);
                assert!(!decoder.is_crc_passed(), "byte {} bit {}", byte, bit);
            }
        }

        // corrupted header or length never yields a valid frame
        for byte in 0..3 {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(!feed(&corrupted).is_crc_passed(), "byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn protocol_decode_reports_checksum_mismatch() {
        let mut frame = encode_frame(&Message::new(0x0C)).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        match decoder.decode(&frame) {
            Err(Error::ChecksumMismatch { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(decoder.is_complete());
        assert!(!decoder.is_crc_passed());
        assert!(decoder.push(0).is_err());
    }

    #[test]
    fn protocol_decode_rejects_short_length() {
        let mut frame = vec![0x7E, 0x02, 0x00, 0x69, 0x00];
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let mut decoder = FrameDecoder::new();
        match decoder.decode(&frame) {
            Err(Error::ProtocolError { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
