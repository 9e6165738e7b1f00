use crate::protocol::M12_API_ID_DATA;

/// Represents one frame body exchanged with the M12 controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// API identifier, `M12_API_ID_DATA` for every command and response.
    pub api_id: u8,

    /// Sequence number of the frame.
    pub frame_id: u16,

    /// The command opcode.
    pub cmd: u8,

    /// Payload data associated with the message.
    pub data: Vec<u8>,
}

impl Message {
    /// Creates a new data message with an opcode and no payload.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The opcode of the message.
    pub fn new(cmd: u8) -> Message {
        Message::with_data(cmd, &[])
    }

    /// Creates a new data message with an opcode and payload data.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The opcode of the message.
    /// * `data` - A slice containing the payload data.
    #[inline]
    pub fn with_data(cmd: u8, data: &[u8]) -> Message {
        Message {
            api_id: M12_API_ID_DATA,
            frame_id: 0,
            cmd,
            data: data.to_vec(),
        }
    }

    /// Returns the message with its frame id replaced.
    #[inline]
    pub fn with_frame_id(mut self, frame_id: u16) -> Message {
        self.frame_id = frame_id;
        self
    }
}
