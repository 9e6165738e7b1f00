//! In-memory controller emulator for session tests.

use crate::base::{Message, ProtocolDecoder, Transport};
use crate::cmds::Command;
use crate::protocol::{encode_frame, FrameDecoder};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

/// What the emulator answers to one request.
pub enum Reply {
    /// A valid frame with the request's opcode and this payload.
    Payload(Vec<u8>),
    /// A frame with this payload and a broken CRC.
    Corrupt(Vec<u8>),
    /// Nothing, the request has no response.
    Silent,
}

type Responder = Box<dyn FnMut(&Command) -> Reply + Send>;

/// Decodes every frame the host sends, records the command and queues the reply.
pub struct MockDevice {
    responder: Responder,
    requests: Arc<Mutex<Vec<Command>>>,
    outbox: VecDeque<u8>,
}

impl MockDevice {
    pub fn new<F>(responder: F) -> (Box<MockDevice>, Arc<Mutex<Vec<Command>>>)
    where
        F: FnMut(&Command) -> Reply + Send + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let device = MockDevice {
            responder: Box::new(responder),
            requests: requests.clone(),
            outbox: VecDeque::new(),
        };
        (Box::new(device), requests)
    }

    fn reply(&mut self, request: &Message, data: Vec<u8>, corrupt: bool) {
        let response = Message::with_data(request.cmd, &data).with_frame_id(request.frame_id);
        let mut frame = encode_frame(&response).unwrap();
        if corrupt {
            let last = frame.len() - 1;
            frame[last] ^= 0x5A;
        }
        self.outbox.extend(frame);
    }
}

impl Transport for MockDevice {
    fn send_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut decoder = FrameDecoder::new();
        let (_, msg) = decoder.decode(bytes).unwrap();
        let request = msg.expect("host sent an incomplete frame");
        let cmd = Command::from_message(&request).unwrap();
        self.requests.lock().unwrap().push(cmd.clone());

        match (self.responder)(&cmd) {
            Reply::Payload(data) => self.reply(&request, data, false),
            Reply::Corrupt(data) => self.reply(&request, data, true),
            Reply::Silent => {}
        }
        Ok(())
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(self.outbox.len())
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.outbox.len());
        for (dst, src) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.outbox.clear();
        Ok(())
    }

    fn discard_output(&mut self) -> io::Result<()> {
        Ok(())
    }
}
