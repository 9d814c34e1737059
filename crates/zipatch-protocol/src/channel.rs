//! Message channels
//!
//! A [`MessageChannel`] moves whole frames, in order, reliably; what a frame
//! travels over is up to the implementation. [`StreamChannel`] adds u32
//! length framing over any byte stream; [`memory_pair`] is an in-process
//! duplex for tests and same-process sessions.

use std::io::{Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::trace;

use crate::message::RepairMessage;
use crate::{Error, Result};

/// Largest accepted frame. Index files dominate frame sizes and compress
/// well below this.
pub const MAX_FRAME_SIZE: u32 = 1 << 26;

/// Ordered, reliable exchange of framed byte vectors.
pub trait MessageChannel {
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Block until the next frame arrives.
    fn recv(&mut self) -> Result<Vec<u8>>;

    fn send_message(&mut self, message: &RepairMessage) -> Result<()> {
        trace!(message = message.name(), "send");
        self.send(&message.encode())
    }

    fn recv_message(&mut self) -> Result<RepairMessage> {
        let frame = self.recv()?;
        let message = RepairMessage::decode(&frame)?;
        trace!(message = message.name(), "recv");
        Ok(message)
    }
}

/// Length-framed channel over one bidirectional byte stream.
pub struct StreamChannel<S> {
    stream: S,
}

impl<S: Read + Write> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> MessageChannel for StreamChannel<S> {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() as u64 > u64::from(MAX_FRAME_SIZE) {
            return Err(Error::FrameTooLarge(frame.len() as u64));
        }
        self.stream.write_u32::<BigEndian>(frame.len() as u32)?;
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let len = match self.stream.read_u32::<BigEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::ChannelClosed);
            }
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge(u64::from(len)));
        }
        let mut frame = vec![0u8; len as usize];
        self.stream.read_exact(&mut frame)?;
        Ok(frame)
    }
}

/// One end of an in-process duplex channel.
pub struct MemoryChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Build both ends of an in-process duplex channel.
pub fn memory_pair() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    (
        MemoryChannel { tx: a_tx, rx: a_rx },
        MemoryChannel { tx: b_tx, rx: b_rx },
    )
}

impl MessageChannel for MemoryChannel {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| Error::ChannelClosed)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        self.rx.recv().map_err(|_| Error::ChannelClosed)
    }
}
