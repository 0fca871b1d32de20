//! In-Process Links
//!
//! A [`Link`](crate::network::connection::Link) backed by shared buffers,
//! for driving a session in unit tests without sockets.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use crate::network::codec::DecodeError;
use crate::network::framing::{FrameError, FrameReader};
use crate::network::protocol::{ClientPacket, ServerPacket};

#[derive(Debug, Default)]
struct Shared {
    to_server: VecDeque<u8>,
    to_client: Vec<u8>,
    client_closed: bool,
    server_writes_fail: bool,
}

/// Server end of an in-process link.
#[derive(Debug, Clone)]
pub struct MemoryLink {
    shared: Rc<RefCell<Shared>>,
}

/// Client end of an in-process link.
#[derive(Debug)]
pub struct MemoryPeer {
    shared: Rc<RefCell<Shared>>,
    reader: FrameReader,
}

/// Create a connected link/peer pair.
pub fn memory_link() -> (MemoryLink, MemoryPeer) {
    let shared = Rc::new(RefCell::new(Shared::default()));
    (
        MemoryLink { shared: shared.clone() },
        MemoryPeer {
            shared,
            reader: FrameReader::new(),
        },
    )
}

impl Read for MemoryLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.borrow_mut();
        if shared.to_server.is_empty() {
            return if shared.client_closed {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(shared.to_server.len());
        for (slot, byte) in buf.iter_mut().zip(shared.to_server.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut shared = self.shared.borrow_mut();
        if shared.server_writes_fail {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        shared.to_client.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MemoryPeer {
    /// Send one client packet.
    pub fn send(&self, packet: &ClientPacket) -> Result<(), FrameError> {
        let frame = packet.to_frame()?;
        self.send_raw(&frame);
        Ok(())
    }

    /// Send raw bytes (may be partial or malformed frames).
    pub fn send_raw(&self, bytes: &[u8]) {
        self.shared.borrow_mut().to_server.extend(bytes.iter().copied());
    }

    /// Close the client side; the server sees end of stream.
    pub fn close(&self) {
        self.shared.borrow_mut().client_closed = true;
    }

    /// Make every later server write fail.
    pub fn break_pipe(&self) {
        self.shared.borrow_mut().server_writes_fail = true;
    }

    /// Decode every complete packet the server has written so far.
    pub fn receive(&mut self) -> Result<Vec<ServerPacket>, DecodeError> {
        let bytes = std::mem::take(&mut self.shared.borrow_mut().to_client);
        self.reader.push_bytes(&bytes);
        let mut payloads = Vec::new();
        self.reader.extract(&mut payloads);
        payloads.iter().map(|p| ServerPacket::decode(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_would_block_then_closes() {
        let (mut link, peer) = memory_link();
        let mut buf = [0u8; 8];
        assert_eq!(link.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);

        peer.send_raw(&[1, 2, 3]);
        assert_eq!(link.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);

        peer.close();
        assert_eq!(link.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_peer_decodes_server_frames() {
        let (mut link, mut peer) = memory_link();
        let frame = ServerPacket::Kick { reason: "bye".into() }.to_frame().unwrap();
        link.write_all(&frame[..3]).unwrap();
        assert!(peer.receive().unwrap().is_empty());
        link.write_all(&frame[3..]).unwrap();
        assert_eq!(peer.receive().unwrap(), vec![ServerPacket::Kick { reason: "bye".into() }]);
    }
}
