//! Peer Connections
//!
//! One accepted stream, its protocol stage, receive framer and outbox.

use std::io::{self, Read, Write};

use bytes::{Buf, Bytes, BytesMut};

use crate::network::framing::{FrameReader, ReadStatus};

/// Connection identifier, unique for the server's lifetime.
pub type ConnectionId = u64;

/// Byte stream a connection talks over.
///
/// Reads and writes are expected to be non-blocking (`WouldBlock` when
/// nothing is available).
pub trait Link: Read + Write {}

impl<T: Read + Write> Link for T {}

/// Protocol stage of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Only Hello is legal.
    WaitingForHandshake,
    /// Lobby commands.
    Lobby,
    /// Game running.
    Playing,
    /// Closed; removed at the next flush.
    Closed,
}

/// Result of a flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStatus {
    /// Outbox is empty.
    Drained,
    /// Stream would block; remainder kept.
    Pending,
}

/// One peer.
pub struct Connection {
    /// Connection id.
    pub id: ConnectionId,
    /// Remote address (for logs).
    pub peer: String,
    /// Current stage.
    pub stage: Stage,
    /// Player index once handshake succeeded.
    pub identity: Option<u8>,
    link: Box<dyn Link>,
    reader: FrameReader,
    outbox: BytesMut,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("stage", &self.stage)
            .field("identity", &self.identity)
            .field("outbox", &self.outbox.len())
            .finish()
    }
}

impl Connection {
    /// Wrap a freshly accepted link.
    pub fn new(id: ConnectionId, peer: impl Into<String>, link: Box<dyn Link>) -> Self {
        Self {
            id,
            peer: peer.into(),
            stage: Stage::WaitingForHandshake,
            identity: None,
            link,
            reader: FrameReader::new(),
            outbox: BytesMut::new(),
        }
    }

    /// Whether the connection is closed.
    pub fn is_closed(&self) -> bool {
        self.stage == Stage::Closed
    }

    /// Drain the link into complete payloads.
    pub fn receive(&mut self, out: &mut Vec<Bytes>) -> io::Result<ReadStatus> {
        self.reader.receive(&mut *self.link, out)
    }

    /// Bytes waiting to be sent.
    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    /// Queue a whole frame.
    pub fn queue_frame(&mut self, frame: &[u8]) {
        self.outbox.extend_from_slice(frame);
    }

    /// Write as much of the outbox as the link accepts.
    pub fn flush(&mut self) -> io::Result<FlushStatus> {
        let mut written = 0;
        let result = loop {
            if written == self.outbox.len() {
                break Ok(FlushStatus::Drained);
            }
            match self.link.write(&self.outbox[written..]) {
                Ok(0) => break Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(FlushStatus::Pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.outbox.advance(written);
        if result.is_ok() {
            let _ = self.link.flush();
        }
        result
    }

    /// Drop anything still queued.
    pub fn discard_outbox(&mut self) -> usize {
        let dropped = self.outbox.len();
        self.outbox.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Link that accepts at most `budget` bytes per flush.
    struct Throttled {
        sent: Rc<RefCell<Vec<u8>>>,
        budget: usize,
    }

    impl Read for Throttled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.sent.borrow_mut().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_connection_waits_for_handshake() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let conn = Connection::new(1, "test", Box::new(Throttled { sent, budget: 0 }));
        assert_eq!(conn.stage, Stage::WaitingForHandshake);
        assert!(conn.identity.is_none());
    }

    #[test]
    fn test_partial_flush_keeps_remainder() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let link = Throttled { sent: sent.clone(), budget: 3 };
        let mut conn = Connection::new(1, "test", Box::new(link));
        conn.queue_frame(&[0, 3, 1, 2, 3]);

        assert_eq!(conn.flush().unwrap(), FlushStatus::Pending);
        assert_eq!(conn.outbox_len(), 2);
        assert_eq!(&*sent.borrow(), &[0, 3, 1]);
    }

    #[test]
    fn test_empty_flush_drained() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut conn = Connection::new(1, "test", Box::new(Throttled { sent, budget: 0 }));
        assert_eq!(conn.flush().unwrap(), FlushStatus::Drained);
    }
}
