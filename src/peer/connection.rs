use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use mio::net::TcpStream;
use tracing::trace;

use super::bitfield::Bitfield;
use super::error::PeerError;
use super::framing::{FrameKind, FrameReader};
use super::message::{Handshake, Message};
use super::piece::PieceAssembler;
use super::request_queue::{BlockValidation, RequestQueue};
use crate::constants::{ALLOWED_BLOCK_FAILURES, KEEPALIVE_TIMEOUT};

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Incoming {
    Handshake(Handshake),
    Message(Message),
}

/// One peer slot: a nonblocking socket plus everything the wire protocol
/// tracks per peer.
///
/// The connection owns its socket exclusively; slots move, they are never
/// copied. All I/O is nonblocking: reads and writes run until the kernel
/// reports WouldBlock and the readiness loop resumes them later.
pub struct PeerConnection {
    addr: SocketAddr,
    stream: TcpStream,
    reader: FrameReader,
    send_queue: VecDeque<Bytes>,
    send_offset: usize,
    last_sent: Instant,

    /// What the peer claims to have. Empty until its Bitfield arrives.
    pub peer_bitfield: Bitfield,
    /// We are choking the peer. Stays true: this client never serves.
    pub am_choking: bool,
    /// The peer is choking us. Requests only flow while this is false.
    pub peer_choking: bool,
    /// The peer wants our data. Recorded, never acted on.
    pub peer_interested: bool,
    am_interested: bool,

    requests: RequestQueue,
    assembler: PieceAssembler,
    failures: usize,
}

impl PeerConnection {
    /// Starts a nonblocking dial and queues the opening messages.
    ///
    /// The handshake and our bitfield go out as soon as the socket becomes
    /// writable; the caller registers the socket with its readiness loop.
    pub fn dial(
        addr: SocketAddr,
        handshake: &Handshake,
        our_bitfield: &Bitfield,
    ) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        let mut conn = Self {
            addr,
            stream,
            reader: FrameReader::new(),
            send_queue: VecDeque::new(),
            send_offset: 0,
            last_sent: Instant::now(),
            peer_bitfield: Bitfield::new(our_bitfield.len()),
            am_choking: true,
            peer_choking: true,
            peer_interested: false,
            am_interested: false,
            requests: RequestQueue::new(),
            assembler: PieceAssembler::new(),
            failures: 0,
        };
        conn.push_raw(handshake.encode());
        conn.enqueue(Message::Bitfield(our_bitfield.to_bytes()));
        Ok(conn)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The socket, for readiness registration.
    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    /// Reads until one complete frame is assembled or the socket would
    /// block.
    ///
    /// `Ok(None)` means no full frame yet; call again on the next readable
    /// event. A clean close from the peer is an error here: this client
    /// only closes connections it has already decided to tear down.
    pub fn try_recv(&mut self) -> Result<Option<Incoming>, PeerError> {
        loop {
            let spare = self.reader.spare();
            match self.stream.read(spare) {
                Ok(0) => return Err(PeerError::ConnectionClosed),
                Ok(n) => {
                    if let Some(kind) = self.reader.advance(n)? {
                        let frame = self.reader.frame();
                        let incoming = match kind {
                            FrameKind::Handshake => Incoming::Handshake(Handshake::decode(frame)?),
                            FrameKind::Message => Incoming::Message(Message::decode(frame)?),
                        };
                        return Ok(Some(incoming));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PeerError::Io(e)),
            }
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Writes queued messages until the queue drains or the socket would
    /// block. Partial writes keep their offset for the next writable event.
    pub fn try_flush(&mut self) -> Result<(), PeerError> {
        while let Some(head) = self.send_queue.front() {
            match self.stream.write(&head[self.send_offset..]) {
                Ok(n) => {
                    self.send_offset += n;
                    self.last_sent = Instant::now();
                    if self.send_offset == head.len() {
                        self.send_queue.pop_front();
                        self.send_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PeerError::Io(e)),
            }
        }
        Ok(())
    }

    /// Whether the readiness loop should watch for writability.
    pub fn wants_write(&self) -> bool {
        !self.send_queue.is_empty()
    }

    pub fn enqueue(&mut self, message: Message) {
        trace!(peer = %self.addr, msg = message.name(), "queueing message");
        self.push_raw(message.encode());
    }

    fn push_raw(&mut self, bytes: Bytes) {
        self.send_queue.push_back(bytes);
    }

    /// Queues Interested unless already sent.
    pub fn send_interested(&mut self) {
        if !self.am_interested {
            self.enqueue(Message::Interested);
            self.am_interested = true;
        }
    }

    /// Queues NotInterested unless already sent.
    pub fn send_notinterested(&mut self) {
        if self.am_interested {
            self.enqueue(Message::NotInterested);
            self.am_interested = false;
        }
    }

    /// Queues Choke unless the peer is already choked.
    pub fn send_choke(&mut self) {
        if !self.am_choking {
            self.enqueue(Message::Choke);
            self.am_choking = true;
        }
    }

    /// Queues Unchoke unless the peer is already unchoked.
    pub fn send_unchoke(&mut self) {
        if self.am_choking {
            self.enqueue(Message::Unchoke);
            self.am_choking = false;
        }
    }

    pub fn am_interested(&self) -> bool {
        self.am_interested
    }

    /// Queues a KeepAlive when nothing has been sent for
    /// [`KEEPALIVE_TIMEOUT`]. Called once per loop iteration.
    pub fn tick_keepalive(&mut self, now: Instant) {
        if now.duration_since(self.last_sent) >= KEEPALIVE_TIMEOUT {
            self.enqueue(Message::KeepAlive);
            self.last_sent = now;
        }
    }

    // ------------------------------------------------------------------
    // Request window
    // ------------------------------------------------------------------

    /// Appends block requests covering piece `index` of `size` bytes.
    pub fn assign_piece(&mut self, index: usize, size: usize) {
        self.requests.add_piece(index, size);
    }

    /// Queues Request messages up to the in-flight window. Returns `true`
    /// when the queue has no unsent requests left, signalling the caller
    /// to assign another piece.
    pub fn pump_requests(&mut self) -> bool {
        let (messages, exhausted) = self.requests.fill();
        for message in messages {
            self.enqueue(message);
        }
        exhausted
    }

    /// Validates a received block and, if valid, appends it to the piece
    /// under assembly.
    ///
    /// Invalid blocks count toward a consecutive-failure budget; crossing
    /// it is peer-fatal.
    pub fn accept_block(
        &mut self,
        index: u32,
        begin: u32,
        block: Bytes,
    ) -> Result<BlockValidation, PeerError> {
        let verdict = self
            .requests
            .validate_block(index, begin, block.len() as u32);
        match verdict {
            BlockValidation::Invalid => {
                self.failures += 1;
                if self.failures >= ALLOWED_BLOCK_FAILURES {
                    return Err(PeerError::TooManyBadBlocks);
                }
            }
            BlockValidation::Accepted | BlockValidation::PieceComplete => {
                self.failures = 0;
                self.assembler.push_block(index, block);
            }
        }
        Ok(verdict)
    }

    /// Moves the assembled piece out of the slot.
    pub fn take_piece(&mut self) -> PieceAssembler {
        self.assembler.take()
    }

    /// Pieces still held by the request queue; returned to the strategy on
    /// teardown or choke.
    pub fn assigned_pieces(&self) -> std::collections::BTreeSet<usize> {
        self.requests.assigned_pieces()
    }

    /// Clears the request window and any half-assembled piece.
    pub fn reset_requests(&mut self) {
        self.requests.reset();
        self.assembler.clear();
    }

    pub fn is_downloading(&self) -> bool {
        !self.requests.is_empty()
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("addr", &self.addr)
            .field("peer_choking", &self.peer_choking)
            .field("am_interested", &self.am_interested)
            .field("downloading", &self.is_downloading())
            .finish()
    }
}
