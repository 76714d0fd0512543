use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, warn};

use super::error::EngineError;
use super::strategy::{PieceSelection, SequentialStrategy};
use crate::config::Settings;
use crate::constants::{POLL_TIMEOUT, TRACKER_FAILURE_BACKOFF, TRACKER_MIN_INTERVAL};
use crate::metainfo::{Info, InfoHash, Metainfo};
use crate::peer::{
    Bitfield, BlockValidation, Handshake, Incoming, Message, PeerConnection, PeerError, PeerId,
};
use crate::storage::FileLayout;
use crate::tracker::{
    AnnounceList, AnnounceQuery, AnnounceResponse, AnnounceTimer, TrackerConnection, TrackerPeer,
};

const BOTH: Interest = Interest::READABLE.add(Interest::WRITABLE);

/// The download engine: one torrent, one thread, one readiness loop.
///
/// Owns N peer slots plus one tracker slot. Poll tokens mirror slot
/// positions: `Token(i)` is peer slot `i`, `Token(N)` is the tracker.
/// Everything runs to completion between polls; the poll call is the only
/// place the loop suspends.
pub struct Download {
    info: Info,
    info_hash: InfoHash,
    peer_id: PeerId,
    handshake: Handshake,
    settings: Settings,

    local_bitfield: Bitfield,
    layout: FileLayout,
    strategy: SequentialStrategy,

    announce_list: AnnounceList,
    timer: AnnounceTimer,
    tracker: Option<TrackerConnection>,
    tracker_id: Option<String>,

    slots: Vec<Option<PeerConnection>>,
    backlog: VecDeque<TrackerPeer>,
    /// Addresses already dialed this session; never dialed twice.
    peers_seen: HashSet<SocketAddr>,

    poll: Poll,
    done: bool,
}

impl Download {
    /// Builds the engine: lays files out under `downloads_dir`,
    /// preallocates them, and resumes from whatever verified pieces are
    /// already on disk.
    pub fn new(
        metainfo: Metainfo,
        settings: Settings,
        downloads_dir: &Path,
    ) -> Result<Self, EngineError> {
        let piece_count = metainfo.info.piece_count();
        let peer_id = PeerId::generate();
        let handshake = Handshake::new(metainfo.info_hash, peer_id);

        let layout = FileLayout::new(&metainfo.info, downloads_dir);
        layout.preallocate()?;

        let mut local_bitfield = Bitfield::new(piece_count);
        let mut strategy = SequentialStrategy::new(piece_count);
        for index in layout.scan_existing(&metainfo.info.pieces)? {
            local_bitfield.set(index, true);
            strategy.mark_as_downloaded(index);
        }

        let done = local_bitfield.is_complete();
        let slots = (0..settings.max_peers).map(|_| None).collect();

        Ok(Self {
            info_hash: metainfo.info_hash,
            announce_list: AnnounceList::new(metainfo.announce_list),
            info: metainfo.info,
            peer_id,
            handshake,
            settings,
            local_bitfield,
            layout,
            strategy,
            timer: AnnounceTimer::new(),
            tracker: None,
            tracker_id: None,
            slots,
            backlog: VecDeque::new(),
            peers_seen: HashSet::new(),
            poll: Poll::new()?,
            done,
        })
    }

    /// Our verified-and-written pieces.
    pub fn bitfield(&self) -> &Bitfield {
        &self.local_bitfield
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Adds peers to the dial backlog, skipping addresses already known.
    pub fn enqueue_peers(&mut self, peers: impl IntoIterator<Item = TrackerPeer>) {
        for peer in peers {
            if self.peers_seen.contains(&peer.addr) {
                continue;
            }
            if self.backlog.iter().any(|known| known.addr == peer.addr) {
                continue;
            }
            self.backlog.push_back(peer);
        }
    }

    /// Runs the download to completion.
    ///
    /// Returns when every piece is verified and written, or with the
    /// first fatal error. Peer and tracker failures are absorbed along
    /// the way.
    pub fn run(&mut self) -> Result<(), EngineError> {
        if self.done {
            info!("all pieces already present; nothing to download");
            return Ok(());
        }

        info!(
            name = %self.info.name,
            pieces = self.info.piece_count(),
            have = self.local_bitfield.count_set(),
            "starting download"
        );
        self.start_announce()?;
        self.dial_backlog();

        let mut events = Events::with_capacity(self.slots.len() + 8);
        while !self.done {
            self.poll.poll(&mut events, Some(POLL_TIMEOUT))?;

            let slot_count = self.slots.len();
            let mut readable = vec![false; slot_count + 1];
            let mut writable = vec![false; slot_count + 1];
            for event in events.iter() {
                let Token(idx) = event.token();
                if idx > slot_count {
                    continue;
                }
                readable[idx] |= event.is_readable() || event.is_read_closed() || event.is_error();
                writable[idx] |= event.is_writable();
            }

            self.process_tracker(readable[slot_count], writable[slot_count])?;
            self.tick_tracker_timer()?;

            for i in 0..slot_count {
                if self.done {
                    break;
                }
                if self.slots[i].is_none() || !(readable[i] || writable[i]) {
                    continue;
                }
                if let Err(e) = self.process_peer(i, readable[i], writable[i]) {
                    match e {
                        EngineError::Peer(reason) => self.teardown_peer(i, &reason),
                        fatal => return Err(fatal),
                    }
                }
            }

            self.dial_backlog();

            let now = Instant::now();
            for slot in self.slots.iter_mut().flatten() {
                slot.tick_keepalive(now);
            }

            self.update_interests()?;
        }

        info!(name = %self.info.name, "download complete");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tracker lifecycle
    // ------------------------------------------------------------------

    fn tracker_token(&self) -> Token {
        Token(self.slots.len())
    }

    /// Dials the tracker under the announce cursor, walking the list on
    /// dial errors. On exhaustion: back off, and stall out if no peer is
    /// connected either.
    fn start_announce(&mut self) -> Result<(), EngineError> {
        loop {
            let dial = self
                .announce_list
                .current_endpoint()
                .and_then(|endpoint| TrackerConnection::dial(&endpoint, &self.announce_query()));
            match dial {
                Ok(mut conn) => {
                    let token = self.tracker_token();
                    self.poll
                        .registry()
                        .register(conn.socket_mut(), token, BOTH)?;
                    self.tracker = Some(conn);
                    return Ok(());
                }
                Err(e) => {
                    debug!(
                        url = self.announce_list.current().unwrap_or("<none>"),
                        error = %e,
                        "tracker dial failed"
                    );
                    if !self.announce_list.next() {
                        return self.announces_exhausted();
                    }
                }
            }
        }
    }

    fn announce_query(&self) -> AnnounceQuery {
        AnnounceQuery {
            info_hash: self.info_hash,
            peer_id: self.peer_id,
            port: self.settings.port,
            compact: true,
            ip: None,
            numwant: self.settings.numwant,
            key: None,
            trackerid: self.tracker_id.clone(),
        }
    }

    fn process_tracker(&mut self, readable: bool, writable: bool) -> Result<(), EngineError> {
        if self.tracker.is_none() {
            return Ok(());
        }

        if writable {
            let outcome = self
                .tracker
                .as_mut()
                .map(|t| if t.wants_write() { t.try_send() } else { Ok(()) });
            if let Some(Err(e)) = outcome {
                return self.announce_failed(&e.to_string());
            }
        }

        if readable {
            let received = match self.tracker.as_mut() {
                Some(t) => match t.try_recv() {
                    Ok(Some(raw)) => Some(raw.to_vec()),
                    Ok(None) => None,
                    Err(e) => return self.announce_failed(&e.to_string()),
                },
                None => None,
            };
            if let Some(raw) = received {
                self.finish_announce(&raw)?;
            }
        }

        Ok(())
    }

    /// The tracker closed the connection: parse what it sent.
    fn finish_announce(&mut self, raw: &[u8]) -> Result<(), EngineError> {
        self.close_tracker();
        match AnnounceResponse::from_http(raw) {
            Ok(response) => {
                info!(
                    interval = response.interval,
                    peers = response.peers.len(),
                    complete = response.complete,
                    incomplete = response.incomplete,
                    "announce succeeded"
                );
                if let Some(warning) = &response.warning_message {
                    warn!(%warning, "tracker warning");
                }
                if response.tracker_id.is_some() {
                    self.tracker_id = response.tracker_id.clone();
                }
                self.announce_list.promote_current();
                self.announce_list.reset();
                self.timer.arm(response.interval_duration());
                self.enqueue_peers(response.peers);
                Ok(())
            }
            Err(e) => self.announce_failed(&e.to_string()),
        }
    }

    /// A sent announce went bad: move to the next URL (retried on the
    /// next timer tick) or, when the list is spent, back off.
    fn announce_failed(&mut self, reason: &str) -> Result<(), EngineError> {
        warn!(
            url = self.announce_list.current().unwrap_or("<none>"),
            reason,
            "announce failed"
        );
        self.close_tracker();
        if self.announce_list.next() {
            self.timer.arm(TRACKER_MIN_INTERVAL);
            Ok(())
        } else {
            self.announces_exhausted()
        }
    }

    fn announces_exhausted(&mut self) -> Result<(), EngineError> {
        self.announce_list.reset();
        self.close_tracker();
        self.timer.arm(TRACKER_FAILURE_BACKOFF);
        if self.has_peers_connected() {
            warn!("all trackers failed; continuing with connected peers");
            Ok(())
        } else {
            Err(EngineError::Stalled)
        }
    }

    fn close_tracker(&mut self) {
        if let Some(mut conn) = self.tracker.take() {
            let _ = self.poll.registry().deregister(conn.socket_mut());
        }
    }

    fn tick_tracker_timer(&mut self) -> Result<(), EngineError> {
        if self.tracker.is_none() && self.timer.expired(Instant::now()) {
            self.start_announce()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Peer lifecycle
    // ------------------------------------------------------------------

    fn has_peers_connected(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Dials backlog entries into every idle slot. Each attempted address
    /// is marked seen, successful or not, and never tried again.
    fn dial_backlog(&mut self) {
        for i in 0..self.slots.len() {
            if self.slots[i].is_some() {
                continue;
            }
            while let Some(peer) = self.backlog.pop_front() {
                self.peers_seen.insert(peer.addr);
                match PeerConnection::dial(peer.addr, &self.handshake, &self.local_bitfield) {
                    Ok(mut conn) => {
                        if let Err(e) =
                            self.poll.registry().register(conn.socket_mut(), Token(i), BOTH)
                        {
                            debug!(peer = %peer.addr, error = %e, "failed to register peer socket");
                            continue;
                        }
                        info!(peer = %peer.addr, slot = i, "connecting to peer");
                        self.slots[i] = Some(conn);
                        break;
                    }
                    Err(e) => {
                        debug!(peer = %peer.addr, error = %e, "peer dial failed");
                    }
                }
            }
        }
    }

    /// Frees a slot: deregister, return its pieces to the strategy, drop.
    fn teardown_peer(&mut self, i: usize, reason: &PeerError) {
        if let Some(mut conn) = self.slots[i].take() {
            let _ = self.poll.registry().deregister(conn.socket_mut());
            for piece in conn.assigned_pieces() {
                self.strategy.mark_as_discarded(piece);
                debug!(piece, "piece discarded");
            }
            warn!(peer = %conn.addr(), slot = i, error = %reason, "peer disconnected");
        }
    }

    fn process_peer(&mut self, i: usize, readable: bool, writable: bool) -> Result<(), EngineError> {
        if readable {
            loop {
                let Some(conn) = self.slots[i].as_mut() else {
                    return Ok(());
                };
                match conn.try_recv().map_err(EngineError::Peer)? {
                    Some(incoming) => self.dispatch(i, incoming)?,
                    None => break,
                }
                if self.done {
                    return Ok(());
                }
            }
        }

        if writable {
            if let Some(conn) = self.slots[i].as_mut() {
                conn.try_flush().map_err(EngineError::Peer)?;
            }
        }
        Ok(())
    }

    /// Per-message dispatch. Called once per complete inbound frame, in
    /// arrival order.
    fn dispatch(&mut self, i: usize, incoming: Incoming) -> Result<(), EngineError> {
        let Some(conn) = self.slots[i].as_mut() else {
            return Ok(());
        };
        let peer = conn.addr();

        let message = match incoming {
            Incoming::Handshake(handshake) => {
                if handshake.info_hash != self.info_hash {
                    return Err(PeerError::InfoHashMismatch.into());
                }
                info!(%peer, peer_id = ?handshake.peer_id, "handshake complete");
                return Ok(());
            }
            Incoming::Message(message) => message,
        };

        debug!(%peer, msg = message.name(), "received");
        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                conn.peer_choking = true;
                let discards = conn.assigned_pieces();
                conn.reset_requests();
                for piece in discards {
                    self.strategy.mark_as_discarded(piece);
                    debug!(piece, "piece discarded on choke");
                }
            }
            Message::Unchoke => {
                conn.peer_choking = false;
                if !conn.is_downloading() {
                    self.request_new_pieces(i);
                }
            }
            Message::Interested => conn.peer_interested = true,
            Message::NotInterested => conn.peer_interested = false,
            Message::Have { piece } => {
                conn.peer_bitfield.set(piece as usize, true);
                if self.strategy.is_piece_missing(piece as usize) {
                    conn.send_interested();
                }
                let idle = !conn.peer_choking && !conn.is_downloading();
                if idle {
                    self.request_new_pieces(i);
                }
            }
            Message::Bitfield(payload) => {
                let bitfield = Bitfield::try_from_message(&payload, self.info.piece_count())
                    .map_err(EngineError::Peer)?;
                conn.peer_bitfield = bitfield;
                if self.strategy.have_missing_pieces(&conn.peer_bitfield) {
                    conn.send_interested();
                }
                let idle = !conn.peer_choking && !conn.is_downloading();
                if idle {
                    self.request_new_pieces(i);
                }
            }
            Message::Request { .. } | Message::Cancel { .. } | Message::Port(_) => {
                // Accepted and ignored: this client does not serve.
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                let verdict = conn
                    .accept_block(index, begin, block)
                    .map_err(EngineError::Peer)?;
                match verdict {
                    BlockValidation::Invalid => {
                        warn!(%peer, index, begin, "unexpected block");
                    }
                    BlockValidation::Accepted | BlockValidation::PieceComplete => {
                        if verdict == BlockValidation::PieceComplete {
                            self.finish_piece(i)?;
                            if self.done {
                                return Ok(());
                            }
                        }
                        let Some(conn) = self.slots[i].as_mut() else {
                            return Ok(());
                        };
                        let exhausted = conn.pump_requests();
                        let choked = conn.peer_choking;
                        if exhausted && !choked {
                            self.request_new_pieces(i);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Asks the strategy for another piece for slot `i` and queues its
    /// first window of requests.
    fn request_new_pieces(&mut self, i: usize) {
        let selection = {
            let Some(conn) = self.slots[i].as_ref() else {
                return;
            };
            self.strategy.next_piece(&conn.peer_bitfield)
        };
        let Some(conn) = self.slots[i].as_mut() else {
            return;
        };
        match selection {
            PieceSelection::Completed => {
                self.done = true;
            }
            PieceSelection::NoPiece => conn.send_notinterested(),
            PieceSelection::Picked(index) => {
                // Endgame can offer a piece this peer is already fetching;
                // queueing it twice would corrupt the in-order request
                // window.
                if conn.assigned_pieces().contains(&index) {
                    return;
                }
                let size = self.info.piece_size(index) as usize;
                conn.send_interested();
                conn.assign_piece(index, size);
                conn.pump_requests();
                debug!(piece = index, peer = %conn.addr(), "requesting piece");
            }
        }
    }

    /// A piece finished assembling in slot `i`: verify, write, announce.
    fn finish_piece(&mut self, i: usize) -> Result<(), EngineError> {
        let piece = match self.slots[i].as_mut() {
            Some(conn) => conn.take_piece(),
            None => return Ok(()),
        };
        let Some(index) = piece.index() else {
            return Ok(());
        };
        let index = index as usize;

        if self.local_bitfield.has(index) {
            // Endgame duplicate: another peer delivered it first.
            debug!(piece = index, "dropping duplicate piece");
            return Ok(());
        }

        let digest = piece.sha1();
        if &digest != self.info.piece_hash(index) {
            self.strategy.mark_as_discarded(index);
            warn!(piece = index, "discarded: hash check failed");
            return Err(PeerError::HashMismatch(index).into());
        }

        let data = piece.blocks().concat();
        self.layout.write_piece(index, &data)?;
        self.local_bitfield.set(index, true);
        self.strategy.mark_as_downloaded(index);
        info!(
            piece = index,
            have = self.local_bitfield.count_set(),
            total = self.info.piece_count(),
            "piece downloaded and written"
        );

        for slot in self.slots.iter_mut().flatten() {
            slot.enqueue(Message::Have {
                piece: index as u32,
            });
        }

        if self.local_bitfield.is_complete() {
            self.done = true;
        }
        Ok(())
    }

    /// Re-arms each registration with the interest it currently needs:
    /// always readable, writable only while something is queued.
    fn update_interests(&mut self) -> Result<(), EngineError> {
        for i in 0..self.slots.len() {
            if let Some(conn) = self.slots[i].as_mut() {
                let interest = if conn.wants_write() {
                    BOTH
                } else {
                    Interest::READABLE
                };
                self.poll
                    .registry()
                    .reregister(conn.socket_mut(), Token(i), interest)?;
            }
        }
        let token = self.tracker_token();
        if let Some(tracker) = self.tracker.as_mut() {
            let interest = if tracker.wants_write() {
                BOTH
            } else {
                Interest::READABLE
            };
            self.poll
                .registry()
                .reregister(tracker.socket_mut(), token, interest)?;
        }
        Ok(())
    }
}
