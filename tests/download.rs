//! End-to-end downloads against a scripted localhost swarm: a mock HTTP
//! tracker and mock peers speaking just enough of the wire protocol.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tempfile::TempDir;

use mytorrent::bencode::{encode, Value};
use mytorrent::config::Settings;
use mytorrent::engine::Download;
use mytorrent::metainfo::Metainfo;

// ---------------------------------------------------------------------
// Torrent fixture
// ---------------------------------------------------------------------

const PIECE_LEN: usize = 4;
const CONTENT: &[u8] = b"hello world"; // 11 bytes: pieces of 4, 4, 3

fn sha1_of(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

fn dict(entries: Vec<(&str, Value)>) -> Value {
    let map: BTreeMap<Bytes, Value> = entries
        .into_iter()
        .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), v))
        .collect();
    Value::Dict(map)
}

/// Builds a single-file torrent over arbitrary content.
fn build_torrent(
    name: &str,
    content: &[u8],
    piece_len: usize,
    announce: &str,
    tiers: Option<Vec<Vec<&str>>>,
) -> Metainfo {
    let mut hashes = Vec::new();
    for chunk in content.chunks(piece_len) {
        hashes.extend(sha1_of(chunk));
    }
    let info = dict(vec![
        ("length", Value::Integer(content.len() as i64)),
        ("name", Value::string(name)),
        ("piece length", Value::Integer(piece_len as i64)),
        ("pieces", Value::Bytes(Bytes::from(hashes))),
    ]);
    let mut root = vec![("announce", Value::string(announce)), ("info", info)];
    if let Some(tiers) = tiers {
        let tiers = Value::List(
            tiers
                .into_iter()
                .map(|t| Value::List(t.into_iter().map(Value::string).collect()))
                .collect(),
        );
        root.insert(1, ("announce-list", tiers));
    }
    let data = encode(&dict(root));
    Metainfo::from_bytes(&data).expect("fixture torrent parses")
}

/// The small [`CONTENT`] torrent used by most scenarios.
fn make_torrent(announce: &str, tiers: Option<Vec<Vec<&str>>>) -> Metainfo {
    build_torrent("greeting.txt", CONTENT, PIECE_LEN, announce, tiers)
}

fn piece_content(index: usize) -> &'static [u8] {
    let start = index * PIECE_LEN;
    &CONTENT[start..(start + PIECE_LEN).min(CONTENT.len())]
}

// ---------------------------------------------------------------------
// Mock tracker
// ---------------------------------------------------------------------

/// Serves exactly one announce with a compact peer list, then exits.
fn spawn_tracker(peers: Vec<SocketAddr>) -> (u16, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).unwrap();
            assert_ne!(n, 0, "client closed before finishing the request");
            request.extend_from_slice(&buf[..n]);
        }

        let mut body = b"d8:intervali1800e5:peers".to_vec();
        body.extend(format!("{}:", peers.len() * 6).into_bytes());
        for peer in &peers {
            let SocketAddr::V4(v4) = peer else {
                panic!("mock tracker only hands out ipv4 peers");
            };
            body.extend_from_slice(&v4.ip().octets());
            body.extend_from_slice(&v4.port().to_be_bytes());
        }
        body.push(b'e');

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();

        String::from_utf8_lossy(&request).into_owned()
    });

    (port, handle)
}

// ---------------------------------------------------------------------
// Mock peer
// ---------------------------------------------------------------------

struct MockPeer {
    info_hash: [u8; 20],
    /// Content served per piece; corrupt entries simulate a bad seed.
    pieces: Vec<Vec<u8>>,
    /// Choke once after the first request, then unchoke.
    choke_after_first_request: bool,
}

fn put_message(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
    out.extend_from_slice(&(1 + payload.len() as u32).to_be_bytes());
    out.push(id);
    out.extend_from_slice(payload);
}

/// Accepts one connection, handshakes, advertises every piece, unchokes,
/// and serves requests. Returns the piece indices requested, in order.
fn spawn_peer(config: MockPeer) -> (SocketAddr, JoinHandle<Vec<u32>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut requested = Vec::new();

        let mut handshake = [0u8; 68];
        stream.read_exact(&mut handshake).unwrap();
        assert_eq!(handshake[0], 19);
        assert_eq!(&handshake[1..20], b"BitTorrent protocol");
        assert_eq!(&handshake[28..48], &config.info_hash[..]);

        let mut hello = Vec::new();
        hello.extend_from_slice(&handshake[..28]);
        hello.extend_from_slice(&config.info_hash);
        hello.extend_from_slice(b"-MK0001-abcdefghijkl");

        // Bitfield: every piece, spare bits zero.
        let piece_count = config.pieces.len();
        let mut bits = vec![0u8; piece_count.div_ceil(8)];
        for i in 0..piece_count {
            bits[i / 8] |= 1 << (7 - i % 8);
        }
        put_message(&mut hello, 5, &bits);
        put_message(&mut hello, 1, &[]); // unchoke
        stream.write_all(&hello).unwrap();

        let mut choked_once = false;
        loop {
            let mut prefix = [0u8; 4];
            if stream.read_exact(&mut prefix).is_err() {
                break; // engine finished and dropped the socket
            }
            let len = u32::from_be_bytes(prefix) as usize;
            if len == 0 {
                continue; // keepalive
            }
            let mut payload = vec![0u8; len];
            if stream.read_exact(&mut payload).is_err() {
                break;
            }
            if payload[0] != 6 {
                continue; // interested, have, bitfield: nothing to do
            }

            let index = u32::from_be_bytes(payload[1..5].try_into().unwrap());
            let begin = u32::from_be_bytes(payload[5..9].try_into().unwrap()) as usize;
            let length = u32::from_be_bytes(payload[9..13].try_into().unwrap()) as usize;
            requested.push(index);

            if config.choke_after_first_request && !choked_once {
                choked_once = true;
                let mut churn = Vec::new();
                put_message(&mut churn, 0, &[]); // choke
                put_message(&mut churn, 1, &[]); // unchoke
                stream.write_all(&churn).unwrap();
                continue; // the choked request is dropped, never answered
            }

            let content = &config.pieces[index as usize];
            let mut response = Vec::new();
            let mut piece_payload = Vec::new();
            piece_payload.extend_from_slice(&index.to_be_bytes());
            piece_payload.extend_from_slice(&(begin as u32).to_be_bytes());
            piece_payload.extend_from_slice(&content[begin..begin + length]);
            put_message(&mut response, 7, &piece_payload);
            stream.write_all(&response).unwrap();
        }

        requested
    });

    (addr, handle)
}

fn honest_peer_pieces() -> Vec<Vec<u8>> {
    (0..3).map(|i| piece_content(i).to_vec()).collect()
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[test]
fn resume_scan_completes_without_any_networking() {
    // The announce URL points nowhere; a complete file on disk means the
    // engine must finish without dialing at all.
    let metainfo = make_torrent("http://127.0.0.1:1/announce", None);
    let downloads = TempDir::new().unwrap();
    std::fs::write(downloads.path().join("greeting.txt"), CONTENT).unwrap();

    let mut download =
        Download::new(metainfo, Settings::default(), downloads.path()).unwrap();
    assert!(download.is_done());
    assert!(download.bitfield().is_complete());
    download.run().unwrap();
}

#[test]
fn sequential_download_from_a_single_seed() {
    let metainfo = make_torrent("http://127.0.0.1:1/announce", None);
    let (peer_addr, peer) = spawn_peer(MockPeer {
        info_hash: *metainfo.info_hash.as_bytes(),
        pieces: honest_peer_pieces(),
        choke_after_first_request: false,
    });
    let (tracker_port, tracker) = spawn_tracker(vec![peer_addr]);

    let metainfo = make_torrent(&format!("http://127.0.0.1:{tracker_port}/announce"), None);
    let downloads = TempDir::new().unwrap();
    let mut download =
        Download::new(metainfo, Settings::default(), downloads.path()).unwrap();
    download.run().unwrap();
    assert!(download.bitfield().is_complete());
    drop(download);

    let written = std::fs::read(downloads.path().join("greeting.txt")).unwrap();
    assert_eq!(written, CONTENT);

    let request = tracker.join().unwrap();
    assert!(request.starts_with("GET /announce?info_hash="));
    assert!(request.contains("&compact=1"));

    // Pieces were requested strictly in order.
    assert_eq!(peer.join().unwrap(), vec![0, 1, 2]);
}

#[test]
fn choke_mid_piece_causes_a_clean_rerequest() {
    let base = make_torrent("http://127.0.0.1:1/announce", None);
    let (peer_addr, peer) = spawn_peer(MockPeer {
        info_hash: *base.info_hash.as_bytes(),
        pieces: honest_peer_pieces(),
        choke_after_first_request: true,
    });
    let (tracker_port, _tracker) = spawn_tracker(vec![peer_addr]);

    let metainfo = make_torrent(&format!("http://127.0.0.1:{tracker_port}/announce"), None);
    let downloads = TempDir::new().unwrap();
    let mut download =
        Download::new(metainfo, Settings::default(), downloads.path()).unwrap();
    download.run().unwrap();
    drop(download);

    let written = std::fs::read(downloads.path().join("greeting.txt")).unwrap();
    assert_eq!(written, CONTENT);

    // Piece 0 was requested, dropped on the choke, then requested again
    // from scratch.
    assert_eq!(peer.join().unwrap(), vec![0, 0, 1, 2]);
}

#[test]
fn corrupt_seed_is_dropped_and_honest_seed_finishes() {
    let base = make_torrent("http://127.0.0.1:1/announce", None);

    let mut corrupt = honest_peer_pieces();
    corrupt[0] = vec![0xEE; PIECE_LEN]; // piece 0 will fail its hash
    let (bad_addr, _bad_peer) = spawn_peer(MockPeer {
        info_hash: *base.info_hash.as_bytes(),
        pieces: corrupt,
        choke_after_first_request: false,
    });
    let (good_addr, good_peer) = spawn_peer(MockPeer {
        info_hash: *base.info_hash.as_bytes(),
        pieces: honest_peer_pieces(),
        choke_after_first_request: false,
    });
    let (tracker_port, _tracker) = spawn_tracker(vec![bad_addr, good_addr]);

    let metainfo = make_torrent(&format!("http://127.0.0.1:{tracker_port}/announce"), None);
    let downloads = TempDir::new().unwrap();
    let mut download =
        Download::new(metainfo, Settings::default(), downloads.path()).unwrap();
    download.run().unwrap();
    assert!(download.bitfield().is_complete());
    drop(download);

    // Whatever the corrupt seed delivered was discarded; the final bytes
    // are the honest ones.
    let written = std::fs::read(downloads.path().join("greeting.txt")).unwrap();
    assert_eq!(written, CONTENT);
    assert!(!good_peer.join().unwrap().is_empty());
}

// ---------------------------------------------------------------------
// Scripted-peer plumbing for the endgame scenario
// ---------------------------------------------------------------------

/// Reads one length-prefixed frame; `None` on EOF, empty vec on KeepAlive.
fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).ok()?;
    let len = u32::from_be_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    Some(payload)
}

/// Skips frames until the next Request; `None` on EOF.
fn next_request(stream: &mut TcpStream) -> Option<(u32, u32, u32)> {
    loop {
        let payload = read_frame(stream)?;
        if payload.first() == Some(&6) {
            return Some((
                u32::from_be_bytes(payload[1..5].try_into().unwrap()),
                u32::from_be_bytes(payload[5..9].try_into().unwrap()),
                u32::from_be_bytes(payload[9..13].try_into().unwrap()),
            ));
        }
    }
}

/// Skips frames until a NotInterested arrives; `false` means the engine
/// closed the connection first (i.e. the peer was torn down).
fn saw_notinterested(stream: &mut TcpStream) -> bool {
    loop {
        let Some(payload) = read_frame(stream) else {
            return false;
        };
        if payload.first() == Some(&3) {
            return true;
        }
    }
}

fn handshake_exchange(stream: &mut TcpStream, info_hash: &[u8; 20]) {
    let mut handshake = [0u8; 68];
    stream.read_exact(&mut handshake).unwrap();
    assert_eq!(handshake[0], 19);
    assert_eq!(&handshake[28..48], &info_hash[..]);

    let mut reply = Vec::with_capacity(68);
    reply.extend_from_slice(&handshake[..28]);
    reply.extend_from_slice(info_hash);
    reply.extend_from_slice(b"-MK0002-mnopqrstuvwx");
    stream.write_all(&reply).unwrap();
}

fn bitfield_payload(piece_count: usize, have: &[usize]) -> Vec<u8> {
    let mut bits = vec![0u8; piece_count.div_ceil(8)];
    for &i in have {
        bits[i / 8] |= 1 << (7 - i % 8);
    }
    bits
}

fn append_piece_block(out: &mut Vec<u8>, content: &[u8], piece_len: usize, req: (u32, u32, u32)) {
    let (index, begin, length) = req;
    let start = index as usize * piece_len + begin as usize;
    let mut payload = Vec::with_capacity(9 + length as usize);
    payload.extend_from_slice(&index.to_be_bytes());
    payload.extend_from_slice(&begin.to_be_bytes());
    payload.extend_from_slice(&content[start..start + length as usize]);
    put_message(out, 7, &payload);
}

fn serve_block(stream: &mut TcpStream, content: &[u8], piece_len: usize, req: (u32, u32, u32)) {
    let mut out = Vec::new();
    append_piece_block(&mut out, content, piece_len, req);
    stream.write_all(&out).unwrap();
}

const SIGNAL_WAIT: Duration = Duration::from_secs(10);

/// Endgame: the piece still in flight at one peer is offered to the other
/// as well. Both peers must receive a Request for the same index, and the
/// losing copy must be absorbed without an error or a second write.
///
/// Choreography over a three-piece torrent with two-block pieces:
/// - Peer W has pieces {0, 2}. It takes piece 0, serves one block, and
///   pipelining hands it piece 2 as well; it then withholds everything.
/// - Peer L has pieces {0, 1}. It takes piece 1 and finishes it; every
///   piece is now assigned, so the engine enters endgame and asks L for
///   piece 0 while W's copy is still in flight.
/// - W completes piece 0 (the winner). L then delivers its duplicate,
///   which the engine must drop quietly; with nothing left for L it
///   answers NotInterested, which is the observable proof the duplicate
///   was dispatched and the peer survived.
/// - Only then does W deliver piece 2, finishing the download.
#[test]
fn endgame_offers_the_inflight_piece_to_both_peers() {
    const PIECE: usize = 32768; // two 16KB blocks per piece
    let content: Vec<u8> = (0..3 * PIECE).map(|i| (i % 251) as u8).collect();
    let base = build_torrent("payload.bin", &content, PIECE, "http://127.0.0.1:1/announce", None);
    let info_hash = *base.info_hash.as_bytes();

    let (w_signal_tx, w_signal_rx) = mpsc::channel::<()>();
    let (l_signal_tx, l_signal_rx) = mpsc::channel::<()>();

    let w_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let w_addr = w_listener.local_addr().unwrap();
    let w_content = content.clone();
    let w = std::thread::spawn(move || {
        let (mut stream, _) = w_listener.accept().unwrap();
        handshake_exchange(&mut stream, &info_hash);

        let mut hello = Vec::new();
        put_message(&mut hello, 5, &bitfield_payload(3, &[0, 2]));
        put_message(&mut hello, 1, &[]); // unchoke
        stream.write_all(&hello).unwrap();

        // Piece 0 is assigned first; serving its opening block makes the
        // engine pipeline piece 2 onto this connection too.
        let r1 = next_request(&mut stream).unwrap();
        let r2 = next_request(&mut stream).unwrap();
        assert_eq!((r1.0, r2.0), (0, 0));
        serve_block(&mut stream, &w_content, PIECE, r1);
        let r3 = next_request(&mut stream).unwrap();
        let r4 = next_request(&mut stream).unwrap();
        assert_eq!((r3.0, r4.0), (2, 2));

        // Piece 0 is now half-delivered and piece 2 withheld. Let L run
        // its course until it holds the duplicate requests for piece 0.
        w_signal_tx.send(()).unwrap();
        l_signal_rx.recv_timeout(SIGNAL_WAIT).unwrap();

        // Win the race for piece 0, then let L deliver its copy.
        serve_block(&mut stream, &w_content, PIECE, r2);
        w_signal_tx.send(()).unwrap();
        l_signal_rx.recv_timeout(SIGNAL_WAIT).unwrap();

        // The duplicate has been absorbed; finish the download.
        serve_block(&mut stream, &w_content, PIECE, r3);
        serve_block(&mut stream, &w_content, PIECE, r4);
        while read_frame(&mut stream).is_some() {}

        vec![r1.0, r2.0, r3.0, r4.0]
    });

    let l_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let l_addr = l_listener.local_addr().unwrap();
    let l_content = content.clone();
    let l = std::thread::spawn(move || {
        let (mut stream, _) = l_listener.accept().unwrap();
        handshake_exchange(&mut stream, &info_hash);

        let mut hello = Vec::new();
        put_message(&mut hello, 5, &bitfield_payload(3, &[0, 1]));
        stream.write_all(&hello).unwrap();

        // Hold the unchoke until W owns pieces 0 and 2.
        w_signal_rx.recv_timeout(SIGNAL_WAIT).unwrap();
        let mut unchoke = Vec::new();
        put_message(&mut unchoke, 1, &[]);
        stream.write_all(&unchoke).unwrap();

        let q1 = next_request(&mut stream).unwrap();
        let q2 = next_request(&mut stream).unwrap();
        assert_eq!((q1.0, q2.0), (1, 1));
        serve_block(&mut stream, &l_content, PIECE, q1);
        serve_block(&mut stream, &l_content, PIECE, q2);

        // Every piece is assigned once piece 1 lands, so the engine goes
        // into endgame and hands this peer W's in-flight piece 0.
        let q3 = next_request(&mut stream).unwrap();
        let q4 = next_request(&mut stream).unwrap();
        assert_eq!((q3.0, q4.0), (0, 0));
        l_signal_tx.send(()).unwrap();

        // W has completed piece 0; deliver the losing copy in one burst
        // so the engine dispatches both blocks in the same wake.
        w_signal_rx.recv_timeout(SIGNAL_WAIT).unwrap();
        let mut duplicate = Vec::new();
        append_piece_block(&mut duplicate, &l_content, PIECE, q3);
        append_piece_block(&mut duplicate, &l_content, PIECE, q4);
        stream.write_all(&duplicate).unwrap();

        // The engine must absorb the duplicate, keep the connection, and
        // answer NotInterested once it has nothing left to ask for.
        let survived = saw_notinterested(&mut stream);
        l_signal_tx.send(()).unwrap();
        while read_frame(&mut stream).is_some() {}

        (vec![q1.0, q2.0, q3.0, q4.0], survived)
    });

    let (tracker_port, _tracker) = spawn_tracker(vec![w_addr, l_addr]);
    let metainfo = build_torrent(
        "payload.bin",
        &content,
        PIECE,
        &format!("http://127.0.0.1:{tracker_port}/announce"),
        None,
    );

    let downloads = TempDir::new().unwrap();
    let mut download =
        Download::new(metainfo, Settings::default(), downloads.path()).unwrap();
    download.run().unwrap();
    assert!(download.bitfield().is_complete());
    drop(download);

    let w_requests = w.join().unwrap();
    let (l_requests, l_survived) = l.join().unwrap();

    // Both peers were asked for piece 0, and the loser's delivery was
    // accepted rather than treated as a protocol violation.
    assert!(w_requests.contains(&0));
    assert!(l_requests.contains(&0));
    assert_eq!(l_requests, vec![1, 1, 0, 0]);
    assert!(l_survived);

    // One clean copy on disk; the duplicate did not corrupt the write.
    let written = std::fs::read(downloads.path().join("payload.bin")).unwrap();
    assert_eq!(written, content);
}

#[test]
fn tracker_fallback_reaches_the_second_tier() {
    let base = make_torrent("http://127.0.0.1:1/announce", None);
    let (peer_addr, _peer) = spawn_peer(MockPeer {
        info_hash: *base.info_hash.as_bytes(),
        pieces: honest_peer_pieces(),
        choke_after_first_request: false,
    });
    let (tracker_port, tracker) = spawn_tracker(vec![peer_addr]);

    // Tier one refuses connections; tier two works.
    let good = format!("http://127.0.0.1:{tracker_port}/announce");
    let metainfo = make_torrent(
        "http://127.0.0.1:1/announce",
        Some(vec![vec!["http://127.0.0.1:1/announce"], vec![good.as_str()]]),
    );

    let downloads = TempDir::new().unwrap();
    let mut download =
        Download::new(metainfo, Settings::default(), downloads.path()).unwrap();
    download.run().unwrap();
    assert!(download.bitfield().is_complete());
    drop(download);

    tracker.join().unwrap();
    let written = std::fs::read(downloads.path().join("greeting.txt")).unwrap();
    assert_eq!(written, CONTENT);
}
