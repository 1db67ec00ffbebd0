//! Loopback sockets, frame builders and client-side readers.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quay_wire::{PROTOCOL_VERSION, ReplyFrame};

use crate::socket::{ConnectionId, SocketHandle};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Socket handle backed by a real loopback connection, plus the client end.
pub(crate) fn socket_pair(id: usize) -> (SocketHandle, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let address = listener.local_addr().expect("listener address");
    let client = TcpStream::connect(address).expect("connect client");
    client
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .expect("client read timeout");
    let (server, peer) = listener.accept().expect("accept client");
    server.set_nonblocking(true).expect("non-blocking server side");
    let stream = mio::net::TcpStream::from_std(server);
    let handle = SocketHandle::new(ConnectionId::new(id), peer, Some(Arc::new(stream)));
    (handle, client)
}

/// Socket handle without a transport, for lifecycle-only tests.
pub(crate) fn detached_socket(id: usize) -> SocketHandle {
    let peer: SocketAddr = "192.0.2.7:4100".parse().expect("peer address");
    SocketHandle::new(ConnectionId::new(id), peer, None)
}

/// Reads one length-prefixed frame from the client side.
pub(crate) fn read_frame(client: &mut TcpStream) -> Vec<u8> {
    let mut prefix = [0_u8; 4];
    client.read_exact(&mut prefix).expect("frame prefix");
    let total = u32::from_be_bytes(prefix) as usize;
    let mut frame = prefix.to_vec();
    frame.resize(total, 0);
    client.read_exact(&mut frame[4..]).expect("frame body");
    frame
}

/// Reads and decodes one reply frame.
pub(crate) fn read_reply(client: &mut TcpStream) -> ReplyFrame {
    let frame = read_frame(client);
    ReplyFrame::decode(&frame).expect("well-formed reply")
}

/// Asserts that nothing arrives within a short window.
pub(crate) fn assert_silent(client: &mut TcpStream) {
    client
        .set_read_timeout(Some(Duration::from_millis(150)))
        .expect("short timeout");
    let mut byte = [0_u8; 1];
    match client.read(&mut byte) {
        Ok(0) => {}
        Ok(_) => panic!("unexpected bytes from server"),
        Err(error) => assert!(
            matches!(
                error.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            "unexpected read error: {error}"
        ),
    }
    client
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .expect("restore timeout");
}

/// Builder for request frames as a client would send them.
#[derive(Debug, Clone)]
pub(crate) struct FrameBuilder {
    version: u8,
    id: u32,
    command: u16,
    flags: u16,
    event: Vec<u8>,
    body: Vec<u8>,
}

impl FrameBuilder {
    pub(crate) fn new(event: &str) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: 1,
            command: 1,
            flags: 0x0002,
            event: event.as_bytes().to_vec(),
            body: b"{}".to_vec(),
        }
    }

    pub(crate) fn id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub(crate) fn command(mut self, command: u16) -> Self {
        self.command = command;
        self
    }

    pub(crate) fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn asynchronous(mut self) -> Self {
        self.flags = 0;
        self
    }

    pub(crate) fn body(mut self, body: &[u8]) -> Self {
        self.body = body.to_vec();
        self
    }

    /// Event payload: name length, name, structured body.
    pub(crate) fn payload(&self) -> Vec<u8> {
        let mut payload = (self.event.len() as u32).to_be_bytes().to_vec();
        payload.extend_from_slice(&self.event);
        payload.extend_from_slice(&self.body);
        payload
    }

    /// Body after the length prefix.
    pub(crate) fn request_body(&self) -> Vec<u8> {
        let word = (u32::from(self.version) << 28) | (self.id & 0x0FFF_FFFF);
        let mut body = word.to_be_bytes().to_vec();
        body.extend_from_slice(&self.command.to_be_bytes());
        body.extend_from_slice(&self.flags.to_be_bytes());
        body.extend_from_slice(&self.payload());
        body
    }

    /// Complete frame including the length prefix.
    pub(crate) fn frame(&self) -> Vec<u8> {
        let body = self.request_body();
        let mut frame = ((body.len() + 4) as u32).to_be_bytes().to_vec();
        frame.extend_from_slice(&body);
        frame
    }
}

/// Writes bytes to the client side in the given chunk sizes, pausing between
/// chunks so the server observes separate reads.
pub(crate) fn write_in_chunks(client: &mut TcpStream, bytes: &[u8], chunk: usize) {
    for piece in bytes.chunks(chunk.max(1)) {
        client.write_all(piece).expect("write chunk");
        client.flush().expect("flush chunk");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Thread-safe event log used by recording closures.
#[derive(Debug, Default, Clone)]
pub(crate) struct Recorder<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub(crate) fn record(&self, event: T) {
        self.events.lock().expect("recorder lock").push(event);
    }

    pub(crate) fn events(&self) -> Vec<T> {
        self.events.lock().expect("recorder lock").clone()
    }
}

/// Reads until the server closes the connection, discarding any replies.
pub(crate) fn assert_closed(client: &mut TcpStream) {
    let mut buffer = [0_u8; 256];
    loop {
        match client.read(&mut buffer) {
            Ok(0) => return,
            Ok(_) => {}
            Err(error) if error.kind() == std::io::ErrorKind::ConnectionReset => return,
            Err(error) => panic!("connection still open: {error}"),
        }
    }
}

/// Connects a client with the standard read timeout.
pub(crate) fn connect(address: SocketAddr) -> TcpStream {
    let client = TcpStream::connect(address).expect("connect client");
    client
        .set_read_timeout(Some(CLIENT_TIMEOUT))
        .expect("client read timeout");
    client
}
