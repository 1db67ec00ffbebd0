//! Scenario world driving a real server over loopback.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use quay_config::Config;
use quay_queue::NamedQueue;
use quay_wire::{ReplyCode, ReplyFrame};
use rstest::fixture;

use crate::dispatch::QueueEntry;
use crate::server::{RunningServer, Server};
use crate::session::JoinOptions;

use super::net::{FrameBuilder, connect, read_reply};

const WAIT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const LOGIN_REQUEST_ID: u32 = 100;

/// Scenario world shared across BDD steps.
pub(crate) struct ServerWorld {
    config: Config,
    server: Option<Server>,
    running: Option<RunningServer>,
    queues: HashMap<String, Arc<NamedQueue<QueueEntry>>>,
    client: Option<TcpStream>,
    login: Option<QueueEntry>,
    retired: Option<usize>,
}

#[fixture]
pub(crate) fn world() -> RefCell<ServerWorld> {
    RefCell::new(ServerWorld::new())
}

impl ServerWorld {
    fn new() -> Self {
        Self {
            config: Config::default().with_listen("127.0.0.1", 0),
            server: None,
            running: None,
            queues: HashMap::new(),
            client: None,
            login: None,
            retired: None,
        }
    }

    pub(crate) fn configure(&mut self, adjust: impl FnOnce(Config) -> Config) {
        assert!(self.server.is_none(), "configure before starting");
        self.config = adjust(self.config.clone());
    }

    pub(crate) fn start(&mut self, queue: &str) {
        let server = Server::new(self.config.clone());
        let registered = server
            .register_queue(NamedQueue::new(queue))
            .expect("register queue");
        self.queues.insert(queue.to_owned(), registered);
        self.running = Some(server.start().expect("start server"));
        self.server = Some(server);
    }

    pub(crate) fn server(&self) -> &Server {
        self.server.as_ref().expect("server started")
    }

    pub(crate) fn client(&mut self) -> &mut TcpStream {
        if self.client.is_none() {
            let address = self
                .running
                .as_ref()
                .expect("server running")
                .local_addr();
            self.client = Some(connect(address));
        }
        self.client.as_mut().expect("client connected")
    }

    pub(crate) fn send(&mut self, bytes: &[u8]) {
        self.client().write_all(bytes).expect("send bytes");
    }

    pub(crate) fn reply(&mut self) -> ReplyFrame {
        read_reply(self.client())
    }

    pub(crate) fn next_entry(&self, queue: &str) -> QueueEntry {
        self.queues
            .get(queue)
            .expect("queue registered")
            .pop_timeout(WAIT)
            .expect("queued entry")
    }

    pub(crate) fn queue_len(&self, queue: &str) -> usize {
        self.queues.get(queue).expect("queue registered").len()
    }

    /// Sends a login request and joins `user` from the queued entry, as a
    /// worker would.
    pub(crate) fn log_in(&mut self, queue: &str, user: &str) {
        let frame = FrameBuilder::new(queue).id(LOGIN_REQUEST_ID).frame();
        self.send(&frame);
        let entry = self.next_entry(queue);
        self.server()
            .sessions()
            .join(user, entry.request(), JoinOptions::default())
            .expect("join session");
        entry
            .request()
            .reply_short(ReplyCode::OK)
            .expect("login reply");
        let reply = self.reply();
        assert!(matches!(reply, ReplyFrame::Short { code: ReplyCode::OK, .. }));
        self.login = Some(entry);
    }

    pub(crate) fn login_entry(&self) -> &QueueEntry {
        self.login.as_ref().expect("logged in")
    }

    pub(crate) fn drop_client(&mut self) {
        self.client = None;
    }

    pub(crate) fn shutdown(&mut self) {
        let running = self.running.take().expect("server running");
        self.retired = Some(running.shutdown().expect("clean shutdown"));
    }

    pub(crate) fn retired(&self) -> usize {
        self.retired.expect("server shut down")
    }

    /// Polls until `user` has no session or the wait expires.
    pub(crate) fn wait_logged_out(&self, user: &str) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if self.server().sessions().find(user).is_none() {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        false
    }
}

impl Drop for ServerWorld {
    fn drop(&mut self) {
        self.client = None;
        if let Some(running) = self.running.take() {
            drop(running.shutdown());
        }
    }
}
