//! ZMQ subscription to the daemon's `hashblock` and `rawtx` publishers.
//!
//! The socket is connected as soon as a node becomes reachable, but topics
//! are only subscribed once the node is ready to deliver events. A native
//! thread reads the socket and forwards messages to an async channel.

use std::sync::{Mutex, MutexGuard};
use std::thread;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::CoreError;

/// Receive timeout so the reader thread notices cancellation.
const RECV_TIMEOUT_MS: i32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZmqTopic {
    HashBlock,
    RawTx,
}

impl ZmqTopic {
    pub fn from_bytes(topic: &[u8]) -> Option<Self> {
        match topic {
            b"hashblock" => Some(Self::HashBlock),
            b"rawtx" => Some(Self::RawTx),
            _ => None,
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::HashBlock => b"hashblock",
            Self::RawTx => b"rawtx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmqMessage {
    pub topic: ZmqTopic,
    pub payload: Vec<u8>,
}

impl ZmqMessage {
    /// `[topic, payload, sequence]` frames. Unknown topics and short messages
    /// yield `None`.
    pub fn from_multipart(mut frames: Vec<Vec<u8>>) -> Option<Self> {
        if frames.len() < 2 {
            return None;
        }
        let topic = ZmqTopic::from_bytes(&frames[0])?;
        let payload = frames.swap_remove(1);
        Some(Self { topic, payload })
    }
}

/// A connected SUB socket, subscribed at most once.
pub struct ZmqFeed {
    url: String,
    socket: Mutex<Option<zmq::Socket>>,
    cancel: CancellationToken,
}

impl ZmqFeed {
    pub fn connect(url: &str) -> Result<Self, CoreError> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::SUB)?;
        socket.set_rcvhwm(0)?;
        socket.set_rcvtimeo(RECV_TIMEOUT_MS)?;
        socket.set_linger(0)?;
        socket.connect(url)?;
        info!(zmq.url = url, "zmq socket connected");

        Ok(Self {
            url: url.to_owned(),
            socket: Mutex::new(Some(socket)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subscribe to both topics and start the reader thread. Returns `None`
    /// if the feed was already subscribed or closed.
    pub fn subscribe(&self) -> Result<Option<UnboundedReceiver<ZmqMessage>>, CoreError> {
        let Some(socket) = lock(&self.socket).take() else {
            return Ok(None);
        };
        socket.set_subscribe(ZmqTopic::HashBlock.as_bytes())?;
        socket.set_subscribe(ZmqTopic::RawTx.as_bytes())?;
        info!(zmq.url = %self.url, "subscribed to zmq hashblock and rawtx");

        let (tx, rx) = mpsc::unbounded_channel();
        run_reader(socket, self.url.clone(), self.cancel.clone(), tx);
        Ok(Some(rx))
    }

    /// Stop the reader thread and drop an unsubscribed socket.
    pub fn close(&self) {
        self.cancel.cancel();
        lock(&self.socket).take();
    }
}

impl Drop for ZmqFeed {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn run_reader(
    socket: zmq::Socket,
    url: String,
    cancel: CancellationToken,
    tx: UnboundedSender<ZmqMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if cancel.is_cancelled() {
            debug!(zmq.url = %url, "zmq reader stopped");
            break;
        }

        match socket.recv_multipart(0) {
            Ok(frames) => {
                let Some(message) = ZmqMessage::from_multipart(frames) else {
                    continue;
                };
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                error!(zmq.url = %url, error = %e, "zmq receive failed");
                break;
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
