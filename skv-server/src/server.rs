//! # TCP Server
//!
//! Host-side event loop that drives `skv-core` over a plain inline-protocol
//! TCP socket. `skv-core` explicitly keeps the io_uring/TLS event loop out
//! of scope (see the workspace design notes) — this is the minimal
//! `tokio`-based stand-in the teacher workspace already uses for its own
//! RESP dialect, adapted to line framing and to the single-owner actor
//! model the core's concurrency notes require.
//!
//! One actor task owns the `KeyspaceStore`; every connection task only ever
//! talks to it over an `mpsc` channel, so the store itself is touched from
//! exactly one place and needs no locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use skv_common::Config;
use skv_core::{ConnId, Dispatcher, KeyspaceStore, Response};

use crate::metrics::Metrics;

/// Work items the connection-actor processes one at a time, in arrival
/// order, matching the workspace's "commands execute in arrival order"
/// ordering guarantee.
enum ActorMsg {
    Connect {
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        reply: oneshot::Sender<ConnId>,
    },
    Line {
        conn: ConnId,
        line: Vec<u8>,
        reply: oneshot::Sender<Vec<u8>>,
    },
    Disconnect {
        conn: ConnId,
    },
    Sweep,
}

/// Handle used by connection tasks and the accept loop to reach the actor.
#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::UnboundedSender<ActorMsg>,
}

impl ActorHandle {
    async fn connect(&self, outbound: mpsc::UnboundedSender<Vec<u8>>) -> ConnId {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ActorMsg::Connect { outbound, reply });
        rx.await.expect("actor task is alive for the life of the server")
    }

    async fn send_line(&self, conn: ConnId, line: Vec<u8>) -> Vec<u8> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(ActorMsg::Line { conn, line, reply });
        rx.await.unwrap_or_default()
    }

    fn disconnect(&self, conn: ConnId) {
        let _ = self.tx.send(ActorMsg::Disconnect { conn });
    }

    fn sweep(&self) {
        let _ = self.tx.send(ActorMsg::Sweep);
    }
}

/// The single owner of the keyspace store. Runs on its own task; every
/// other task only ever reaches it through `ActorHandle`.
struct Actor {
    store: KeyspaceStore,
    outboxes: HashMap<ConnId, mpsc::UnboundedSender<Vec<u8>>>,
    next_conn: ConnId,
    metrics: Arc<Metrics>,
}

impl Actor {
    fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Actor {
            store: KeyspaceStore::new(config),
            outboxes: HashMap::new(),
            next_conn: 1,
            metrics,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                ActorMsg::Connect { outbound, reply } => {
                    let conn = self.next_conn;
                    self.next_conn += 1;
                    self.outboxes.insert(conn, outbound);
                    let _ = reply.send(conn);
                    tracing::info!(conn, "connection accepted");
                }
                ActorMsg::Line { conn, line, reply } => {
                    let started = Instant::now();
                    self.metrics.record_request_start();

                    let mut dispatcher = Dispatcher::new(conn);
                    let outcome = dispatcher.handle_line(&mut self.store, &line);
                    let bytes = match outcome {
                        Some((response, publish)) => {
                            if let Response::Error(_) = &response {
                                self.metrics.record_error();
                            }
                            if let Some(publish) = publish {
                                self.fan_out(publish);
                            }
                            response.into_bytes()
                        }
                        None => Vec::new(),
                    };

                    self.metrics.record_request_end(started.elapsed());
                    let _ = reply.send(bytes);
                }
                ActorMsg::Disconnect { conn } => {
                    self.outboxes.remove(&conn);
                    Dispatcher::new(conn).on_disconnect(&mut self.store);
                    tracing::info!(conn, "connection closed");
                }
                ActorMsg::Sweep => {
                    let expired = self.store.sweep_expired();
                    if !expired.is_empty() {
                        tracing::debug!(count = expired.len(), "swept expired keys");
                    }
                }
            }
        }
    }

    /// Delivers a `PUBLISH` fan-out directly to every subscriber's outbound
    /// channel, per the core's "the host writes bytes to each" contract.
    /// Per-subscriber ordering matches publish order because each outbox is
    /// an unbounded FIFO channel drained by exactly one writer task.
    fn fan_out(&self, publish: skv_core::Publish) {
        let mut line = Vec::with_capacity(publish.channel.len() + publish.message.len() + 2);
        line.extend_from_slice(&publish.channel);
        line.push(b' ');
        line.extend_from_slice(&publish.message);
        line.push(b'\n');

        for conn in publish.subscribers {
            if let Some(outbox) = self.outboxes.get(&conn) {
                let _ = outbox.send(line.clone());
            }
        }
    }
}

/// Spawns the connection-actor task and returns a handle to it.
pub fn spawn_actor(config: &Config, metrics: Arc<Metrics>) -> ActorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = Actor::new(config, metrics);
    tokio::spawn(actor.run(rx));
    ActorHandle { tx }
}

/// Drives `sweep_expired` on a fixed interval, matching the core's
/// "optionally provide a periodic tick" host contract.
pub fn spawn_sweeper(handle: ActorHandle, interval: Duration) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            handle.sweep();
        }
    });
}

/// Runs the accept loop until the listener errors out or is closed. Each
/// accepted connection gets its own outbound queue and two tasks: the
/// caller's read loop (via [`handle_connection`]) and a writer loop that
/// drains the outbox (request replies and async `PUBLISH` pushes share the
/// same outbound stream, each line self-delimited by `\n`).
pub async fn accept_loop(listener: TcpListener, actor: ActorHandle) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let actor = actor.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, actor).await {
                tracing::warn!(%peer, error = %err, "connection ended with an error");
            }
        });
    }
}

/// Handles one accepted connection: registers it with the actor, then runs
/// the line-reader loop and the outbox-writer task concurrently until
/// either the peer closes or the write side errors.
///
/// Request replies and asynchronous `PUBLISH` pushes both funnel through
/// the same outbound channel, drained by one writer task, so the two kinds
/// of output can never interleave mid-line on the wire.
async fn handle_connection(stream: TcpStream, actor: ActorHandle) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let conn = actor.connect(outbound_tx.clone()).await;

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut raw_line = Vec::new();
    loop {
        raw_line.clear();
        let read = reader.read_until(b'\n', &mut raw_line).await?;
        if read == 0 {
            break;
        }
        let line = strip_trailing_newline(&raw_line);
        let response = actor.send_line(conn, line.to_vec()).await;
        if !response.is_empty() && outbound_tx.send(response).is_err() {
            break;
        }
    }

    actor.disconnect(conn);
    writer_task.abort();
    Ok(())
}

fn strip_trailing_newline(buf: &[u8]) -> &[u8] {
    match buf.last() {
        Some(b'\n') => &buf[..buf.len() - 1],
        _ => buf,
    }
}
