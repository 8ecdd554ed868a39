//! Background transport listener.
//!
//! Receives raw payloads on a dedicated thread and publishes each one into
//! the [`Mailbox`]. The thread runs a current-thread tokio runtime so every
//! blocking receive is raced against a [`CancellationToken`]; stopping the
//! listener never needs to abort the thread.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{TransportConfig, TransportKind};
use crate::error::{Error, Result};
use crate::mailbox::Mailbox;
use crate::protocol::{LegacyFrameCodec, MAX_DATAGRAM_SIZE, PING};

/// Backoff after an unexpected receive error so a persistent fault does not spin.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Idle → Binding → Listening → Draining → Closed. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Binding,
    Listening,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Thread observed the stop signal and was joined
    Joined,
    /// Thread did not exit within the join timeout and was detached
    TimedOut,
    /// Never started; nothing to drain
    NotStarted,
    /// A previous stop already closed the listener
    AlreadyClosed,
}

enum BoundTransport {
    Datagram(std::net::UdpSocket),
    Stream(std::net::TcpListener),
}

struct Worker {
    handle: thread::JoinHandle<()>,
    // Disconnects when the thread exits, which gives join a timeout.
    exited: mpsc::Receiver<()>,
}

pub struct Listener {
    config: TransportConfig,
    mailbox: Mailbox,
    state: ListenerState,
    cancel: CancellationToken,
    worker: Option<Worker>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    pub fn new(config: TransportConfig, mailbox: Mailbox) -> Self {
        Self {
            config,
            mailbox,
            state: ListenerState::Idle,
            cancel: CancellationToken::new(),
            worker: None,
            local_addr: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Address actually bound; differs from the config when port 0 is used.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Bind the transport and spawn the receive thread.
    ///
    /// Bind failures are returned here and leave the listener Closed.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.state != ListenerState::Idle {
            return Err(Error::InvalidState(self.state));
        }
        self.transition(ListenerState::Binding);

        match self.spawn() {
            Ok(addr) => {
                self.local_addr = Some(addr);
                self.transition(ListenerState::Listening);
                info!(kind = ?self.config.kind, %addr, "listening");
                Ok(addr)
            }
            Err(e) => {
                self.transition(ListenerState::Closed);
                Err(e)
            }
        }
    }

    fn spawn(&mut self) -> Result<SocketAddr> {
        let addr = self.config.bind_addr()?;
        let (transport, local_addr) = match self.config.kind {
            TransportKind::Udp => {
                let socket = std::net::UdpSocket::bind(addr).map_err(|e| Error::bind(addr, e))?;
                socket.set_nonblocking(true)?;
                let local = socket.local_addr()?;
                (BoundTransport::Datagram(socket), local)
            }
            TransportKind::Stream => {
                let listener =
                    std::net::TcpListener::bind(addr).map_err(|e| Error::bind(addr, e))?;
                listener.set_nonblocking(true)?;
                let local = listener.local_addr()?;
                (BoundTransport::Stream(listener), local)
            }
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let mailbox = self.mailbox.clone();
        let cancel = self.cancel.clone();
        let recv_timeout = self.config.recv_timeout();
        let max_frame_length = self.config.max_frame_length;
        let (exited_tx, exited_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("landmark-listener".to_string())
            .spawn(move || {
                let _exited = exited_tx;
                runtime.block_on(async move {
                    match transport {
                        BoundTransport::Datagram(socket) => {
                            run_datagram(socket, mailbox, cancel, recv_timeout).await
                        }
                        BoundTransport::Stream(listener) => {
                            run_stream(listener, mailbox, cancel, recv_timeout, max_frame_length)
                                .await
                        }
                    }
                });
                debug!("listener thread exiting");
            })?;

        self.worker = Some(Worker {
            handle,
            exited: exited_rx,
        });
        Ok(local_addr)
    }

    /// Signal the receive loop to stop, wait up to the join timeout, and
    /// release the transport. Safe to call more than once.
    pub fn stop(&mut self) -> StopOutcome {
        match self.state {
            ListenerState::Closed => return StopOutcome::AlreadyClosed,
            ListenerState::Idle => {
                self.transition(ListenerState::Closed);
                return StopOutcome::NotStarted;
            }
            _ => {}
        }

        self.transition(ListenerState::Draining);
        self.cancel.cancel();

        let outcome = match self.worker.take() {
            Some(worker) => {
                let timeout = self.config.join_timeout();
                match worker.exited.recv_timeout(timeout) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "listener thread did not exit in time, detaching"
                        );
                        StopOutcome::TimedOut
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                        if worker.handle.join().is_err() {
                            warn!("listener thread panicked");
                        }
                        StopOutcome::Joined
                    }
                }
            }
            None => StopOutcome::Joined,
        };

        self.local_addr = None;
        self.transition(ListenerState::Closed);
        info!(?outcome, "listener closed");
        outcome
    }

    fn transition(&mut self, next: ListenerState) {
        debug!(from = ?self.state, to = ?next, "listener state");
        self.state = next;
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_closed(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(e.kind(), NotConnected | ConnectionAborted | BrokenPipe)
}

async fn run_datagram(
    socket: std::net::UdpSocket,
    mailbox: Mailbox,
    cancel: CancellationToken,
    recv_timeout: Duration,
) {
    let socket = match tokio::net::UdpSocket::from_std(socket) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to register socket");
            return;
        }
    };
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    debug!("datagram loop started");

    while !cancel.is_cancelled() {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)) => r,
        };

        match received {
            // timeout: re-check the stop signal
            Err(_) => continue,
            Ok(Ok((0, _))) => continue,
            Ok(Ok((len, from))) => {
                let payload = String::from_utf8_lossy(&buf[..len]).into_owned();
                if payload.trim() == PING {
                    trace!(%from, "ping");
                    continue;
                }
                trace!(%from, len, "payload");
                mailbox.publish(payload);
            }
            Ok(Err(e)) if cancel.is_cancelled() || is_closed(&e) => {
                debug!(error = %e, "socket closed");
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "receive failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
    debug!("datagram loop exiting");
}

async fn run_stream(
    listener: std::net::TcpListener,
    mailbox: Mailbox,
    cancel: CancellationToken,
    recv_timeout: Duration,
    max_frame_length: usize,
) {
    let listener = match tokio::net::TcpListener::from_std(listener) {
        Ok(l) => l,
        Err(e) => {
            warn!(error = %e, "failed to register listener");
            return;
        }
    };
    debug!("stream loop started");

    'accept: while !cancel.is_cancelled() {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(recv_timeout, listener.accept()) => r,
        };
        let (stream, peer) = match accepted {
            Err(_) => continue,
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ERROR_BACKOFF).await;
                continue;
            }
        };
        info!(%peer, "producer connected");

        let mut frames = Framed::new(stream, LegacyFrameCodec::new(max_frame_length));
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'accept,
                r = tokio::time::timeout(recv_timeout, frames.next()) => r,
            };
            match next {
                Err(_) => continue,
                Ok(None) => {
                    info!(%peer, "producer disconnected");
                    break;
                }
                Ok(Some(Ok(payload))) if payload.trim() == PING => trace!(%peer, "ping"),
                Ok(Some(Ok(payload))) => mailbox.publish(payload),
                Ok(Some(Err(e))) if is_closed(&e) => {
                    debug!(%peer, error = %e, "stream closed");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(%peer, error = %e, "dropping connection");
                    break;
                }
            }
        }
    }
    debug!("stream loop exiting");
}
