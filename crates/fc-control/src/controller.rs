//! Controller
//!
//! Command-socket front end of the engine: accepts stream connections,
//! reads length-delimited JSON envelopes, routes them through the pipeline
//! manager and writes the reply envelope back. One connection is served at
//! a time, matching the engine's serialised control plane. The accept loop
//! ends when the engine processes a `stop` action or when the embedder
//! signals the stop handle.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use serde_json::json;

use fc_engine::Engine;

use crate::envelope::{read_envelope, write_envelope};
use crate::error::{ControlError, ControlResult};

/// How long the accept loop sleeps between polls.
const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Per-connection read timeout; an idle peer does not wedge shutdown.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Controller {
    engine: Arc<Engine>,
    listener: TcpListener,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
}

impl Controller {
    /// Bind the command socket. Failure here is fatal for the daemon.
    pub fn bind<A: ToSocketAddrs>(engine: Arc<Engine>, addr: A) -> ControlResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let (stop_tx, stop_rx) = bounded(1);
        log::info!("control socket listening on {}", listener.local_addr()?);
        Ok(Self { engine, listener, stop_tx, stop_rx })
    }

    pub fn local_addr(&self) -> ControlResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for unblocking `run` from another thread.
    pub fn stop_handle(&self) -> Sender<()> {
        self.stop_tx.clone()
    }

    /// Serve until the engine stops or the stop handle fires.
    pub fn run(&self) -> ControlResult<()> {
        loop {
            if self.engine.is_stopped() {
                log::info!("engine stopped, closing control socket");
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("control connection from {peer}");
                    if let Err(err) = self.serve_connection(stream) {
                        log::warn!("control connection from {peer} ended: {err}");
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if self.stop_rx.recv_timeout(ACCEPT_POLL).is_ok() {
                        log::info!("controller stop requested");
                        return Ok(());
                    }
                }
                Err(err) => return Err(ControlError::Io(err)),
            }
        }
    }

    /// Serve envelopes on one connection until the peer hangs up or the
    /// engine stops. Parse failures get an error reply; the frame is
    /// already consumed so the connection keeps going.
    fn serve_connection(&self, mut stream: TcpStream) -> ControlResult<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        loop {
            match read_envelope(&mut stream) {
                Ok(envelope) => {
                    let reply = self.engine.process_event(&envelope);
                    write_envelope(&mut stream, &reply)?;
                    if self.engine.is_stopped() {
                        return Ok(());
                    }
                }
                Err(ControlError::Parse(err)) => {
                    write_envelope(&mut stream, &json!({ "error": format!("bad envelope: {err}") }))?;
                }
                Err(ControlError::Io(err))
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    if self.engine.is_stopped() {
                        return Ok(());
                    }
                }
                Err(ControlError::Io(err)) if err.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }
}
