// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request/response loop of a single connection.

use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _},
    time,
};

use crate::{codec::Framer, ResponseAdu};

use super::{ConnectionId, ConnectionRegistry, Registration, RequestDispatcher};

/// Maximum number of bytes received at once.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// A connection of a master to the slave.
///
/// Owns the transport and a [`Framer`] that is exclusively used for this
/// connection. The connection is registered until it is finished or
/// dropped.
#[derive(Debug)]
pub struct Connection<T, F> {
    transport: T,
    framer: F,
    dispatcher: RequestDispatcher,
    peer: Option<SocketAddr>,
    running: Arc<AtomicBool>,
    read_timeout: Option<Duration>,
    registration: Option<Registration>,
}

impl<T, F> Connection<T, F>
where
    T: AsyncRead + AsyncWrite + Unpin,
    F: Framer,
{
    /// Sets up a running connection and adds it to `registry`.
    #[must_use]
    pub fn setup(
        transport: T,
        peer: Option<SocketAddr>,
        framer: F,
        dispatcher: RequestDispatcher,
        registry: &Arc<ConnectionRegistry>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let registration = registry.register(peer, Arc::clone(&running));
        Self {
            transport,
            framer,
            dispatcher,
            peer,
            running,
            read_timeout: None,
            registration: Some(registration),
        }
    }

    /// Limit the time to wait for incoming data.
    ///
    /// An elapsed timeout discards partially received requests. Without a
    /// timeout a stop request is only noticed when data arrives.
    #[must_use]
    pub fn read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// The id of the registration, `None` after [`finish()`](Self::finish).
    #[must_use]
    pub fn id(&self) -> Option<ConnectionId> {
        self.registration.as_ref().map(Registration::id)
    }

    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Requests the loop to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(read_timeout) = self.read_timeout else {
            return self.transport.read(buf).await;
        };
        time::timeout(read_timeout, self.transport.read(buf))
            .await
            .map_err(|_| io::Error::new(ErrorKind::TimedOut, "read timeout elapsed"))?
    }

    /// Receives, executes and answers requests until the connection is
    /// closed or stopped.
    pub async fn handle(&mut self) {
        let mut buf = [0; RECV_BUFFER_SIZE];
        while self.is_running() {
            let len = match self.recv(&mut buf).await {
                Ok(0) => {
                    debug!("Connection closed by {:?}", self.peer);
                    self.stop();
                    break;
                }
                Ok(len) => len,
                Err(err) if err.kind() == ErrorKind::TimedOut => {
                    trace!("Read timeout, discarding partial requests");
                    self.framer.reset_frame();
                    continue;
                }
                Err(err) => {
                    error!("Failed to receive from {:?}: {err}", self.peer);
                    self.stop();
                    break;
                }
            };
            trace!("Received {len} byte(s) from {:?}", self.peer);

            let context = self.dispatcher.context();
            let units = context.target_unit_ids();
            let single = context.is_single();
            let dispatcher = &self.dispatcher;
            let mut responses = Vec::new();
            let processed =
                self.framer
                    .process_incoming_packet(&buf[..len], &units, single, &mut |frame| {
                        if let Some(response) = dispatcher.dispatch(&frame) {
                            responses.push(response);
                        }
                    });

            for response in &responses {
                if let Err(err) = self.send(response).await {
                    error!("Failed to respond to {:?}: {err}", self.peer);
                    self.stop();
                    return;
                }
            }

            if let Err(err) = processed {
                warn!("Closing connection to {:?}: {err}", self.peer);
                self.stop();
                self.framer.reset_frame();
            }
        }
    }

    /// Stops the connection and removes it from the registry.
    pub fn finish(&mut self) {
        self.stop();
        if self.registration.take().is_some() {
            debug!("Connection to {:?} finished", self.peer);
        }
    }

    /// Encodes and writes a response.
    ///
    /// Returns the number of bytes written, `0` if the response is withheld.
    pub async fn send(&mut self, response: &ResponseAdu) -> io::Result<usize> {
        if !response.should_respond() {
            debug!("No response for request {:?}", response.hdr);
            return Ok(0);
        }
        let packet = self.framer.build_packet(response)?;
        trace!("Sending {:02X?}", &packet[..]);
        self.transport.write_all(&packet).await?;
        self.transport.flush().await?;
        Ok(packet.len())
    }

    /// Handles the connection until it ends and finishes it.
    pub async fn run(mut self) {
        self.handle().await;
        self.finish();
    }
}
