// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server skeleton

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use futures_util::future::{select, Either};
use log::{debug, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::{codec::tcp::TcpFramer, register::Inspection, store::ServerContext};

use super::{Connection, ConnectionRegistry, FunctionRegistry, RequestDispatcher, Terminated};

/// Open a TCP listener for `addr`.
///
/// Must be called from within a tokio runtime.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

/// A Modbus TCP slave that serves every accepted connection in its own task.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    context: Arc<ServerContext>,
    functions: Arc<FunctionRegistry>,
    read_timeout: Option<Duration>,
    inspection: Inspection,
    unit_filter: bool,
    registry: Arc<ConnectionRegistry>,
}

impl Server {
    /// Attach the server to a TCP listener.
    #[must_use]
    pub fn new(listener: TcpListener, context: Arc<ServerContext>) -> Self {
        Self {
            listener,
            context,
            functions: Arc::default(),
            read_timeout: None,
            inspection: Inspection::default(),
            unit_filter: false,
            registry: Arc::default(),
        }
    }

    /// Handle the function codes of `functions` as custom requests.
    #[must_use]
    pub fn functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    /// Limit the time each connection waits for incoming data.
    ///
    /// Connections notice a shutdown request only when data arrives or
    /// the timeout elapses.
    #[must_use]
    pub fn read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    #[must_use]
    pub fn inspection(mut self, inspection: Inspection) -> Self {
        self.inspection = inspection;
        self
    }

    /// Drop requests for unknown units while framing, see
    /// [`TcpFramer::unit_filter()`].
    #[must_use]
    pub fn unit_filter(mut self, unit_filter: bool) -> Self {
        self.unit_filter = unit_filter;
        self
    }

    /// The live connections of this server.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until accepting fails.
    pub async fn serve(&self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            self.spawn_connection(stream, peer);
        }
    }

    /// Accept connections until accepting fails or `abort_signal` resolves.
    ///
    /// All connections are asked to stop on abort.
    pub async fn serve_until<X>(&self, abort_signal: X) -> io::Result<Terminated>
    where
        X: Future<Output = ()> + Unpin,
    {
        let serve = Box::pin(self.serve());
        match select(serve, abort_signal).await {
            Either::Left((res, _)) => res.map(|()| Terminated::Finished),
            Either::Right(((), _)) => {
                trace!("Shutdown signal received");
                self.registry.shutdown_all();
                Ok(Terminated::Aborted)
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        debug!("Accepted connection from {peer}");
        if let Err(err) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle's algorithm for {peer}: {err}");
        }
        let dispatcher =
            RequestDispatcher::new(Arc::clone(&self.context), Arc::clone(&self.functions))
                .inspection(self.inspection);
        let framer = TcpFramer::new(Arc::clone(&self.functions)).unit_filter(self.unit_filter);
        let connection = Connection::setup(stream, Some(peer), framer, dispatcher, &self.registry)
            .read_timeout(self.read_timeout);
        tokio::spawn(connection.run());
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        time,
    };

    use crate::store::{RegisterBank, SlaveContext};

    use super::*;

    async fn server() -> Server {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap()).unwrap();
        let slave = SlaveContext::new().with_holding_registers(RegisterBank::with_len(0, 124));
        let context = ServerContext::multi([(2, slave)]).unwrap();
        Server::new(listener, Arc::new(context)).read_timeout(Some(Duration::from_millis(20)))
    }

    #[tokio::test]
    async fn abort_stops_connections() {
        let server = Arc::new(server().await);
        let addr = server.local_addr().unwrap();
        let (abort_tx, abort_rx) = futures::channel::oneshot::channel::<()>();

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let abort = Box::pin(async move {
                    let _ = abort_rx.await;
                });
                server.serve_until(abort).await
            })
        };

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&[
                0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x06, 0x00, 0x0A, 0x00, 0x05,
            ])
            .await
            .unwrap();
        let mut rsp = [0; 12];
        stream.read_exact(&mut rsp).await.unwrap();
        assert_eq!(rsp[7], 0x06);
        assert_eq!(server.registry().len(), 1);

        abort_tx.send(()).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), Terminated::Aborted);

        let mut buf = Vec::new();
        time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf.is_empty());
        assert!(server.registry().is_empty());
        assert_eq!(
            server
                .context()
                .with_slave(2, |slave| slave.holding_registers().get(10))
                .unwrap()
                .unwrap(),
            5
        );
    }
}
