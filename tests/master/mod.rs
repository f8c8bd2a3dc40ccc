// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A minimal Modbus TCP master that exchanges raw PDUs.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
    task::JoinHandle,
    time,
};

use tokio_modbus_slave::{
    server::tcp::{bind_listener, Server},
    store::ServerContext,
};

/// Spawns a server on an ephemeral port of the loopback interface.
pub fn start(
    context: ServerContext,
    configure: impl FnOnce(Server) -> Server,
) -> io::Result<(Arc<Server>, SocketAddr, JoinHandle<io::Result<()>>)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = bind_listener("127.0.0.1:0".parse().unwrap())?;
    let server = Arc::new(configure(Server::new(listener, Arc::new(context))));
    let addr = server.local_addr()?;
    let task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve().await })
    };
    Ok((server, addr, task))
}

pub struct Master {
    stream: TcpStream,
    transaction_id: u16,
}

impl Master {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            transaction_id: 0,
        })
    }

    pub fn frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
        let len = u16::try_from(pdu.len() + 1).unwrap();
        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.extend_from_slice(&transaction_id.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&len.to_be_bytes());
        frame.push(unit_id);
        frame.extend_from_slice(pdu);
        frame
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Sends a request and returns its transaction id.
    pub async fn send(&mut self, unit_id: u8, pdu: &[u8]) -> io::Result<u16> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        let frame = Self::frame(self.transaction_id, unit_id, pdu);
        self.write_raw(&frame).await?;
        Ok(self.transaction_id)
    }

    /// Receives a response as `(transaction_id, unit_id, pdu)`.
    pub async fn recv(&mut self) -> io::Result<(u16, u8, Vec<u8>)> {
        let mut header = [0; 7];
        self.stream.read_exact(&mut header).await?;
        assert_eq!(&header[2..4], &[0, 0], "protocol identifier");
        let len = u16::from_be_bytes([header[4], header[5]]);
        let mut pdu = vec![0; usize::from(len) - 1];
        self.stream.read_exact(&mut pdu).await?;
        Ok((
            u16::from_be_bytes([header[0], header[1]]),
            header[6],
            pdu,
        ))
    }

    pub async fn transact(&mut self, unit_id: u8, pdu: &[u8]) -> io::Result<Vec<u8>> {
        let transaction_id = self.send(unit_id, pdu).await?;
        let (rsp_transaction_id, rsp_unit_id, rsp_pdu) =
            time::timeout(Duration::from_secs(5), self.recv()).await??;
        assert_eq!(rsp_transaction_id, transaction_id);
        assert_eq!(rsp_unit_id, unit_id);
        Ok(rsp_pdu)
    }

    /// Fails if any byte arrives within `duration`.
    pub async fn expect_silence(&mut self, duration: Duration) {
        let mut buf = [0; 1];
        match time::timeout(duration, self.stream.read(&mut buf)).await {
            Err(_) => {}
            Ok(res) => panic!("Unexpected data from server: {res:?}"),
        }
    }

    /// Waits until the server closes the connection.
    pub async fn expect_closed(&mut self, duration: Duration) {
        let mut buf = Vec::new();
        let res = time::timeout(duration, self.stream.read_to_end(&mut buf))
            .await
            .expect("connection not closed");
        assert!(res.is_err() || buf.is_empty(), "unexpected data: {buf:?}");
    }
}
