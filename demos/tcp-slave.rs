// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # TCP slave example
//!
//! Starts a slave with unit id 2 that owns 124 holding registers and a
//! custom function, then talks to it with hand-made MBAP frames.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    net::TcpStream,
};

use tokio_modbus_slave::{
    bytes::Bytes,
    prelude::{tcp::*, *},
};

/// Returns the number of holding registers that are not zero.
struct CountNonZero;

impl CustomFunction for CountNonZero {
    fn function_code(&self) -> u8 {
        0x41
    }

    fn call(
        &self,
        slave: &mut SlaveContext,
        _data: &[u8],
    ) -> Result<Option<Response>, ExecuteError> {
        let count = slave
            .holding_registers()
            .values()
            .iter()
            .filter(|value| **value != 0)
            .count();
        let count = u16::try_from(count).unwrap_or(u16::MAX);
        Ok(Some(Response::Custom(
            self.function_code(),
            Bytes::copy_from_slice(&count.to_be_bytes()),
        )))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let socket_addr = "127.0.0.1:5502".parse()?;

    tokio::select! {
        res = server_context(socket_addr) => res?,
        res = client_context(socket_addr) => res?,
    }

    Ok(())
}

async fn server_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    println!("Starting up slave on {socket_addr}");
    let slave = SlaveContext::new().with_holding_registers(RegisterBank::with_len(0, 124));
    let context = ServerContext::multi([(2, slave)])?;
    let functions = FunctionRegistry::new().register(CountNonZero)?;
    let server = Server::new(bind_listener(socket_addr)?, Arc::new(context))
        .functions(functions)
        .read_timeout(Some(Duration::from_secs(1)));
    server.serve().await?;
    Ok(())
}

async fn transact(stream: &mut TcpStream, request: &[u8]) -> anyhow::Result<Vec<u8>> {
    stream.write_all(request).await?;
    let mut header = [0; 7];
    stream.read_exact(&mut header).await?;
    let len = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let mut pdu = vec![0; len - 1];
    stream.read_exact(&mut pdu).await?;
    Ok(pdu)
}

async fn client_context(socket_addr: SocketAddr) -> anyhow::Result<()> {
    // Give the slave some time for starting up
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("MASTER: Connecting...");
    let mut stream = TcpStream::connect(socket_addr).await?;

    println!("MASTER: Writing 5 to holding register 10...");
    let pdu = transact(
        &mut stream,
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x02, 0x06, 0x00, 0x0A, 0x00, 0x05],
    )
    .await?;
    println!("MASTER: The response is {pdu:02X?}");

    println!("MASTER: Reading holding register 10...");
    let pdu = transact(
        &mut stream,
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x00, 0x0A, 0x00, 0x01],
    )
    .await?;
    println!("MASTER: The response is {pdu:02X?}");
    assert_eq!(pdu, [0x03, 0x02, 0x00, 0x05]);

    println!("MASTER: Counting non-zero holding registers...");
    let pdu = transact(
        &mut stream,
        &[0x00, 0x03, 0x00, 0x00, 0x00, 0x02, 0x02, 0x41],
    )
    .await?;
    println!("MASTER: The response is {pdu:02X?}");
    assert_eq!(pdu, [0x41, 0x00, 0x01]);

    println!("MASTER: Reading a nonexisting holding register... (should return IllegalDataAddress)");
    let pdu = transact(
        &mut stream,
        &[0x00, 0x04, 0x00, 0x00, 0x00, 0x06, 0x02, 0x03, 0x01, 0x00, 0x00, 0x01],
    )
    .await?;
    println!("MASTER: The response is {pdu:02X?}");
    assert_eq!(pdu, [0x83, 0x02]);

    println!("MASTER: Done.");
    Ok(())
}
