//! Test harness helpers for the adjustkit workspace
//!
//! [`FakeDevice`] stands in for the adjusting kit behind the gateway: a
//! loopback TCP server that slices command frames the same way the real
//! firmware does and answers according to a script.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use adjustkit_locator::proto::{command_id, frame_len, CommandEncoder};

/// How the fake device answers inbound commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceScript {
    /// Behave like a healthy kit: ack writes by echo, answer telemetry
    /// reads with canned data, ack the keepalive, say nothing to a
    /// restart.
    Emulate,
    /// Answer nothing at all.
    Silent,
    /// Garble the first answer, then behave like `Emulate`.
    GarbageOnce,
    /// Drop the connection as soon as a frame arrives, then accept
    /// again.
    HangUp,
}

/// A scripted adjusting kit on an ephemeral loopback port.
pub struct FakeDevice {
    pub port: u16,
}

impl FakeDevice {
    pub async fn spawn(script: DeviceScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake device");
        let port = listener.local_addr().expect("local addr").port();
        tokio::spawn(serve(listener, script));
        Self { port }
    }
}

async fn serve(listener: TcpListener, script: DeviceScript) {
    let mut garbled = false;
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut buf = BytesMut::with_capacity(256);
        let mut chunk = [0u8; 256];
        'conn: loop {
            let n = match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break 'conn,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            while let Some(frame) = next_frame(&mut buf) {
                match script {
                    DeviceScript::Silent => {}
                    DeviceScript::HangUp => break 'conn,
                    DeviceScript::GarbageOnce if !garbled => {
                        garbled = true;
                        if socket.write_all(&[0xEE, 0xEE]).await.is_err() {
                            break 'conn;
                        }
                    }
                    DeviceScript::Emulate | DeviceScript::GarbageOnce => {
                        if let Some(reply) = answer(&frame) {
                            if socket.write_all(&reply).await.is_err() {
                                break 'conn;
                            }
                        }
                    }
                }
            }
        }
    }
}

fn next_frame(buf: &mut BytesMut) -> Option<Bytes> {
    let id = *buf.first()?;
    let len = frame_len(id)?;
    if buf.len() < len {
        return None;
    }
    Some(buf.split_to(len).freeze())
}

/// What a healthy kit answers to each command.
fn answer(frame: &Bytes) -> Option<Vec<u8>> {
    let enc = CommandEncoder::new(30_250_000.0, 40_000_000.0);
    let reply = match frame[0] {
        command_id::ZERO => Bytes::from_static(&[0x00]),
        command_id::RESTART => return None,
        command_id::SEVEN => match frame[1] {
            1 => enc.first_command(30_300_000.0),
            2 => enc.second_command(30_300_000.0, 1000.0),
            3 => enc.third_command(500.0, 68.0),
            4 => enc.fourth_command(15.5, 20.0),
            5 => enc.five_command(12.5),
            _ => enc.six_command(2, 0.0),
        },
        // Writes are acked by echo
        _ => frame.clone(),
    };
    Some(reply.to_vec())
}
