// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CDC serial link to the coordinator module.
//!
//! The vendor framing is line-oriented ASCII with embedded binary payloads:
//! commands go out as `>` … CR, answers come back as `<` … CR. A data send
//! (`>DS` len payload CR) is acknowledged with `<DS:OK`, `<DS:ERR`, or
//! `<DS:BUSY`; the busy answer is what the channel retries. Unsolicited
//! `<DR` len payload CR lines carry received DPA frames. The open-time test
//! handshake is `>` CR answered by `<OK`.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::error::ChannelError;

use super::{ChannelLink, LinkEvent, SendOutcome};

/// How long to wait for a command acknowledgement.
const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Messages decoded from the device stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CdcMessage {
    TestOk,
    TestErr,
    SendOk,
    SendErr,
    SendBusy,
    /// A received DPA frame.
    Data(Vec<u8>),
    /// Unrecognized line, skipped.
    Other,
}

/// Incremental parse of one message from the front of `buf`.
/// Returns the message and the number of bytes consumed, or `None` when more
/// input is needed.
pub(crate) fn parse_cdc(buf: &[u8]) -> Option<(CdcMessage, usize)> {
    if buf.is_empty() {
        return None;
    }
    if buf[0] != b'<' {
        // Resync: drop garbage up to the next frame start.
        let skip = buf.iter().position(|&b| b == b'<').unwrap_or(buf.len());
        return Some((CdcMessage::Other, skip));
    }
    if buf.len() < 3 {
        return None;
    }
    if &buf[..3] == b"<DR" {
        let len = *buf.get(3)? as usize;
        let end = 4 + len;
        if buf.len() < end + 1 {
            return None;
        }
        if buf[end] != b'\r' {
            // Corrupt length byte; resync at the next frame start.
            return Some((CdcMessage::Other, 1));
        }
        return Some((CdcMessage::Data(buf[4..end].to_vec()), end + 1));
    }
    let cr = buf.iter().position(|&b| b == b'\r')?;
    let message = match &buf[..cr] {
        b"<OK" => CdcMessage::TestOk,
        b"<ERR" => CdcMessage::TestErr,
        b"<DS:OK" => CdcMessage::SendOk,
        b"<DS:ERR" => CdcMessage::SendErr,
        b"<DS:BUSY" => CdcMessage::SendBusy,
        _ => CdcMessage::Other,
    };
    Some((message, cr + 1))
}

/// Encode a data-send command.
pub(crate) fn encode_data_send(frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.len() + 5);
    out.extend_from_slice(b">DS");
    out.push(frame.len() as u8);
    out.extend_from_slice(frame);
    out.push(b'\r');
    out
}

enum CdcAck {
    TestOk,
    TestErr,
    SendOk,
    SendErr,
    SendBusy,
}

/// The link handed to [`Channel::open`](super::Channel::open) for serial
/// coordinators.
pub struct CdcLink {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    acks: Mutex<mpsc::UnboundedReceiver<CdcAck>>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
}

impl CdcLink {
    /// Open the serial interface.
    pub fn open(interface: &str, baud_rate: u32) -> anyhow::Result<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(interface, baud_rate).open_native_async()?;
        Ok(Self::from_stream(stream))
    }

    /// Build a link over any byte stream; tests use an in-memory duplex.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(read_half, events_tx, ack_tx));

        Self {
            writer: Mutex::new(Box::new(write_half)),
            acks: Mutex::new(ack_rx),
            events_rx: StdMutex::new(Some(events_rx)),
        }
    }

    async fn write_command(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| ChannelError::Io(e.to_string()))?;
        writer.flush().await.map_err(|e| ChannelError::Io(e.to_string()))
    }

    async fn next_ack(&self) -> Result<CdcAck, ChannelError> {
        let mut acks = self.acks.lock().await;
        match tokio::time::timeout(ACK_TIMEOUT, acks.recv()).await {
            Ok(Some(ack)) => Ok(ack),
            Ok(None) => Err(ChannelError::Io("device stream closed".to_owned())),
            Err(_) => Err(ChannelError::Io("device ack timeout".to_owned())),
        }
    }
}

#[async_trait]
impl ChannelLink for CdcLink {
    async fn test(&self) -> Result<(), ChannelError> {
        self.write_command(b">\r").await?;
        match self.next_ack().await? {
            CdcAck::TestOk => Ok(()),
            _ => Err(ChannelError::Io("test handshake rejected".to_owned())),
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<SendOutcome, ChannelError> {
        self.write_command(&encode_data_send(frame)).await?;
        match self.next_ack().await? {
            CdcAck::SendOk => Ok(SendOutcome::Accepted),
            CdcAck::SendBusy => Ok(SendOutcome::Busy),
            CdcAck::SendErr => Err(ChannelError::Io("device rejected frame".to_owned())),
            CdcAck::TestOk | CdcAck::TestErr => {
                Err(ChannelError::Io("unexpected acknowledgement".to_owned()))
            }
        }
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events_rx.lock().ok().and_then(|mut guard| guard.take())
    }
}

async fn read_loop<R>(
    mut reader: R,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    ack_tx: mpsc::UnboundedSender<CdcAck>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => {
                let _ = events_tx.send(LinkEvent::Down);
                return;
            }
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
        }
        while let Some((message, consumed)) = parse_cdc(&pending) {
            pending.drain(..consumed);
            match message {
                CdcMessage::Data(frame) => {
                    let _ = events_tx.send(LinkEvent::Frame(frame));
                }
                CdcMessage::TestOk => {
                    let _ = ack_tx.send(CdcAck::TestOk);
                }
                CdcMessage::TestErr => {
                    let _ = ack_tx.send(CdcAck::TestErr);
                }
                CdcMessage::SendOk => {
                    let _ = ack_tx.send(CdcAck::SendOk);
                }
                CdcMessage::SendErr => {
                    let _ = ack_tx.send(CdcAck::SendErr);
                }
                CdcMessage::SendBusy => {
                    let _ = ack_tx.send(CdcAck::SendBusy);
                }
                CdcMessage::Other => {
                    tracing::debug!("unrecognized cdc line skipped");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "cdc_tests.rs"]
mod tests;
