//! Framed TCP transport.
//!
//! TCP gives ordered, reliable delivery; this layer only restores message
//! boundaries with a `u32` big-endian length prefix:
//!
//! ```text
//! [len:u32][message bytes; len]
//! ```

use std::io::ErrorKind;
use std::net::SocketAddr;

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Largest message either side accepts.
pub const MAX_FRAME_LEN: usize = 1 << 20;

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        bail!("frame of {} bytes exceeds {MAX_FRAME_LEN}", payload.len());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    // bounded by MAX_FRAME_LEN
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one frame. `None` when the peer closed cleanly between frames.
async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Option<Bytes>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e).context("tcp read len"),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("peer announced a {len} byte frame, limit is {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    Ok(Some(Bytes::from(payload)))
}

/// A length-prefixed message stream over TCP.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
}

impl FramedConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: impl ToSocketAddrs) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        write_frame(&mut self.stream, payload).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<Option<Bytes>> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into halves that can live on different tasks.
    pub fn into_split(self) -> (FramedReader, FramedWriter) {
        let (read, write) = self.stream.into_split();
        (FramedReader { half: read }, FramedWriter { half: write })
    }
}

#[derive(Debug)]
pub struct FramedReader {
    half: OwnedReadHalf,
}

impl FramedReader {
    pub async fn recv(&mut self) -> anyhow::Result<Option<Bytes>> {
        read_frame(&mut self.half).await
    }
}

#[derive(Debug)]
pub struct FramedWriter {
    half: OwnedWriteHalf,
}

impl FramedWriter {
    pub async fn send(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        write_frame(&mut self.half, payload).await
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.half.shutdown().await.context("tcp shutdown")
    }
}
