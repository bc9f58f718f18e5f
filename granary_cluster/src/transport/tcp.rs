// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP client sessions and the shared frame codec

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use granary::concurrency::{
    mpsc_unbounded, oneshot, watch, Duration, JoinHandle, MpscUnboundedReceiver,
    MpscUnboundedSender, OneshotSender, WatchReceiver, WatchSender,
};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use granary::RemoteFailure;

use super::{Connector, HandlerErr, HandlerId, RpcClient, TransportErr, MAX_FRAME_LEN};
use crate::protocol::frame::{envelope, response, Request};
use crate::protocol::Envelope;

/// Write an envelope as a big-endian `u64` length prefix followed by the
/// proto-encoded payload
pub(crate) async fn write_frame<W>(stream: &mut W, frame: &Envelope) -> Result<(), TransportErr>
where
    W: AsyncWrite + Unpin,
{
    let len = frame.encoded_len();
    let mut buf: Vec<u8> = Vec::with_capacity(len + std::mem::size_of::<u64>());
    buf.extend_from_slice(&(len as u64).to_be_bytes());
    frame
        .encode(&mut buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    log::trace!("Writing payload (len={len})");
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed envelope
pub(crate) async fn read_frame<R>(stream: &mut R) -> Result<Envelope, TransportErr>
where
    R: AsyncRead + Unpin,
{
    let len = stream.read_u64().await?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit"),
        )
        .into());
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(Envelope::decode(Bytes::from(buf))?)
}

type Waiters = HashMap<u64, OneshotSender<Result<Vec<u8>, TransportErr>>>;
type Pending = Arc<Mutex<Waiters>>;

fn lock(pending: &Pending) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fail_pending(pending: &Pending) {
    for (_, waiter) in lock(pending).drain() {
        let _ = waiter.send(Err(TransportErr::Closed));
    }
}

/// A client session over TCP. Requests are multiplexed over the connection and
/// matched to responses by tag
#[derive(Debug)]
pub struct TcpClient {
    peer: SocketAddr,
    outbound: MpscUnboundedSender<Envelope>,
    pending: Pending,
    next_tag: AtomicU64,
    closed: Arc<WatchSender<bool>>,
    closed_rx: WatchReceiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpClient {
    /// Connect to `address`, failing if the connection isn't established within `timeout`
    pub async fn connect(address: SocketAddr, timeout: Duration) -> Result<Self, TransportErr> {
        let stream = granary::concurrency::timeout(timeout, TcpStream::connect(address)).await??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();

        let (outbound, outbound_rx) = mpsc_unbounded();
        let pending: Pending = Arc::default();
        let (closed, closed_rx) = watch(false);
        let closed = Arc::new(closed);

        let writer =
            granary::concurrency::spawn(write_loop(write, outbound_rx, closed.clone(), peer));
        let reader = granary::concurrency::spawn(read_loop(
            read,
            pending.clone(),
            closed.clone(),
            peer,
        ));
        log::info!("TCP Session opened for {peer}");

        Ok(Self {
            peer,
            outbound,
            pending,
            next_tag: AtomicU64::new(0),
            closed,
            closed_rx,
            tasks: Mutex::new(vec![writer, reader]),
        })
    }

    fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }
}

async fn write_loop(
    mut stream: OwnedWriteHalf,
    mut outbound: MpscUnboundedReceiver<Envelope>,
    closed: Arc<WatchSender<bool>>,
    peer: SocketAddr,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(write_err) = write_frame(&mut stream, &frame).await {
            log::warn!("Error writing to the stream of {peer} '{write_err}'");
            break;
        }
    }
    closed.send_replace(true);
}

async fn read_loop(
    mut stream: OwnedReadHalf,
    pending: Pending,
    closed: Arc<WatchSender<bool>>,
    peer: SocketAddr,
) {
    loop {
        match read_frame(&mut stream).await {
            Ok(Envelope {
                msg: Some(envelope::Msg::Response(response)),
            }) => {
                let waiter = lock(&pending).remove(&response.tag);
                let Some(waiter) = waiter else {
                    log::debug!("Response for unknown tag {} from {peer}", response.tag);
                    continue;
                };
                let result = match response.outcome {
                    Some(response::Outcome::Ok(reply)) => Ok(reply),
                    Some(response::Outcome::Error(failure)) => {
                        Err(TransportErr::Remote(failure.into()))
                    }
                    None => Err(TransportErr::Remote(HandlerErr::new(
                        RemoteFailure::Other,
                        "empty response",
                    ))),
                };
                let _ = waiter.send(result);
            }
            Ok(other) => log::trace!("Discarding unexpected frame {other:?} from {peer}"),
            Err(err) => {
                log::debug!("TCP Session closed for {peer} ({err})");
                break;
            }
        }
    }
    // flag first so that calls racing with the drain observe the closure
    closed.send_replace(true);
    fail_pending(&pending);
}

#[async_trait::async_trait]
impl RpcClient for TcpClient {
    fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    async fn call(&self, handler: HandlerId, payload: Vec<u8>) -> Result<Vec<u8>, TransportErr> {
        if self.is_closed() {
            return Err(TransportErr::Closed);
        }
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot();
        lock(&self.pending).insert(tag, tx);
        if self.is_closed() {
            lock(&self.pending).remove(&tag);
            return Err(TransportErr::Closed);
        }

        let frame = Envelope {
            msg: Some(envelope::Msg::Request(Request {
                tag,
                handler,
                payload,
            })),
        };
        if self.outbound.send(frame).is_err() {
            lock(&self.pending).remove(&tag);
            return Err(TransportErr::Closed);
        }
        rx.await.map_err(|_| TransportErr::Closed)?
    }

    async fn close(&self) -> Result<(), TransportErr> {
        let tasks = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }
        if !self.closed.send_replace(true) {
            log::info!("TCP Session closed for {}", self.peer);
        }
        fail_pending(&self.pending);
        Ok(())
    }

    async fn closed(&self) {
        let mut closed = self.closed_rx.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.iter() {
            task.abort();
        }
    }
}

/// Opens [TcpClient] sessions
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// A connector giving up on connection attempts after `connect_timeout`
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn RpcClient>, TransportErr> {
        let client = TcpClient::connect(address, self.connect_timeout).await?;
        Ok(Arc::new(client))
    }
}
