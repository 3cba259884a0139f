//! TCP transport to RPC proxies.
//!
//! Unary calls and pings share one multiplexed connection per proxy, matched
//! by request id. Every table stream opens its own connection so that a slow
//! stream never blocks unary traffic.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::wire::{Frame, FrameCodec, FrameKind, WireError, WireResult, DEFAULT_MAX_FRAME_SIZE};

use super::config::{ClientConfig, Credentials, ProxyAddress};
use super::error::{DriverError, DriverResult};
use super::request::{MutationId, RequestEnvelope, Row, TransactionId};
use super::transport::{ProxyConnector, ProxyHandle, RowSink, RowSource};

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default unary call timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request id used by the single exchange of a stream connection
const STREAM_ID: u64 = 1;

type FramedStream = Framed<TcpStream, FrameCodec>;
type PendingMap = HashMap<u64, oneshot::Sender<WireResult<Frame>>>;

// ============================================================================
// Envelope encoding
// ============================================================================

/// Metadata sent in front of every request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Method name
    pub method: String,
    /// Mutation id for mutating calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<MutationId>,
    /// Owning transaction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    /// Caller credentials
    #[serde(default)]
    pub credentials: Credentials,
}

/// Encode an envelope as a request body.
///
/// Layout: `u32` header length (big-endian), JSON header, raw payload.
pub fn encode_envelope(envelope: &RequestEnvelope, credentials: &Credentials) -> DriverResult<Bytes> {
    let header = EnvelopeHeader {
        method: envelope.method.clone(),
        mutation_id: envelope.mutation_id,
        transaction_id: envelope.transaction_id.clone(),
        credentials: credentials.clone(),
    };
    let header = serde_json::to_vec(&header)?;

    let mut body = BytesMut::with_capacity(4 + header.len() + envelope.payload.len());
    body.put_u32(header.len() as u32);
    body.put_slice(&header);
    body.put_slice(&envelope.payload);
    Ok(body.freeze())
}

/// Decode a request body into header and payload.
pub fn decode_envelope(mut body: Bytes) -> DriverResult<(EnvelopeHeader, Bytes)> {
    if body.len() < 4 {
        return Err(WireError::Malformed("request body shorter than 4 bytes".to_string()).into());
    }
    let header_len = body.get_u32() as usize;
    if body.len() < header_len {
        return Err(WireError::Malformed(format!(
            "header length {} exceeds body ({} bytes)",
            header_len,
            body.len()
        ))
        .into());
    }
    let header = body.split_to(header_len);
    Ok((serde_json::from_slice(&header)?, body))
}

/// Encode rows as a batch body.
pub fn encode_rows(rows: &[Row]) -> DriverResult<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(rows)?))
}

/// Decode a batch body.
pub fn decode_rows(body: &[u8]) -> DriverResult<Vec<Row>> {
    Ok(serde_json::from_slice(body)?)
}

// ============================================================================
// TcpProxyConnector
// ============================================================================

/// Connector that opens TCP connections to proxies.
#[derive(Debug, Clone)]
pub struct TcpProxyConnector {
    credentials: Credentials,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_frame_size: usize,
}

impl TcpProxyConnector {
    /// Create a connector sending the given credentials with every request.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a connector sending the credentials configured in `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.credentials.clone())
    }

    /// Credentials attached to every request envelope.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the unary call timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }
}

#[async_trait]
impl ProxyConnector for TcpProxyConnector {
    async fn connect(&self, address: &ProxyAddress) -> DriverResult<Arc<dyn ProxyHandle>> {
        let handle = TcpProxyHandle {
            address: address.clone(),
            settings: self.clone(),
            connection: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        // Fail fast so discovery skips unreachable proxies
        handle.connection().await?;
        Ok(Arc::new(handle))
    }
}

async fn open_framed(address: &ProxyAddress, settings: &TcpProxyConnector) -> DriverResult<FramedStream> {
    let connect = TcpStream::connect((address.host.as_str(), address.port));
    let stream = match tokio::time::timeout(settings.connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(DriverError::transport(
                address.to_string(),
                format!("Failed to connect: {}", e),
            ))
        }
        Err(_) => {
            return Err(DriverError::transport(
                address.to_string(),
                format!("Connect timed out after {:?}", settings.connect_timeout),
            ))
        }
    };

    // Enable TCP nodelay for lower latency
    stream.set_nodelay(true).ok();
    Ok(Framed::new(
        stream,
        FrameCodec::with_max_size(settings.max_frame_size),
    ))
}

// ============================================================================
// Multiplexed connection
// ============================================================================

struct Connection {
    writer: tokio::sync::Mutex<SplitSink<FramedStream, Frame>>,
    pending: Arc<Mutex<PendingMap>>,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    fn start(framed: FramedStream) -> Self {
        let (writer, reader) = framed.split();
        let pending = Arc::new(Mutex::new(PendingMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_responses(reader, pending.clone(), alive.clone()));

        Self {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn exchange(&self, kind: FrameKind, body: Bytes, timeout: Duration) -> DriverResult<Frame> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let sent = self.writer.lock().await.send(Frame::new(kind, id, body)).await;
        if let Err(e) = sent {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(_)) => Err(WireError::ConnectionClosed.into()),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(DriverError::timeout(format!("no response after {:?}", timeout)))
            }
        }
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.writer.lock().await.close().await;
        self.reader.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_responses(
    mut reader: SplitStream<FramedStream>,
    pending: Arc<Mutex<PendingMap>>,
    alive: Arc<AtomicBool>,
) {
    while let Some(next) = reader.next().await {
        match next {
            Ok(frame) => {
                let waiter = pending.lock().remove(&frame.request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(frame.into_result());
                    }
                    None => trace!(request_id = frame.request_id, "dropping unmatched frame"),
                }
            }
            Err(e) => {
                debug!(error = %e, "proxy connection read failed");
                break;
            }
        }
    }

    alive.store(false, Ordering::Release);
    for (_, waiter) in pending.lock().drain() {
        let _ = waiter.send(Err(WireError::ConnectionClosed));
    }
}

// ============================================================================
// TcpProxyHandle
// ============================================================================

/// Handle to one proxy over TCP.
///
/// Reconnects lazily when the shared connection drops, so a proxy that comes
/// back is picked up by the next ping.
pub struct TcpProxyHandle {
    address: ProxyAddress,
    settings: TcpProxyConnector,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
    closed: AtomicBool,
}

impl TcpProxyHandle {
    async fn connection(&self) -> DriverResult<Arc<Connection>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::transport(self.address.to_string(), "handle closed"));
        }

        let mut cached = self.connection.lock().await;
        if let Some(connection) = cached.as_ref() {
            if connection.is_alive() {
                return Ok(connection.clone());
            }
        }

        let framed = open_framed(&self.address, &self.settings).await?;
        let connection = Arc::new(Connection::start(framed));
        *cached = Some(connection.clone());
        debug!(proxy = %self.address, "proxy connection established");
        Ok(connection)
    }

    async fn exchange(&self, kind: FrameKind, body: Bytes) -> DriverResult<Frame> {
        let connection = self.connection().await?;
        connection
            .exchange(kind, body, self.settings.request_timeout)
            .await
            .map_err(|e| self.tag(e))
    }

    /// Attach the proxy address to connection-level failures.
    fn tag(&self, error: DriverError) -> DriverError {
        match error {
            DriverError::Io(e) => DriverError::transport(self.address.to_string(), e.to_string()),
            other => other,
        }
    }

    async fn open_stream(&self, kind: FrameKind, request: &RequestEnvelope) -> DriverResult<StreamConnection> {
        let framed = open_framed(&self.address, &self.settings).await?;
        let mut stream = StreamConnection {
            address: self.address.clone(),
            framed,
            finished: false,
        };

        let body = encode_envelope(request, &self.settings.credentials)?;
        stream.send(Frame::new(kind, STREAM_ID, body)).await?;
        let reply = stream.recv().await?;
        if reply.kind != FrameKind::StreamReady {
            return Err(WireError::UnexpectedFrame(format!("{:?} while opening stream", reply.kind)).into());
        }
        debug!(proxy = %self.address, method = %request.method, "stream connection opened");
        Ok(stream)
    }
}

#[async_trait]
impl ProxyHandle for TcpProxyHandle {
    fn address(&self) -> &ProxyAddress {
        &self.address
    }

    async fn call(&self, request: &RequestEnvelope) -> DriverResult<Bytes> {
        let body = encode_envelope(request, &self.settings.credentials)?;
        let reply = self.exchange(FrameKind::Request, body).await?;
        match reply.kind {
            FrameKind::Response => Ok(reply.body),
            other => Err(WireError::UnexpectedFrame(format!("{:?} in reply to request", other)).into()),
        }
    }

    async fn ping(&self) -> DriverResult<()> {
        let reply = self.exchange(FrameKind::Ping, Bytes::new()).await?;
        match reply.kind {
            FrameKind::Pong => Ok(()),
            other => Err(WireError::UnexpectedFrame(format!("{:?} in reply to ping", other)).into()),
        }
    }

    async fn open_table_writer(&self, request: &RequestEnvelope) -> DriverResult<Box<dyn RowSink>> {
        let stream = self.open_stream(FrameKind::OpenWrite, request).await?;
        Ok(Box::new(TcpRowSink { stream, sequence: 0 }))
    }

    async fn open_table_reader(&self, request: &RequestEnvelope) -> DriverResult<Box<dyn RowSource>> {
        let stream = self.open_stream(FrameKind::OpenRead, request).await?;
        Ok(Box::new(TcpRowSource { stream }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(connection) = self.connection.lock().await.take() {
            connection.shutdown().await;
        }
    }
}

impl fmt::Debug for TcpProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpProxyHandle")
            .field("address", &self.address)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

// ============================================================================
// Stream connections
// ============================================================================

struct StreamConnection {
    address: ProxyAddress,
    framed: FramedStream,
    finished: bool,
}

impl StreamConnection {
    async fn send(&mut self, frame: Frame) -> DriverResult<()> {
        self.framed.send(frame).await.map_err(|e| self.tag(e.into()))
    }

    async fn recv(&mut self) -> DriverResult<Frame> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(frame.into_result()?),
            Some(Err(e)) => Err(self.tag(e.into())),
            None => Err(self.tag(WireError::ConnectionClosed.into())),
        }
    }

    async fn cancel(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.framed.send(Frame::empty(FrameKind::StreamCancel, STREAM_ID)).await;
        }
        let _ = self.framed.close().await;
    }

    fn tag(&self, error: DriverError) -> DriverError {
        match error {
            DriverError::Io(e) => DriverError::transport(self.address.to_string(), e.to_string()),
            other => other,
        }
    }
}

struct TcpRowSink {
    stream: StreamConnection,
    sequence: u64,
}

#[async_trait]
impl RowSink for TcpRowSink {
    async fn send_batch(&mut self, rows: Vec<Row>) -> DriverResult<()> {
        self.sequence += 1;
        let body = encode_rows(&rows)?;
        self.stream
            .send(Frame::new(FrameKind::RowBatch, self.sequence, body))
            .await?;

        let ack = self.stream.recv().await?;
        if ack.kind != FrameKind::Ack || ack.request_id != self.sequence {
            return Err(WireError::UnexpectedFrame(format!(
                "{:?} #{} while waiting for ack #{}",
                ack.kind, ack.request_id, self.sequence
            ))
            .into());
        }
        Ok(())
    }

    async fn finish(&mut self) -> DriverResult<()> {
        self.stream.send(Frame::empty(FrameKind::StreamEnd, STREAM_ID)).await?;
        let ack = self.stream.recv().await?;
        if ack.kind != FrameKind::Ack {
            return Err(WireError::UnexpectedFrame(format!("{:?} after stream end", ack.kind)).into());
        }
        self.stream.finished = true;
        let _ = self.stream.framed.close().await;
        Ok(())
    }

    async fn abort(&mut self) -> DriverResult<()> {
        self.stream.cancel().await;
        Ok(())
    }
}

struct TcpRowSource {
    stream: StreamConnection,
}

#[async_trait]
impl RowSource for TcpRowSource {
    async fn next_batch(&mut self) -> DriverResult<Option<Vec<Row>>> {
        if self.stream.finished {
            return Ok(None);
        }

        let frame = self.stream.recv().await?;
        match frame.kind {
            FrameKind::RowBatch => Ok(Some(decode_rows(&frame.body)?)),
            FrameKind::StreamEnd => {
                self.stream.finished = true;
                Ok(None)
            }
            other => Err(WireError::UnexpectedFrame(format!("{:?} in read stream", other)).into()),
        }
    }

    async fn cancel(&mut self) -> DriverResult<()> {
        self.stream.cancel().await;
        Ok(())
    }
}
