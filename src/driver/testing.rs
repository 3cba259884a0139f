//! 테스트용 가짜 구현
//!
//! 프록시 연결, 목록 출처, 스트림 끝점을 메모리 안에서 흉내 냅니다.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;

use super::config::ProxyAddress;
use super::error::{DriverError, DriverResult};
use super::request::{RequestEnvelope, Row};
use super::routing::{Destination, ProxyDirectory};
use super::transport::{ProxyConnector, ProxyHandle, RowSink, RowSource};

type ErrorFactory = Box<dyn Fn() -> DriverError + Send + Sync>;

/// `[i, "row-i"]` 형태의 행 목록
pub fn rows(range: Range<i64>) -> Vec<Row> {
    range.map(|i| vec![json!(i), json!(format!("row-{}", i))]).collect()
}

/// 가짜 핸들로 목적지 생성
pub fn destination(handle: Arc<FakeHandle>) -> Arc<Destination> {
    let address = handle.address().clone();
    Arc::new(Destination::new(address, handle))
}

// ============================================================================
// FakeSink
// ============================================================================

#[derive(Default)]
struct SinkState {
    received: Mutex<Vec<Row>>,
    batches: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    finished: AtomicBool,
    aborted: AtomicBool,
}

/// 받은 행을 기록하는 쓰기 끝점
#[derive(Clone)]
pub struct FakeSink {
    state: Arc<SinkState>,
    gate: Arc<watch::Sender<bool>>,
}

impl FakeSink {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Arc::new(SinkState::default()),
            gate: Arc::new(gate),
        }
    }

    /// 이후 `send_batch`를 막음
    pub fn block(&self) {
        self.gate.send_replace(false);
    }

    pub fn unblock(&self) {
        self.gate.send_replace(true);
    }

    /// n개 묶음 이후 실패
    pub fn fail_after(&self, batches: usize) {
        *self.state.fail_after.lock() = Some(batches);
    }

    pub fn received(&self) -> Vec<Row> {
        self.state.received.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RowSink for FakeSink {
    async fn send_batch(&mut self, rows: Vec<Row>) -> DriverResult<()> {
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let sent = self.state.batches.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.state.fail_after.lock() {
            if sent >= limit {
                return Err(DriverError::transport("sink", "connection reset"));
            }
        }
        self.state.received.lock().extend(rows);
        Ok(())
    }

    async fn finish(&mut self) -> DriverResult<()> {
        self.state.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn abort(&mut self) -> DriverResult<()> {
        self.state.aborted.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// FakeSource
// ============================================================================

struct SourceState {
    rows: VecDeque<Row>,
    batch: usize,
    pulls: usize,
    fail_after: Option<usize>,
    cancelled: bool,
}

/// 정해진 행을 묶음으로 내보내는 읽기 끝점
#[derive(Clone)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new(rows: Vec<Row>, batch: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState {
                rows: rows.into(),
                batch,
                pulls: 0,
                fail_after: None,
                cancelled: false,
            })),
        }
    }

    /// n번 성공 후 실패
    pub fn fail_after(&self, pulls: usize) {
        self.state.lock().fail_after = Some(pulls);
    }

    pub fn pulls(&self) -> usize {
        self.state.lock().pulls
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

#[async_trait]
impl RowSource for FakeSource {
    async fn next_batch(&mut self) -> DriverResult<Option<Vec<Row>>> {
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        if let Some(limit) = state.fail_after {
            if state.pulls >= limit {
                return Err(DriverError::transport("source", "connection reset"));
            }
        }
        state.pulls += 1;

        let n = state.batch.min(state.rows.len());
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(state.rows.drain(..n).collect()))
    }

    async fn cancel(&mut self) -> DriverResult<()> {
        self.state.lock().cancelled = true;
        Ok(())
    }
}

// ============================================================================
// FakeHandle
// ============================================================================

/// 기록만 하는 프록시 핸들
pub struct FakeHandle {
    address: ProxyAddress,
    calls: AtomicUsize,
    pings: AtomicUsize,
    call_error: Mutex<Option<ErrorFactory>>,
    response: Mutex<Option<Bytes>>,
    last_request: Mutex<Option<RequestEnvelope>>,
    ping_failing: AtomicBool,
    ping_delay: Mutex<Duration>,
    refuse_streams: AtomicBool,
    table_rows: Mutex<Vec<Row>>,
    sink: FakeSink,
    sources: Mutex<Vec<FakeSource>>,
    closed: AtomicBool,
}

impl FakeHandle {
    pub fn new(address: &str) -> Arc<Self> {
        Self::with_address(ProxyAddress::parse(address).unwrap_or_else(|_| ProxyAddress::new(address, 1)))
    }

    pub fn with_address(address: ProxyAddress) -> Arc<Self> {
        Arc::new(Self {
            address,
            calls: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            call_error: Mutex::new(None),
            response: Mutex::new(None),
            last_request: Mutex::new(None),
            ping_failing: AtomicBool::new(false),
            ping_delay: Mutex::new(Duration::ZERO),
            refuse_streams: AtomicBool::new(false),
            table_rows: Mutex::new(Vec::new()),
            sink: FakeSink::new(),
            sources: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn fail_calls_with(&self, f: impl Fn() -> DriverError + Send + Sync + 'static) {
        *self.call_error.lock() = Some(Box::new(f));
    }

    pub fn respond_with(&self, body: &[u8]) {
        *self.response.lock() = Some(Bytes::copy_from_slice(body));
    }

    pub fn last_request(&self) -> Option<RequestEnvelope> {
        self.last_request.lock().clone()
    }

    pub fn set_ping_failing(&self, failing: bool) {
        self.ping_failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock() = delay;
    }

    pub fn refuse_streams(&self, refuse: bool) {
        self.refuse_streams.store(refuse, Ordering::SeqCst);
    }

    pub fn set_table_rows(&self, rows: Vec<Row>) {
        *self.table_rows.lock() = rows;
    }

    /// 이 핸들로 연 쓰기 스트림들이 공유하는 끝점
    pub fn sink(&self) -> &FakeSink {
        &self.sink
    }

    pub fn sources(&self) -> Vec<FakeSource> {
        self.sources.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_stream(&self) -> DriverResult<()> {
        if self.refuse_streams.load(Ordering::SeqCst) {
            return Err(DriverError::transport(self.address.to_string(), "stream refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyHandle for FakeHandle {
    fn address(&self) -> &ProxyAddress {
        &self.address
    }

    async fn call(&self, request: &RequestEnvelope) -> DriverResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        if let Some(error) = self.call_error.lock().as_ref() {
            return Err(error());
        }
        if let Some(body) = self.response.lock().clone() {
            return Ok(body);
        }
        Ok(Bytes::from(format!("\"{}\"", self.address)))
    }

    async fn ping(&self) -> DriverResult<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.ping_failing.load(Ordering::SeqCst) {
            return Err(DriverError::transport(self.address.to_string(), "ping failed"));
        }
        Ok(())
    }

    async fn open_table_writer(&self, request: &RequestEnvelope) -> DriverResult<Box<dyn RowSink>> {
        *self.last_request.lock() = Some(request.clone());
        self.check_stream()?;
        Ok(Box::new(self.sink.clone()))
    }

    async fn open_table_reader(&self, request: &RequestEnvelope) -> DriverResult<Box<dyn RowSource>> {
        *self.last_request.lock() = Some(request.clone());
        self.check_stream()?;
        let source = FakeSource::new(self.table_rows.lock().clone(), 16);
        self.sources.lock().push(source.clone());
        Ok(Box::new(source))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// FakeConnector
// ============================================================================

/// 주소별 가짜 핸들을 만드는 연결 생성기
#[derive(Default)]
pub struct FakeConnector {
    handles: Mutex<HashMap<ProxyAddress, Arc<FakeHandle>>>,
    connects: Mutex<HashMap<ProxyAddress, usize>>,
    refused: Mutex<HashSet<ProxyAddress>>,
    responses: Mutex<HashMap<ProxyAddress, Bytes>>,
    table_rows: Mutex<Vec<Row>>,
    delays: Mutex<HashMap<ProxyAddress, Duration>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, address: &ProxyAddress) {
        self.refused.lock().insert(address.clone());
    }

    pub fn accept(&self, address: &ProxyAddress) {
        self.refused.lock().remove(address);
    }

    /// 해당 주소의 연결 완료를 늦춤
    pub fn set_connect_delay(&self, address: &ProxyAddress, delay: Duration) {
        self.delays.lock().insert(address.clone(), delay);
    }

    /// 해당 주소 핸들의 응답 고정
    pub fn respond_with(&self, address: &ProxyAddress, body: &[u8]) {
        self.responses
            .lock()
            .insert(address.clone(), Bytes::copy_from_slice(body));
        if let Some(handle) = self.handle(address) {
            handle.respond_with(body);
        }
    }

    /// 모든 핸들이 읽기 스트림으로 내보낼 행
    pub fn set_table_rows(&self, rows: Vec<Row>) {
        *self.table_rows.lock() = rows.clone();
        for handle in self.handles.lock().values() {
            handle.set_table_rows(rows.clone());
        }
    }

    /// 가장 최근에 만든 핸들
    pub fn handle(&self, address: &ProxyAddress) -> Option<Arc<FakeHandle>> {
        self.handles.lock().get(address).cloned()
    }

    pub fn connect_count(&self, address: &ProxyAddress) -> usize {
        self.connects.lock().get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ProxyConnector for FakeConnector {
    async fn connect(&self, address: &ProxyAddress) -> DriverResult<Arc<dyn ProxyHandle>> {
        *self.connects.lock().entry(address.clone()).or_insert(0) += 1;

        let delay = self.delays.lock().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.refused.lock().contains(address) {
            return Err(DriverError::transport(address.to_string(), "connection refused"));
        }

        let handle = FakeHandle::with_address(address.clone());
        if let Some(body) = self.responses.lock().get(address) {
            handle.respond_with(body);
        }
        handle.set_table_rows(self.table_rows.lock().clone());
        self.handles.lock().insert(address.clone(), handle.clone());
        Ok(handle)
    }
}

// ============================================================================
// FakeDirectory
// ============================================================================

/// 바꿀 수 있는 프록시 목록
#[derive(Default)]
pub struct FakeDirectory {
    addresses: Mutex<Vec<ProxyAddress>>,
    failing: AtomicBool,
}

impl FakeDirectory {
    pub fn new(addresses: Vec<ProxyAddress>) -> Arc<Self> {
        Arc::new(Self {
            addresses: Mutex::new(addresses),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set(&self, addresses: Vec<ProxyAddress>) {
        *self.addresses.lock() = addresses;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProxyDirectory for FakeDirectory {
    async fn list_proxies(&self) -> DriverResult<Vec<ProxyAddress>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DriverError::transport("directory", "unreachable"));
        }
        Ok(self.addresses.lock().clone())
    }
}
