//! 라우팅 클라이언트
//!
//! 데이터센터별 조회 서비스와 생존 확인을 소유하고, 요청마다 후보 프록시를
//! 골라 전송 계층에 넘깁니다.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::super::config::{ClientConfig, ProxyAddress};
use super::super::error::{DriverError, DriverResult};
use super::super::logging::init_logging;
use super::super::request::{
    parse_response, ApiRequest, RequestEnvelope, TransactionId, TransactionOptions,
    TransactionalClient,
};
use super::super::streaming::{TableReader, TableWriter};
use super::super::tcp::TcpProxyConnector;
use super::super::transaction::Transaction;
use super::super::transport::{FailoverTransport, ProxyConnector, Transport};
use super::data_center::{DataCenter, Destination};
use super::discovery::{
    DiscoveryDelta, DiscoveryEvent, DiscoveryService, ProxyDirectory, RpcProxyDirectory,
    StaticDirectory,
};
use super::selector::{DestinationSelector, SelectionPolicy};

// ============================================================================
// ReadinessWaiters - 준비 대기열
// ============================================================================

/// 준비 대기열
///
/// 각 대기자는 정확히 한 번 신호를 받고, 등록 순서대로 깨어납니다.
#[derive(Debug, Default)]
pub(crate) struct ReadinessWaiters {
    queue: Mutex<WaiterQueue>,
}

#[derive(Debug, Default)]
struct WaiterQueue {
    pending: VecDeque<oneshot::Sender<()>>,
    released: bool,
}

impl ReadinessWaiters {
    /// 대기자 등록
    ///
    /// 잠금 안에서 준비 여부를 확인하므로, 확인과 등록 사이의 신호를 놓치지 않습니다.
    pub(crate) fn register(&self, is_ready: impl FnOnce() -> bool) -> ReadyFuture {
        let mut queue = self.queue.lock();
        if queue.released || is_ready() {
            return ReadyFuture::ready();
        }

        let (tx, rx) = oneshot::channel();
        queue.pending.push_back(tx);
        ReadyFuture::pending(rx)
    }

    /// 대기자 모두 깨우기 (깨운 수 반환)
    pub(crate) fn drain(&self) -> usize {
        let pending = std::mem::take(&mut self.queue.lock().pending);
        let count = pending.len();
        for waiter in pending {
            let _ = waiter.send(());
        }
        count
    }

    /// 종료: 남은 대기자를 깨우고 이후 등록은 즉시 완료
    pub(crate) fn release(&self) -> usize {
        self.queue.lock().released = true;
        self.drain()
    }

    /// 대기 중인 수
    pub(crate) fn len(&self) -> usize {
        self.queue.lock().pending.len()
    }
}

/// 준비 완료 future
///
/// 에러 없이 완료됩니다.
#[derive(Debug)]
pub struct ReadyFuture {
    rx: Option<oneshot::Receiver<()>>,
}

impl ReadyFuture {
    fn ready() -> Self {
        Self { rx: None }
    }

    fn pending(rx: oneshot::Receiver<()>) -> Self {
        Self { rx: Some(rx) }
    }

    /// 이미 완료되었는지 확인
    pub fn is_ready(&self) -> bool {
        self.rx.is_none()
    }
}

impl Future for ReadyFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(());
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(_) => {
                self.rx = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ============================================================================
// RoutingClientBuilder - 클라이언트 빌더
// ============================================================================

/// 라우팅 클라이언트 빌더
pub struct RoutingClientBuilder {
    config: ClientConfig,
    connector: Arc<dyn ProxyConnector>,
    transport: Option<Arc<dyn Transport>>,
    selector: Option<DestinationSelector>,
    directories: HashMap<String, Arc<dyn ProxyDirectory>>,
}

impl RoutingClientBuilder {
    /// 전송 계층 설정 (기본: `FailoverTransport`)
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 선택기 설정
    pub fn with_selector(mut self, selector: DestinationSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// 데이터센터의 목록 출처 지정 (기본: 밸런서 또는 초기 주소)
    pub fn with_directory(
        mut self,
        data_center: impl Into<String>,
        directory: Arc<dyn ProxyDirectory>,
    ) -> Self {
        self.directories.insert(data_center.into(), directory);
        self
    }

    /// 클라이언트 생성 및 백그라운드 작업 시작
    ///
    /// tokio 런타임 안에서 호출해야 합니다.
    pub fn build(self) -> DriverResult<RoutingClient> {
        let Self {
            config,
            connector,
            transport,
            selector,
            mut directories,
        } = self;

        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            DriverError::configuration("RoutingClient must be created inside a tokio runtime")
        })?;

        if let Some(filter) = &config.log_filter {
            init_logging(filter)?;
        }

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut data_centers = Vec::with_capacity(config.clusters.len());
        let mut discovery = Vec::with_capacity(config.clusters.len());
        for cluster in &config.clusters {
            let is_local = config.local_data_center.as_deref() == Some(cluster.name.as_str());
            let data_center = Arc::new(DataCenter::new(cluster.name.clone(), is_local));

            let directory: Arc<dyn ProxyDirectory> = match directories.remove(&cluster.name) {
                Some(directory) => directory,
                None => match cluster.discovery_balancer()? {
                    Some(balancer) => Arc::new(RpcProxyDirectory::new(
                        balancer,
                        config.proxy_role.clone(),
                        connector.clone(),
                    )),
                    None => Arc::new(StaticDirectory::new(cluster.seed_addresses.clone())),
                },
            };

            let service = DiscoveryService::new(
                data_center.clone(),
                directory,
                connector.clone(),
                events_tx.clone(),
                cancel.child_token(),
            );
            service.start(config.discovery_interval, &runtime);

            data_centers.push(data_center);
            discovery.push(service);
        }

        let waiters = Arc::new(ReadinessWaiters::default());
        let tasks = vec![
            runtime.spawn(run_event_pump(events_rx, waiters.clone(), cancel.clone())),
            runtime.spawn(run_ping_loop(
                data_centers.clone(),
                waiters.clone(),
                config.ping_interval,
                cancel.clone(),
            )),
        ];

        info!(
            data_centers = data_centers.len(),
            local = ?config.local_data_center,
            fanout = config.dispatch_fanout,
            "routing client started"
        );

        Ok(RoutingClient {
            inner: Arc::new(ClientInner {
                config,
                data_centers,
                discovery,
                selector: selector.unwrap_or_default(),
                transport: transport
                    .unwrap_or_else(|| Arc::new(FailoverTransport::new()) as Arc<dyn Transport>),
                waiters,
                open: RwLock::new(true),
                cancel,
                runtime,
                tasks: Mutex::new(tasks),
            }),
        })
    }
}

// ============================================================================
// RoutingClient - 라우팅 클라이언트
// ============================================================================

struct ClientInner {
    config: ClientConfig,
    data_centers: Vec<Arc<DataCenter>>,
    discovery: Vec<Arc<DiscoveryService>>,
    selector: DestinationSelector,
    transport: Arc<dyn Transport>,
    waiters: Arc<ReadinessWaiters>,
    open: RwLock<bool>,
    cancel: CancellationToken,
    runtime: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // 백그라운드 작업 정리 (연결 해제는 close()에서)
        self.cancel.cancel();
    }
}

/// 라우팅 클라이언트
///
/// 복제해도 같은 클라이언트를 가리킵니다.
#[derive(Clone)]
pub struct RoutingClient {
    inner: Arc<ClientInner>,
}

impl RoutingClient {
    /// 기본 전송 계층으로 클라이언트 생성
    pub fn new(config: ClientConfig, connector: Arc<dyn ProxyConnector>) -> DriverResult<Self> {
        Self::builder(config, connector).build()
    }

    /// TCP 커넥터로 클라이언트 생성
    ///
    /// 설정의 인증 정보를 모든 요청에 실어 보냅니다.
    pub fn connect(config: ClientConfig) -> DriverResult<Self> {
        let connector = Arc::new(TcpProxyConnector::from_config(&config));
        Self::new(config, connector)
    }

    /// 빌더 시작
    pub fn builder(config: ClientConfig, connector: Arc<dyn ProxyConnector>) -> RoutingClientBuilder {
        RoutingClientBuilder {
            config,
            connector,
            transport: None,
            selector: None,
            directories: HashMap::new(),
        }
    }

    /// 클라이언트 설정
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// 데이터센터 목록 (설정 순서)
    pub fn data_centers(&self) -> &[Arc<DataCenter>] {
        &self.inner.data_centers
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.inner.open.read()
    }

    /// 살아있는 프록시가 생길 때까지 대기
    ///
    /// 호출 시점에 이미 있으면 바로 완료됩니다. 에러 없이 완료됩니다.
    pub fn wait_until_ready(&self) -> ReadyFuture {
        let data_centers = &self.inner.data_centers;
        self.inner
            .waiters
            .register(|| data_centers.iter().any(|dc| dc.has_alive()))
    }

    /// 데이터센터별 살아있는 프록시
    pub fn alive_destinations_snapshot(&self) -> HashMap<String, Vec<Arc<Destination>>> {
        self.inner
            .data_centers
            .iter()
            .map(|dc| (dc.name().to_string(), dc.snapshot_alive()))
            .collect()
    }

    /// 현재 요청 후보 목록
    pub fn select_destinations(&self) -> Vec<Arc<Destination>> {
        let config = &self.inner.config;
        let policy = SelectionPolicy::new(config.dispatch_fanout)
            .with_prefer_local(config.has_local_data_center())
            .with_randomize_order(config.failover_policy.randomize_dcs);
        self.inner.selector.select(&self.inner.data_centers, policy)
    }

    /// 모든 데이터센터 즉시 재조회
    pub async fn refresh_discovery(&self) -> Vec<DriverResult<DiscoveryDelta>> {
        join_all(self.inner.discovery.iter().map(|s| s.refresh_now())).await
    }

    /// 요청 전송
    ///
    /// 후보가 없으면 전송 계층을 거치지 않고 `NoAliveDestinations`로 실패합니다.
    pub async fn dispatch(&self, request: RequestEnvelope) -> DriverResult<Bytes> {
        self.ensure_open()?;

        let candidates = self.select_destinations();
        if candidates.is_empty() {
            return Err(DriverError::NoAliveDestinations);
        }

        debug!(
            method = %request.method,
            candidates = candidates.len(),
            "dispatching request"
        );
        self.inner
            .transport
            .send_over_ordered(&candidates, &request)
            .await
    }

    /// 요청 전송 후 JSON 응답 파싱
    pub async fn execute_envelope(&self, request: RequestEnvelope) -> DriverResult<Value> {
        let body = self.dispatch(request).await?;
        parse_response(&body)
    }

    /// 트랜잭션 시작
    pub async fn start_transaction(&self, options: TransactionOptions) -> DriverResult<Transaction> {
        let response = self
            .execute(ApiRequest::StartTransaction { options })
            .await?;

        let id = response
            .get("transaction_id")
            .and_then(Value::as_str)
            .or_else(|| response.as_str())
            .ok_or_else(|| {
                DriverError::protocol(format!("start_transaction returned {}", response))
            })?;

        Ok(Transaction::new(self.clone(), TransactionId::new(id)))
    }

    /// 쓰기 스트림 열기
    pub async fn open_table_writer(&self, request: RequestEnvelope) -> DriverResult<TableWriter> {
        let (sink, address) = self
            .open_on_candidates(&request, |destination, request| async move {
                destination.handle().open_table_writer(&request).await
            })
            .await?;

        Ok(TableWriter::start(
            sink,
            self.inner.config.stream.clone(),
            address,
            &self.inner.runtime,
        ))
    }

    /// 읽기 스트림 열기
    pub async fn open_table_reader(&self, request: RequestEnvelope) -> DriverResult<TableReader> {
        let (source, address) = self
            .open_on_candidates(&request, |destination, request| async move {
                destination.handle().open_table_reader(&request).await
            })
            .await?;

        Ok(TableReader::start(
            source,
            self.inner.config.stream.clone(),
            address,
            &self.inner.runtime,
        ))
    }

    /// 스트림을 받아주는 첫 후보에서 열기
    async fn open_on_candidates<T, F, Fut>(
        &self,
        request: &RequestEnvelope,
        open: F,
    ) -> DriverResult<(T, ProxyAddress)>
    where
        F: Fn(Arc<Destination>, RequestEnvelope) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.ensure_open()?;

        let candidates = self.select_destinations();
        if candidates.is_empty() {
            return Err(DriverError::NoAliveDestinations);
        }

        let mut attempts = 0;
        let mut last = None;
        for destination in candidates {
            attempts += 1;
            let address = destination.address().clone();
            match open(destination, request.clone()).await {
                Ok(stream) => {
                    debug!(method = %request.method, proxy = %address, "stream opened");
                    return Ok((stream, address));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        method = %request.method,
                        proxy = %address,
                        error = %e,
                        "failed to open stream, trying next candidate"
                    );
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(match last {
            Some(last) => DriverError::TransportFailure {
                attempts,
                last: Box::new(last),
            },
            None => DriverError::NoAliveDestinations,
        })
    }

    /// 클라이언트 종료
    ///
    /// 조회, 생존 확인, 이벤트 처리를 멈추고 모든 연결을 해제합니다.
    /// 이미 전송 계층에 넘어간 요청은 취소하지 않습니다.
    pub async fn close(&self) {
        {
            let mut open = self.inner.open.write();
            if !*open {
                return;
            }
            *open = false;
        }

        self.inner.cancel.cancel();
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            task.abort();
        }

        join_all(self.inner.discovery.iter().map(|s| s.close())).await;
        let released = self.inner.waiters.release();
        info!(released_waiters = released, "routing client closed");
    }

    /// 대기 중인 준비 대기자 수
    pub fn pending_waiters(&self) -> usize {
        self.inner.waiters.len()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if *self.inner.open.read() {
            Ok(())
        } else {
            Err(DriverError::ClientClosed)
        }
    }
}

#[async_trait]
impl TransactionalClient for RoutingClient {
    async fn execute(&self, request: ApiRequest) -> DriverResult<Value> {
        self.execute_envelope(request.into_envelope()?).await
    }

    async fn read_table(&self, path: &str) -> DriverResult<TableReader> {
        let request = ApiRequest::ReadTable { path: path.into() }.into_envelope()?;
        self.open_table_reader(request).await
    }

    async fn write_table(&self, path: &str) -> DriverResult<TableWriter> {
        let request = ApiRequest::WriteTable { path: path.into() }.into_envelope()?;
        self.open_table_writer(request).await
    }
}

impl fmt::Debug for RoutingClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingClient")
            .field("data_centers", &self.inner.data_centers)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Background tasks - 백그라운드 작업
// ============================================================================

async fn run_event_pump(
    mut events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    waiters: Arc<ReadinessWaiters>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(DiscoveryEvent::ProxiesAdded {
                data_center,
                addresses,
            }) => {
                let woken = waiters.drain();
                debug!(%data_center, added = addresses.len(), woken, "proxies added");
            }
            Some(DiscoveryEvent::ProxiesRemoved {
                data_center,
                addresses,
            }) => {
                debug!(%data_center, removed = addresses.len(), "proxies removed");
            }
            None => break,
        }
    }
}

async fn run_ping_loop(
    data_centers: Vec<Arc<DataCenter>>,
    waiters: Arc<ReadinessWaiters>,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // 첫 틱은 즉시 완료되므로 건너뜀
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // 각 확인은 주기 안에 끝나야 함
        let results = join_all(data_centers.iter().map(|dc| dc.ping(interval))).await;
        for (dc, failures) in data_centers.iter().zip(results) {
            for (address, error) in failures {
                warn!(data_center = %dc.name(), proxy = %address, error = %error, "proxy ping failed");
            }
        }

        // 다시 살아난 프록시가 있으면 대기자도 깨움
        if data_centers.iter().any(|dc| dc.has_alive()) {
            waiters.drain();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::config::{ClusterSpec, StreamConfig};
    use crate::driver::testing::{rows, FakeConnector, FakeDirectory};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn addr(s: &str) -> ProxyAddress {
        ProxyAddress::parse(s).unwrap()
    }

    fn cluster(name: &str, seeds: &[&str]) -> ClusterSpec {
        ClusterSpec::new(name).with_seeds(seeds.iter().map(|s| addr(s)))
    }

    /// 전송 호출 수만 세는 전송 계층
    #[derive(Default)]
    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send_over_ordered(
            &self,
            candidates: &[Arc<Destination>],
            request: &RequestEnvelope,
        ) -> DriverResult<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            FailoverTransport::new()
                .send_over_ordered(candidates, request)
                .await
        }
    }

    fn three_dc_config() -> ClientConfig {
        ClientConfig::builder()
            .with_cluster(cluster("remote-1", &["r1a:1", "r1b:1"]))
            .with_cluster(cluster("local", &["la:1", "lb:1"]))
            .with_cluster(cluster("remote-2", &["r2a:1", "r2b:1"]))
            .with_local_data_center("local")
            .build()
            .unwrap()
    }

    #[test]
    fn test_waiters_drain_and_release() {
        let waiters = ReadinessWaiters::default();
        let mut first = tokio_test::task::spawn(waiters.register(|| false));
        let mut second = tokio_test::task::spawn(waiters.register(|| false));
        tokio_test::assert_pending!(first.poll());
        tokio_test::assert_pending!(second.poll());
        assert_eq!(waiters.len(), 2);

        assert_eq!(waiters.drain(), 2);
        assert!(first.is_woken());
        tokio_test::assert_ready!(first.poll());
        tokio_test::assert_ready!(second.poll());
        assert_eq!(waiters.drain(), 0);

        assert!(waiters.register(|| true).is_ready());
        assert!(!waiters.register(|| false).is_ready());
        assert_eq!(waiters.release(), 1);
        assert!(waiters.register(|| false).is_ready());
    }

    #[test]
    fn test_requires_runtime() {
        let result = RoutingClient::new(three_dc_config(), FakeConnector::new());
        assert!(matches!(result, Err(DriverError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_discovery() {
        let directory = FakeDirectory::new(vec![addr("a:1"), addr("b:1")]);
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["seed:1"]))
            .build()
            .unwrap();
        let client = RoutingClient::builder(config, FakeConnector::new())
            .with_directory("vla", directory.clone())
            .build()
            .unwrap();

        client.wait_until_ready().await;
        client.refresh_discovery().await;
        let snapshot = client.alive_destinations_snapshot();
        let mut seen: Vec<String> = snapshot["vla"].iter().map(|d| d.address().to_string()).collect();
        seen.sort();
        assert_eq!(seen, vec!["a:1", "b:1"]);

        directory.set(vec![addr("b:1"), addr("c:1")]);
        client.refresh_discovery().await;
        let mut seen: Vec<String> = client.alive_destinations_snapshot()["vla"]
            .iter()
            .map(|d| d.address().to_string())
            .collect();
        seen.sort();
        assert_eq!(seen, vec!["b:1", "c:1"]);

        client.close().await;
    }

    #[tokio::test]
    async fn test_local_first_dispatch_scenario() {
        let connector = FakeConnector::new();
        let client = RoutingClient::new(three_dc_config(), connector.clone()).unwrap();
        client.refresh_discovery().await;

        let selected = client.select_destinations();
        let hosts: Vec<&str> = selected.iter().map(|d| d.address().host.as_str()).collect();
        assert_eq!(hosts.len(), 3);
        assert!(hosts[0].starts_with('l'));
        assert!(hosts[1].starts_with('l'));
        assert!(hosts[2].starts_with('r'));

        // 첫 후보(로컬)가 응답
        let body = client
            .dispatch(ApiRequest::get_node("//tmp").into_envelope().unwrap())
            .await
            .unwrap();
        let answered: String = serde_json::from_slice(&body).unwrap();
        assert!(answered.starts_with('l'));

        client.close().await;
    }

    #[tokio::test]
    async fn test_no_alive_destinations_skips_transport() {
        let connector = FakeConnector::new();
        connector.refuse(&addr("a:1"));
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["a:1"]))
            .build()
            .unwrap();
        let transport = Arc::new(CountingTransport::default());
        let client = RoutingClient::builder(config, connector)
            .with_transport(transport.clone())
            .build()
            .unwrap();
        client.refresh_discovery().await;

        let err = client
            .dispatch(ApiRequest::get_node("//tmp").into_envelope().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NoAliveDestinations));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        client.close().await;
    }

    #[tokio::test]
    async fn test_dispatch_after_close() {
        let client = RoutingClient::new(three_dc_config(), FakeConnector::new()).unwrap();
        client.wait_until_ready().await;

        client.close().await;
        client.close().await;
        assert!(!client.is_open());

        let err = client
            .dispatch(ApiRequest::get_node("//tmp").into_envelope().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::ClientClosed));
        assert!(client.alive_destinations_snapshot().values().all(|v| v.is_empty()));
    }

    #[tokio::test]
    async fn test_readiness_resolves_each_waiter_once_in_order() {
        let connector = FakeConnector::new();
        let directory = FakeDirectory::new(vec![]);
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["seed:1"]))
            .build()
            .unwrap();
        let client = RoutingClient::builder(config, connector)
            .with_directory("vla", directory.clone())
            .build()
            .unwrap();

        // 빈 목록은 실패로 처리되어 아직 준비 안 됨
        client.refresh_discovery().await;
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let waiter = client.wait_until_ready();
            assert!(!waiter.is_ready());
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                waiter.await;
                order.lock().push(i);
            }));
        }
        tokio::task::yield_now().await;
        assert_eq!(client.pending_waiters(), 3);

        directory.set(vec![addr("a:1")]);
        client.refresh_discovery().await;
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(client.pending_waiters(), 0);

        // 이미 준비된 뒤에는 즉시 완료
        assert!(client.wait_until_ready().is_ready());
        client.close().await;
    }

    #[tokio::test]
    async fn test_close_releases_pending_waiters() {
        let directory = FakeDirectory::new(vec![]);
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["seed:1"]))
            .build()
            .unwrap();
        let client = RoutingClient::builder(config, FakeConnector::new())
            .with_directory("vla", directory)
            .build()
            .unwrap();

        let waiter = client.wait_until_ready();
        client.close().await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap();
        assert!(client.wait_until_ready().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_loop_marks_dead_and_recovers() {
        let connector = FakeConnector::new();
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["a:1", "b:1"]))
            .with_ping_interval(Duration::from_secs(1))
            .build()
            .unwrap();
        let client = RoutingClient::new(config, connector.clone()).unwrap();
        client.wait_until_ready().await;

        let a = connector.handle(&addr("a:1")).unwrap();
        a.set_ping_failing(true);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let alive = &client.alive_destinations_snapshot()["vla"];
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].address(), &addr("b:1"));
        assert!(a.pings() >= 1);

        // 실패해도 다음 주기는 계속됨
        a.set_ping_failing(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.alive_destinations_snapshot()["vla"].len(), 2);

        client.close().await;
    }

    #[tokio::test]
    async fn test_execute_and_transaction_client_methods() {
        let connector = FakeConnector::new();
        connector.respond_with(&addr("a:1"), b"true");
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["a:1"]))
            .build()
            .unwrap();
        let client = RoutingClient::new(config, connector.clone()).unwrap();
        client.wait_until_ready().await;

        assert!(client.exists_node("//home").await.unwrap());
        let request = connector.handle(&addr("a:1")).unwrap().last_request().unwrap();
        assert_eq!(request.method, "exists_node");
        assert!(request.mutation_id.is_none());

        client.close().await;
    }

    #[tokio::test]
    async fn test_write_table_flushes_on_close() {
        let connector = FakeConnector::new();
        let config = ClientConfig::builder()
            .with_cluster(cluster("vla", &["a:1"]))
            .with_stream_config(StreamConfig {
                low_water_rows: 10,
                max_buffered_rows: 5000,
                batch_size: 100,
            })
            .build()
            .unwrap();
        let client = RoutingClient::new(config, connector.clone()).unwrap();
        client.wait_until_ready().await;

        let mut writer = client.write_table("//home/t").await.unwrap();
        assert_eq!(writer.address(), &addr("a:1"));
        writer.write(rows(0..1000)).unwrap();
        writer.close().await.unwrap();

        let sink = connector.handle(&addr("a:1")).unwrap().sink().clone();
        assert_eq!(sink.received(), rows(0..1000));
        assert!(sink.is_finished());

        client.close().await;
    }

    #[tokio::test]
    async fn test_read_table_fails_over_to_next_candidate() {
        let connector = FakeConnector::new();
        connector.set_table_rows(rows(0..40));
        let config = ClientConfig::builder()
            .with_cluster(cluster("local", &["la:1"]))
            .with_cluster(cluster("remote", &["ra:1"]))
            .with_local_data_center("local")
            .build()
            .unwrap();
        let client = RoutingClient::new(config, connector.clone()).unwrap();
        client.refresh_discovery().await;

        connector.handle(&addr("la:1")).unwrap().refuse_streams(true);
        let mut reader = client.read_table("//home/t").await.unwrap();
        assert_eq!(reader.address(), &addr("ra:1"));
        assert_eq!(reader.read_all().await.unwrap(), rows(0..40));

        client.close().await;
    }
}
