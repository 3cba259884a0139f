//! 프록시 조회 서비스
//!
//! 데이터센터마다 하나씩 동작하며, 주기적으로 프록시 목록을 다시 조회해
//! 데이터센터 목록에 반영합니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::super::config::ProxyAddress;
use super::super::error::{DriverError, DriverResult};
use super::super::request::ApiRequest;
use super::super::transport::{ProxyConnector, ProxyHandle};
use super::data_center::{DataCenter, Destination};

// ============================================================================
// ProxyDirectory - 프록시 목록 출처
// ============================================================================

/// 프록시 주소 목록을 알려주는 출처
#[async_trait]
pub trait ProxyDirectory: Send + Sync {
    /// 현재 프록시 목록 조회
    async fn list_proxies(&self) -> DriverResult<Vec<ProxyAddress>>;
}

/// 고정 목록 (설정의 초기 주소)
#[derive(Debug, Clone)]
pub struct StaticDirectory {
    addresses: Vec<ProxyAddress>,
}

impl StaticDirectory {
    /// 새 고정 목록
    pub fn new(addresses: Vec<ProxyAddress>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl ProxyDirectory for StaticDirectory {
    async fn list_proxies(&self) -> DriverResult<Vec<ProxyAddress>> {
        Ok(self.addresses.clone())
    }
}

#[derive(Debug, Deserialize)]
struct DiscoverProxiesResponse {
    addresses: Vec<ProxyAddress>,
}

/// 밸런서에 `discover_proxies` 요청을 보내 목록을 받는 출처
pub struct RpcProxyDirectory {
    balancer: ProxyAddress,
    role: String,
    connector: Arc<dyn ProxyConnector>,
    /// 재사용하는 밸런서 연결
    handle: tokio::sync::Mutex<Option<Arc<dyn ProxyHandle>>>,
}

impl RpcProxyDirectory {
    /// 새 밸런서 출처
    pub fn new(
        balancer: ProxyAddress,
        role: impl Into<String>,
        connector: Arc<dyn ProxyConnector>,
    ) -> Self {
        Self {
            balancer,
            role: role.into(),
            connector,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    async fn connection(&self) -> DriverResult<Arc<dyn ProxyHandle>> {
        let mut cached = self.handle.lock().await;
        if let Some(handle) = cached.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self.connector.connect(&self.balancer).await?;
        *cached = Some(handle.clone());
        Ok(handle)
    }

    async fn reset_connection(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.close().await;
        }
    }
}

#[async_trait]
impl ProxyDirectory for RpcProxyDirectory {
    async fn list_proxies(&self) -> DriverResult<Vec<ProxyAddress>> {
        let request = ApiRequest::discover_proxies(self.role.clone()).into_envelope()?;
        let handle = self.connection().await?;

        let body = match handle.call(&request).await {
            Ok(body) => body,
            Err(e) => {
                self.reset_connection().await;
                return Err(e);
            }
        };

        let response: DiscoverProxiesResponse = serde_json::from_slice(&body)?;
        Ok(response.addresses)
    }
}

impl fmt::Debug for RpcProxyDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcProxyDirectory")
            .field("balancer", &self.balancer)
            .field("role", &self.role)
            .finish()
    }
}

// ============================================================================
// DiscoveryEvent / DiscoveryState
// ============================================================================

/// 목록 변경 알림
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// 프록시 추가됨
    ProxiesAdded {
        /// 데이터센터 이름
        data_center: String,
        /// 추가된 주소
        addresses: Vec<ProxyAddress>,
    },
    /// 프록시 제거됨
    ProxiesRemoved {
        /// 데이터센터 이름
        data_center: String,
        /// 제거된 주소
        addresses: Vec<ProxyAddress>,
    },
}

/// 조회 서비스 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    /// 생성됨 (루프 시작 전)
    Starting,
    /// 주기적으로 조회 중
    Running,
    /// 종료됨
    Closed,
}

/// 한 번의 조회 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryDelta {
    /// 추가 반영된 주소 (연결 성공한 것만)
    pub added: Vec<ProxyAddress>,
    /// 제거된 주소
    pub removed: Vec<ProxyAddress>,
}

impl DiscoveryDelta {
    /// 변경 없음 여부
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ============================================================================
// DiscoveryService - 조회 서비스
// ============================================================================

/// 데이터센터 하나의 프록시 조회 서비스
pub struct DiscoveryService {
    data_center: Arc<DataCenter>,
    directory: Arc<dyn ProxyDirectory>,
    connector: Arc<dyn ProxyConnector>,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
    state: RwLock<DiscoveryState>,
    /// 조회 주기 직렬화 (단일 writer)
    cycle: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// 새 조회 서비스 생성
    pub fn new(
        data_center: Arc<DataCenter>,
        directory: Arc<dyn ProxyDirectory>,
        connector: Arc<dyn ProxyConnector>,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            data_center,
            directory,
            connector,
            events,
            state: RwLock::new(DiscoveryState::Starting),
            cycle: tokio::sync::Mutex::new(()),
            cancel,
            task: Mutex::new(None),
        })
    }

    /// 대상 데이터센터
    pub fn data_center(&self) -> &Arc<DataCenter> {
        &self.data_center
    }

    /// 현재 상태
    pub fn state(&self) -> DiscoveryState {
        *self.state.read()
    }

    /// 주기 조회 시작
    ///
    /// 첫 조회는 즉시 실행됩니다.
    pub fn start(self: &Arc<Self>, interval: Duration, runtime: &Handle) {
        {
            let mut state = self.state.write();
            if *state != DiscoveryState::Starting {
                return;
            }
            *state = DiscoveryState::Running;
        }

        let service = self.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = service.cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = service.refresh_now().await {
                    warn!(
                        data_center = %service.data_center.name(),
                        error = %e,
                        "proxy discovery failed, keeping current proxies"
                    );
                }
            }

            debug!(data_center = %service.data_center.name(), "discovery loop stopped");
        });

        *self.task.lock() = Some(task);
    }

    /// 즉시 한 번 조회
    ///
    /// 조회 실패는 목록을 바꾸지 않습니다. 종료 후에는 아무것도 하지 않습니다.
    pub async fn refresh_now(&self) -> DriverResult<DiscoveryDelta> {
        let _cycle = self.cycle.lock().await;
        if self.state() == DiscoveryState::Closed {
            return Ok(DiscoveryDelta::default());
        }

        let resolved = match self.directory.list_proxies().await {
            Ok(list) if list.is_empty() => {
                return Err(DriverError::discovery("directory returned no proxies"))
            }
            Ok(list) => list,
            Err(e) => return Err(DriverError::discovery(e.to_string())),
        };

        let resolved: HashSet<ProxyAddress> = resolved.into_iter().collect();
        let current = self.data_center.addresses();

        let mut to_add: Vec<ProxyAddress> = resolved.difference(&current).cloned().collect();
        let mut removed: Vec<ProxyAddress> = current.difference(&resolved).cloned().collect();
        to_add.sort();
        removed.sort();

        let connected = join_all(to_add.iter().map(|addr| self.connector.connect(addr))).await;

        let mut added = Vec::new();
        let mut destinations = Vec::new();
        for (address, result) in to_add.into_iter().zip(connected) {
            match result {
                Ok(handle) => {
                    destinations.push(Arc::new(Destination::new(address.clone(), handle)));
                    added.push(address);
                }
                Err(e) => {
                    // 다음 주기에 다시 시도
                    warn!(
                        data_center = %self.data_center.name(),
                        proxy = %address,
                        error = %e,
                        "failed to connect to discovered proxy"
                    );
                }
            }
        }

        if self.state() == DiscoveryState::Closed {
            join_all(destinations.iter().map(|d| d.handle().close())).await;
            return Ok(DiscoveryDelta::default());
        }

        let dropped = self.data_center.apply_delta(destinations, &removed);
        join_all(dropped.iter().map(|d| d.handle().close())).await;

        let delta = DiscoveryDelta { added, removed };
        if delta.is_empty() {
            debug!(data_center = %self.data_center.name(), "proxy list unchanged");
            return Ok(delta);
        }

        info!(
            data_center = %self.data_center.name(),
            added = delta.added.len(),
            removed = delta.removed.len(),
            alive = self.data_center.alive_count(),
            "proxy list updated"
        );

        // 받는 쪽이 없어도 목록 반영은 유지
        if !delta.added.is_empty() {
            let _ = self.events.send(DiscoveryEvent::ProxiesAdded {
                data_center: self.data_center.name().to_string(),
                addresses: delta.added.clone(),
            });
        }
        if !delta.removed.is_empty() {
            let _ = self.events.send(DiscoveryEvent::ProxiesRemoved {
                data_center: self.data_center.name().to_string(),
                addresses: delta.removed.clone(),
            });
        }

        Ok(delta)
    }

    /// 서비스 종료
    ///
    /// 루프를 멈추고 데이터센터가 가진 연결을 모두 해제합니다.
    /// 진행 중인 조회가 있으면 끝나기를 기다리며, 그 조회가 연 연결도 해제됩니다.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            if *state == DiscoveryState::Closed {
                return;
            }
            *state = DiscoveryState::Closed;
        }

        // 진행 중인 조회 주기는 끝까지 실행
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(
                    data_center = %self.data_center.name(),
                    error = %e,
                    "discovery loop ended abnormally"
                );
            }
        }

        let _cycle = self.cycle.lock().await;
        self.data_center.close().await;
    }
}

impl fmt::Debug for DiscoveryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryService")
            .field("data_center", &self.data_center.name())
            .field("state", &self.state())
            .finish()
    }
}
