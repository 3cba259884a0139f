//! 데이터센터와 프록시 목적지
//!
//! 데이터센터별 프록시 목록을 관리합니다. 목록은 통째로 교체되는 스냅샷이라
//! 읽는 쪽은 `Arc`만 복제하고, 한 번의 조회 주기 변경은 한 번에 반영됩니다.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::super::config::ProxyAddress;
use super::super::error::{DriverError, DriverResult};
use super::super::transport::ProxyHandle;

/// 아직 측정되지 않은 가중치
pub const UNKNOWN_WEIGHT: f64 = -1.0;

// ============================================================================
// Destination - 프록시 목적지
// ============================================================================

/// 하나의 프록시와 그 연결 핸들
pub struct Destination {
    /// 주소
    address: ProxyAddress,
    /// 연결 핸들
    handle: Arc<dyn ProxyHandle>,
    /// 생존 여부
    alive: AtomicBool,
    /// 가중치 (f64 비트)
    weight: AtomicU64,
}

impl Destination {
    /// 새 목적지 생성 (생존 상태로 시작)
    pub fn new(address: ProxyAddress, handle: Arc<dyn ProxyHandle>) -> Self {
        Self {
            address,
            handle,
            alive: AtomicBool::new(true),
            weight: AtomicU64::new(UNKNOWN_WEIGHT.to_bits()),
        }
    }

    /// 주소
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    /// 연결 핸들
    pub fn handle(&self) -> &Arc<dyn ProxyHandle> {
        &self.handle
    }

    /// 생존 여부
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 생존 여부 설정
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// 가중치 (미측정이면 `UNKNOWN_WEIGHT`)
    pub fn weight(&self) -> f64 {
        f64::from_bits(self.weight.load(Ordering::Acquire))
    }

    /// 가중치 설정
    pub fn set_weight(&self, weight: f64) {
        self.weight.store(weight.to_bits(), Ordering::Release);
    }

    /// 생존 확인 후 상태 갱신
    ///
    /// 성공하면 응답 시간으로 가중치를 계산합니다 (`1000 / ms`).
    pub async fn probe(&self, timeout: Duration) -> DriverResult<()> {
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.handle.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::timeout(format!("ping {}", self.address))),
        };

        match result {
            Ok(()) => {
                let millis = (started.elapsed().as_secs_f64() * 1000.0).max(0.001);
                self.set_weight(1000.0 / millis);
                self.set_alive(true);
                Ok(())
            }
            Err(e) => {
                self.set_alive(false);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("address", &self.address)
            .field("alive", &self.is_alive())
            .field("weight", &self.weight())
            .finish()
    }
}

// ============================================================================
// DataCenter - 데이터센터
// ============================================================================

/// 데이터센터
///
/// 목록 변경은 조회 서비스 하나만 수행합니다.
pub struct DataCenter {
    /// 이름
    name: String,
    /// 로컬 여부
    is_local: bool,
    /// 가중치 (f64 비트)
    weight: AtomicU64,
    /// 목적지 스냅샷
    destinations: RwLock<Arc<Vec<Arc<Destination>>>>,
}

impl DataCenter {
    /// 새 데이터센터 생성
    pub fn new(name: impl Into<String>, is_local: bool) -> Self {
        Self {
            name: name.into(),
            is_local,
            weight: AtomicU64::new(UNKNOWN_WEIGHT.to_bits()),
            destinations: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// 이름
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 로컬 여부
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// 가중치 (목적지 가중치 평균)
    pub fn weight(&self) -> f64 {
        f64::from_bits(self.weight.load(Ordering::Acquire))
    }

    /// 가중치 설정
    pub fn set_weight(&self, weight: f64) {
        self.weight.store(weight.to_bits(), Ordering::Release);
    }

    /// 전체 목적지 스냅샷
    pub fn destinations(&self) -> Arc<Vec<Arc<Destination>>> {
        self.destinations.read().clone()
    }

    /// 현재 주소 집합
    pub fn addresses(&self) -> HashSet<ProxyAddress> {
        self.destinations()
            .iter()
            .map(|d| d.address().clone())
            .collect()
    }

    /// 목적지 추가 (이미 있는 주소는 무시)
    pub fn add_destinations(&self, added: Vec<Arc<Destination>>) {
        self.apply_delta(added, &[]);
    }

    /// 목적지 제거 (제거된 목적지 반환)
    pub fn remove_destinations(&self, removed: &[ProxyAddress]) -> Vec<Arc<Destination>> {
        self.apply_delta(Vec::new(), removed)
    }

    /// 추가/제거를 한 번에 반영
    ///
    /// 새 목록을 만든 뒤 쓰기 잠금 안에서 교체하므로, 읽는 쪽은 변경 전 또는
    /// 변경 후 목록만 봅니다.
    pub fn apply_delta(
        &self,
        added: Vec<Arc<Destination>>,
        removed: &[ProxyAddress],
    ) -> Vec<Arc<Destination>> {
        let removed: HashSet<&ProxyAddress> = removed.iter().collect();

        let mut guard = self.destinations.write();
        let mut next = Vec::with_capacity(guard.len() + added.len());
        let mut dropped = Vec::new();

        for destination in guard.iter() {
            if removed.contains(destination.address()) {
                dropped.push(destination.clone());
            } else {
                next.push(destination.clone());
            }
        }

        for destination in added {
            if !next.iter().any(|d| d.address() == destination.address()) {
                next.push(destination);
            }
        }

        *guard = Arc::new(next);
        dropped
    }

    /// 살아있는 목적지 스냅샷
    pub fn snapshot_alive(&self) -> Vec<Arc<Destination>> {
        self.destinations()
            .iter()
            .filter(|d| d.is_alive())
            .cloned()
            .collect()
    }

    /// 살아있는 목적지 수
    pub fn alive_count(&self) -> usize {
        self.destinations().iter().filter(|d| d.is_alive()).count()
    }

    /// 살아있는 목적지가 있는지 확인
    pub fn has_alive(&self) -> bool {
        self.destinations().iter().any(|d| d.is_alive())
    }

    /// 모든 목적지 생존 확인
    ///
    /// 실패한 주소와 에러 목록을 반환합니다. 실패는 상태만 바꾸고 전파하지 않습니다.
    pub async fn ping(&self, timeout: Duration) -> Vec<(ProxyAddress, DriverError)> {
        let snapshot = self.destinations();
        let results = join_all(snapshot.iter().map(|d| d.probe(timeout))).await;

        let failures = snapshot
            .iter()
            .zip(results)
            .filter_map(|(d, result)| result.err().map(|e| (d.address().clone(), e)))
            .collect();

        self.recompute_weight();
        failures
    }

    /// 가중치 재계산
    fn recompute_weight(&self) {
        let known: Vec<f64> = self
            .destinations()
            .iter()
            .filter(|d| d.is_alive())
            .map(|d| d.weight())
            .filter(|w| *w >= 0.0)
            .collect();

        let weight = if known.is_empty() {
            UNKNOWN_WEIGHT
        } else {
            known.iter().sum::<f64>() / known.len() as f64
        };
        self.set_weight(weight);
    }

    /// 모든 목적지 해제
    pub async fn close(&self) {
        let drained = std::mem::replace(&mut *self.destinations.write(), Arc::new(Vec::new()));
        join_all(drained.iter().map(|d| d.handle().close())).await;
    }
}

impl fmt::Debug for DataCenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCenter")
            .field("name", &self.name)
            .field("is_local", &self.is_local)
            .field("weight", &self.weight())
            .field("destinations", &self.destinations().len())
            .finish()
    }
}
