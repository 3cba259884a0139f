//! Transport
//!
//! 프록시 연결 추상화와 후보 순서대로 시도하는 전송 계층

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::config::ProxyAddress;
use super::error::{DriverError, DriverResult};
use super::request::{RequestEnvelope, Row};
use super::routing::Destination;

// ============================================================================
// Stream endpoints - 스트림 끝점
// ============================================================================

/// 서버로 행을 보내는 쓰기 스트림 끝점
#[async_trait]
pub trait RowSink: Send {
    /// 행 묶음 전송 (서버 확인까지 대기)
    async fn send_batch(&mut self, rows: Vec<Row>) -> DriverResult<()>;

    /// 정상 종료
    async fn finish(&mut self) -> DriverResult<()>;

    /// 전송 포기 (서버에 취소 통지)
    async fn abort(&mut self) -> DriverResult<()>;
}

/// 서버에서 행을 받는 읽기 스트림 끝점
#[async_trait]
pub trait RowSource: Send {
    /// 다음 행 묶음 (`None`이면 스트림 끝)
    async fn next_batch(&mut self) -> DriverResult<Option<Vec<Row>>>;

    /// 서버 스트림 취소
    async fn cancel(&mut self) -> DriverResult<()>;
}

// ============================================================================
// ProxyHandle / ProxyConnector - 프록시 연결
// ============================================================================

/// 하나의 프록시에 대한 연결 핸들
#[async_trait]
pub trait ProxyHandle: Send + Sync {
    /// 프록시 주소
    fn address(&self) -> &ProxyAddress;

    /// 단건 요청
    async fn call(&self, request: &RequestEnvelope) -> DriverResult<Bytes>;

    /// 생존 확인
    async fn ping(&self) -> DriverResult<()>;

    /// 테이블 쓰기 스트림 열기
    async fn open_table_writer(&self, request: &RequestEnvelope) -> DriverResult<Box<dyn RowSink>>;

    /// 테이블 읽기 스트림 열기
    async fn open_table_reader(&self, request: &RequestEnvelope) -> DriverResult<Box<dyn RowSource>>;

    /// 연결 해제
    async fn close(&self);
}

/// 프록시 연결 생성기
#[async_trait]
pub trait ProxyConnector: Send + Sync {
    /// 주소로 연결
    async fn connect(&self, address: &ProxyAddress) -> DriverResult<Arc<dyn ProxyHandle>>;
}

// ============================================================================
// Transport - 전송 계층
// ============================================================================

/// 후보 목록을 받아 요청을 전송하는 계층
#[async_trait]
pub trait Transport: Send + Sync {
    /// 후보 순서대로 요청 전송
    async fn send_over_ordered(
        &self,
        candidates: &[Arc<Destination>],
        request: &RequestEnvelope,
    ) -> DriverResult<Bytes>;
}

/// 기본 페일오버 전송
///
/// 후보를 순서대로 시도하며, 재시도 가능한 에러일 때만 다음 후보로 넘어갑니다.
/// 재시도 불가 요청은 첫 후보에만 보냅니다.
#[derive(Debug, Clone, Default)]
pub struct FailoverTransport;

impl FailoverTransport {
    /// 새 전송 계층 생성
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for FailoverTransport {
    async fn send_over_ordered(
        &self,
        candidates: &[Arc<Destination>],
        request: &RequestEnvelope,
    ) -> DriverResult<Bytes> {
        let limit = if request.retryable { candidates.len() } else { 1 };
        let mut attempts = 0;
        let mut last = None;

        for destination in candidates.iter().take(limit) {
            attempts += 1;
            match destination.handle().call(request).await {
                Ok(body) => {
                    debug!(
                        method = %request.method,
                        proxy = %destination.address(),
                        attempts,
                        "request succeeded"
                    );
                    return Ok(body);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        method = %request.method,
                        proxy = %destination.address(),
                        error = %e,
                        "request failed, trying next candidate"
                    );
                    last = Some(e);
                }
                // 서버가 확정적으로 거절한 요청은 그대로 반환
                Err(e) => return Err(e),
            }
        }

        match last {
            Some(last) => Err(DriverError::TransportFailure {
                attempts,
                last: Box::new(last),
            }),
            None => Err(DriverError::NoAliveDestinations),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
