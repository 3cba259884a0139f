//! 트랜잭션
//!
//! 서버가 발급한 트랜잭션 ID를 요청마다 붙여 라우팅 클라이언트로 보냅니다.
//! 어떤 프록시가 받아도 같은 트랜잭션으로 처리됩니다.

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{DriverError, DriverResult};
use super::request::{ApiRequest, TransactionId, TransactionalClient};
use super::routing::RoutingClient;
use super::streaming::{TableReader, TableWriter};

// ============================================================================
// TransactionState - 트랜잭션 상태
// ============================================================================

/// 트랜잭션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// 활성 상태
    Active,
    /// 커밋됨
    Committed,
    /// 중단됨
    Aborted,
    /// 실패 (서버가 더 이상 트랜잭션을 인정하지 않음)
    Failed,
}

impl TransactionState {
    /// 완료 상태 여부
    pub fn is_terminated(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

// ============================================================================
// Transaction - 트랜잭션
// ============================================================================

/// 명시적 트랜잭션
///
/// 커밋이나 중단 없이 버려지면 백그라운드에서 중단 요청을 보냅니다.
pub struct Transaction {
    id: TransactionId,
    client: RoutingClient,
    state: Mutex<TransactionState>,
}

impl Transaction {
    pub(crate) fn new(client: RoutingClient, id: TransactionId) -> Self {
        debug!(transaction = %id, "transaction started");
        Self {
            id,
            client,
            state: Mutex::new(TransactionState::Active),
        }
    }

    /// 트랜잭션 ID
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// 현재 상태
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// 커밋
    pub async fn commit(self) -> DriverResult<()> {
        self.ensure_active()?;

        let request = ApiRequest::CommitTransaction {
            transaction_id: self.id.clone(),
        };
        match self.client.execute(request).await {
            Ok(_) => {
                self.set_state(TransactionState::Committed);
                debug!(transaction = %self.id, "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.set_state(TransactionState::Failed);
                Err(e)
            }
        }
    }

    /// 중단
    ///
    /// 이미 끝난 트랜잭션이면 아무것도 하지 않습니다.
    pub async fn abort(self) -> DriverResult<()> {
        if self.state().is_terminated() {
            return Ok(());
        }

        let request = ApiRequest::AbortTransaction {
            transaction_id: self.id.clone(),
        };
        match self.client.execute(request).await {
            Ok(_) => {
                self.set_state(TransactionState::Aborted);
                debug!(transaction = %self.id, "transaction aborted");
                Ok(())
            }
            Err(e) => {
                self.set_state(TransactionState::Failed);
                Err(e)
            }
        }
    }

    /// 만료 연장
    ///
    /// 서버가 거부하면(재시도 불가 에러) 트랜잭션은 실패 상태가 됩니다.
    pub async fn ping(&self) -> DriverResult<()> {
        self.ensure_active()?;

        let request = ApiRequest::PingTransaction {
            transaction_id: self.id.clone(),
        };
        match self.client.execute(request).await {
            Ok(_) => Ok(()),
            Err(e) => {
                if !e.is_retryable() {
                    self.set_state(TransactionState::Failed);
                }
                Err(e)
            }
        }
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// 활성 상태 확인
    fn ensure_active(&self) -> DriverResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(DriverError::transaction("Transaction already committed"))
            }
            TransactionState::Aborted => {
                Err(DriverError::transaction("Transaction already aborted"))
            }
            TransactionState::Failed => {
                Err(DriverError::transaction("Transaction in failed state"))
            }
        }
    }
}

#[async_trait]
impl TransactionalClient for Transaction {
    async fn execute(&self, request: ApiRequest) -> DriverResult<Value> {
        self.ensure_active()?;
        let envelope = request.into_envelope()?.in_transaction(self.id.clone());
        self.client.execute_envelope(envelope).await
    }

    async fn read_table(&self, path: &str) -> DriverResult<TableReader> {
        self.ensure_active()?;
        let envelope = ApiRequest::ReadTable { path: path.into() }
            .into_envelope()?
            .in_transaction(self.id.clone());
        self.client.open_table_reader(envelope).await
    }

    async fn write_table(&self, path: &str) -> DriverResult<TableWriter> {
        self.ensure_active()?;
        let envelope = ApiRequest::WriteTable { path: path.into() }
            .into_envelope()?
            .in_transaction(self.id.clone());
        self.client.open_table_writer(envelope).await
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state().is_terminated() || !self.client.is_open() {
            return;
        }

        warn!(transaction = %self.id, "transaction dropped while active, aborting");
        let client = self.client.clone();
        let transaction_id = self.id.clone();
        self.client.runtime().spawn(async move {
            let request = ApiRequest::AbortTransaction {
                transaction_id: transaction_id.clone(),
            };
            if let Err(e) = client.execute(request).await {
                debug!(transaction = %transaction_id, error = %e, "abort on drop failed");
            }
        });
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
