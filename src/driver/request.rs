//! Requests
//!
//! API 요청 정의, 요청 봉투(envelope), 트랜잭션 클라이언트 트레이트

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::{DriverError, DriverResult};
use super::streaming::{TableReader, TableWriter};

/// 테이블 행 (컬럼 값 목록)
pub type Row = Vec<Value>;

// ============================================================================
// Identifiers - 식별자
// ============================================================================

/// 변경 요청 식별자
///
/// 하나의 논리적 변경 호출마다 한 번 생성되고 모든 재시도에서 그대로 재사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// 새 식별자 생성
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// UUID 값
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 트랜잭션 식별자 (서버가 부여)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// 새 식별자
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 문자열 값
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Options - 요청별 옵션
// ============================================================================

/// 노드 생성 옵션
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// 상위 노드까지 생성
    pub recursive: bool,
    /// 이미 있으면 무시
    pub ignore_existing: bool,
    /// 생성 시 속성
    pub attributes: Option<Value>,
}

impl CreateOptions {
    /// 상위 노드 생성 설정
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 기존 노드 무시 설정
    pub fn with_ignore_existing(mut self, ignore: bool) -> Self {
        self.ignore_existing = ignore;
        self
    }

    /// 속성 설정
    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// 노드 삭제 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveOptions {
    /// 하위 노드까지 삭제
    pub recursive: bool,
    /// 없어도 성공
    pub force: bool,
}

impl RemoveOptions {
    /// 재귀 삭제 설정
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 강제 삭제 설정
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// 복사/이동/링크 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyOptions {
    /// 상위 노드까지 생성
    pub recursive: bool,
    /// 대상이 있으면 덮어쓰기
    pub force: bool,
}

impl CopyOptions {
    /// 상위 노드 생성 설정
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// 덮어쓰기 설정
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// 트랜잭션 시작 옵션
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// 트랜잭션 타임아웃 (밀리초)
    pub timeout_ms: Option<u64>,
    /// 상위 트랜잭션
    pub parent: Option<TransactionId>,
}

impl TransactionOptions {
    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// 상위 트랜잭션 설정
    pub fn with_parent(mut self, parent: TransactionId) -> Self {
        self.parent = Some(parent);
        self
    }
}

// ============================================================================
// ApiRequest - API 요청
// ============================================================================

/// API 요청
///
/// 각 변형이 하나의 RPC 메서드에 대응합니다. 직렬화하면 `method` 태그가 붙은
/// JSON 객체가 됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ApiRequest {
    GetNode {
        path: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attributes: Vec<String>,
    },
    SetNode {
        path: String,
        value: Value,
    },
    CreateNode {
        path: String,
        node_type: String,
        #[serde(flatten)]
        options: CreateOptions,
    },
    RemoveNode {
        path: String,
        #[serde(flatten)]
        options: RemoveOptions,
    },
    ExistsNode {
        path: String,
    },
    ListNode {
        path: String,
    },
    CopyNode {
        source: String,
        destination: String,
        #[serde(flatten)]
        options: CopyOptions,
    },
    MoveNode {
        source: String,
        destination: String,
        #[serde(flatten)]
        options: CopyOptions,
    },
    LinkNode {
        target: String,
        link: String,
        #[serde(flatten)]
        options: CopyOptions,
    },
    ConcatenateNodes {
        sources: Vec<String>,
        destination: String,
    },
    LookupRows {
        path: String,
        keys: Vec<Row>,
    },
    SelectRows {
        query: String,
    },
    ModifyRows {
        path: String,
        #[serde(default)]
        upserts: Vec<Row>,
        #[serde(default)]
        deletes: Vec<Row>,
    },
    StartOperation {
        operation_type: String,
        spec: Value,
    },
    CheckPermission {
        user: String,
        permission: String,
        path: String,
    },
    StartTransaction {
        #[serde(flatten)]
        options: TransactionOptions,
    },
    CommitTransaction {
        transaction_id: TransactionId,
    },
    AbortTransaction {
        transaction_id: TransactionId,
    },
    PingTransaction {
        transaction_id: TransactionId,
    },
    ReadTable {
        path: String,
    },
    WriteTable {
        path: String,
    },
    DiscoverProxies {
        role: String,
    },
}

impl ApiRequest {
    /// 노드 조회
    pub fn get_node(path: impl Into<String>) -> Self {
        Self::GetNode {
            path: path.into(),
            attributes: Vec::new(),
        }
    }

    /// 노드 값 설정
    pub fn set_node(path: impl Into<String>, value: Value) -> Self {
        Self::SetNode {
            path: path.into(),
            value,
        }
    }

    /// 노드 생성
    pub fn create_node(
        path: impl Into<String>,
        node_type: impl Into<String>,
        options: CreateOptions,
    ) -> Self {
        Self::CreateNode {
            path: path.into(),
            node_type: node_type.into(),
            options,
        }
    }

    /// 노드 삭제
    pub fn remove_node(path: impl Into<String>, options: RemoveOptions) -> Self {
        Self::RemoveNode {
            path: path.into(),
            options,
        }
    }

    /// 프록시 목록 조회
    pub fn discover_proxies(role: impl Into<String>) -> Self {
        Self::DiscoverProxies { role: role.into() }
    }

    /// RPC 메서드 이름
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetNode { .. } => "get_node",
            Self::SetNode { .. } => "set_node",
            Self::CreateNode { .. } => "create_node",
            Self::RemoveNode { .. } => "remove_node",
            Self::ExistsNode { .. } => "exists_node",
            Self::ListNode { .. } => "list_node",
            Self::CopyNode { .. } => "copy_node",
            Self::MoveNode { .. } => "move_node",
            Self::LinkNode { .. } => "link_node",
            Self::ConcatenateNodes { .. } => "concatenate_nodes",
            Self::LookupRows { .. } => "lookup_rows",
            Self::SelectRows { .. } => "select_rows",
            Self::ModifyRows { .. } => "modify_rows",
            Self::StartOperation { .. } => "start_operation",
            Self::CheckPermission { .. } => "check_permission",
            Self::StartTransaction { .. } => "start_transaction",
            Self::CommitTransaction { .. } => "commit_transaction",
            Self::AbortTransaction { .. } => "abort_transaction",
            Self::PingTransaction { .. } => "ping_transaction",
            Self::ReadTable { .. } => "read_table",
            Self::WriteTable { .. } => "write_table",
            Self::DiscoverProxies { .. } => "discover_proxies",
        }
    }

    /// 클러스터 상태를 바꾸는 요청인지 여부
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::SetNode { .. }
                | Self::CreateNode { .. }
                | Self::RemoveNode { .. }
                | Self::CopyNode { .. }
                | Self::MoveNode { .. }
                | Self::LinkNode { .. }
                | Self::ConcatenateNodes { .. }
                | Self::ModifyRows { .. }
                | Self::StartOperation { .. }
                | Self::StartTransaction { .. }
                | Self::CommitTransaction { .. }
                | Self::AbortTransaction { .. }
                | Self::WriteTable { .. }
        )
    }

    /// 요청 봉투로 변환
    pub fn into_envelope(self) -> DriverResult<RequestEnvelope> {
        RequestEnvelope::from_request(&self)
    }
}

// ============================================================================
// RequestEnvelope - 요청 봉투
// ============================================================================

/// 전송 계층에 넘기는 요청
///
/// `mutation_id`는 변경 요청에만 있고, 재시도 시 그대로 유지됩니다.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// 메서드 이름
    pub method: String,
    /// 직렬화된 요청 본문
    pub payload: Bytes,
    /// 변경 요청 식별자
    pub mutation_id: Option<MutationId>,
    /// 소속 트랜잭션
    pub transaction_id: Option<TransactionId>,
    /// 다른 후보로 재시도 가능 여부
    pub retryable: bool,
}

impl RequestEnvelope {
    /// 요청에서 생성
    pub fn from_request(request: &ApiRequest) -> DriverResult<Self> {
        let payload = serde_json::to_vec(request)?;
        Ok(Self {
            method: request.method_name().to_string(),
            payload: Bytes::from(payload),
            mutation_id: request.is_mutating().then(MutationId::generate),
            transaction_id: None,
            retryable: true,
        })
    }

    /// 트랜잭션 지정
    pub fn in_transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// 재시도 가능 여부 설정
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// 요청 본문 역직렬화
    pub fn decode_request(&self) -> DriverResult<ApiRequest> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// 응답 본문 파싱 (빈 본문은 `null`)
pub fn parse_response(body: &[u8]) -> DriverResult<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}

// ============================================================================
// TransactionalClient - 트랜잭션 클라이언트
// ============================================================================

/// 요청 실행 기능
///
/// `execute`, `read_table`, `write_table`만 구현하면 나머지 메서드는 기본
/// 구현을 사용합니다. 라우팅 클라이언트와 트랜잭션이 모두 구현합니다.
#[async_trait]
pub trait TransactionalClient: Send + Sync {
    /// 요청 실행
    async fn execute(&self, request: ApiRequest) -> DriverResult<Value>;

    /// 테이블 읽기 스트림 열기
    async fn read_table(&self, path: &str) -> DriverResult<TableReader>;

    /// 테이블 쓰기 스트림 열기
    async fn write_table(&self, path: &str) -> DriverResult<TableWriter>;

    /// 노드 조회
    async fn get_node(&self, path: &str) -> DriverResult<Value> {
        self.execute(ApiRequest::get_node(path)).await
    }

    /// 노드 값 설정
    async fn set_node(&self, path: &str, value: Value) -> DriverResult<()> {
        self.execute(ApiRequest::set_node(path, value)).await?;
        Ok(())
    }

    /// 노드 생성 (노드 ID 반환)
    async fn create_node(
        &self,
        path: &str,
        node_type: &str,
        options: CreateOptions,
    ) -> DriverResult<Value> {
        self.execute(ApiRequest::create_node(path, node_type, options))
            .await
    }

    /// 노드 삭제
    async fn remove_node(&self, path: &str, options: RemoveOptions) -> DriverResult<()> {
        self.execute(ApiRequest::remove_node(path, options)).await?;
        Ok(())
    }

    /// 노드 존재 여부
    async fn exists_node(&self, path: &str) -> DriverResult<bool> {
        let value = self
            .execute(ApiRequest::ExistsNode { path: path.into() })
            .await?;
        value
            .as_bool()
            .ok_or_else(|| DriverError::protocol(format!("exists_node returned {}", value)))
    }

    /// 하위 노드 목록
    async fn list_node(&self, path: &str) -> DriverResult<Vec<String>> {
        let value = self
            .execute(ApiRequest::ListNode { path: path.into() })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// 노드 복사
    async fn copy_node(
        &self,
        source: &str,
        destination: &str,
        options: CopyOptions,
    ) -> DriverResult<Value> {
        self.execute(ApiRequest::CopyNode {
            source: source.into(),
            destination: destination.into(),
            options,
        })
        .await
    }

    /// 노드 이동
    async fn move_node(
        &self,
        source: &str,
        destination: &str,
        options: CopyOptions,
    ) -> DriverResult<Value> {
        self.execute(ApiRequest::MoveNode {
            source: source.into(),
            destination: destination.into(),
            options,
        })
        .await
    }

    /// 링크 생성
    async fn link_node(&self, target: &str, link: &str, options: CopyOptions) -> DriverResult<Value> {
        self.execute(ApiRequest::LinkNode {
            target: target.into(),
            link: link.into(),
            options,
        })
        .await
    }

    /// 테이블 이어붙이기
    async fn concatenate_nodes(&self, sources: Vec<String>, destination: &str) -> DriverResult<()> {
        self.execute(ApiRequest::ConcatenateNodes {
            sources,
            destination: destination.into(),
        })
        .await?;
        Ok(())
    }

    /// 키로 행 조회
    async fn lookup_rows(&self, path: &str, keys: Vec<Row>) -> DriverResult<Vec<Row>> {
        let value = self
            .execute(ApiRequest::LookupRows {
                path: path.into(),
                keys,
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// 쿼리로 행 조회
    async fn select_rows(&self, query: &str) -> DriverResult<Vec<Row>> {
        let value = self
            .execute(ApiRequest::SelectRows {
                query: query.into(),
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// 행 변경
    async fn modify_rows(&self, path: &str, upserts: Vec<Row>, deletes: Vec<Row>) -> DriverResult<()> {
        self.execute(ApiRequest::ModifyRows {
            path: path.into(),
            upserts,
            deletes,
        })
        .await?;
        Ok(())
    }

    /// 오퍼레이션 시작 (오퍼레이션 ID 반환)
    async fn start_operation(&self, operation_type: &str, spec: Value) -> DriverResult<Value> {
        self.execute(ApiRequest::StartOperation {
            operation_type: operation_type.into(),
            spec,
        })
        .await
    }

    /// 권한 확인
    async fn check_permission(&self, user: &str, permission: &str, path: &str) -> DriverResult<Value> {
        self.execute(ApiRequest::CheckPermission {
            user: user.into(),
            permission: permission.into(),
            path: path.into(),
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names() {
        assert_eq!(ApiRequest::get_node("//tmp").method_name(), "get_node");
        assert_eq!(
            ApiRequest::discover_proxies("data").method_name(),
            "discover_proxies"
        );
        assert_eq!(
            ApiRequest::ModifyRows {
                path: "//t".into(),
                upserts: vec![],
                deletes: vec![]
            }
            .method_name(),
            "modify_rows"
        );
    }

    #[test]
    fn test_payload_is_tagged_json() {
        let request = ApiRequest::create_node(
            "//home/a",
            "table",
            CreateOptions::default().with_recursive(true),
        );
        let envelope = request.clone().into_envelope().unwrap();
        let payload: Value = serde_json::from_slice(&envelope.payload).unwrap();

        assert_eq!(payload["method"], "create_node");
        assert_eq!(payload["path"], "//home/a");
        assert_eq!(payload["recursive"], true);
        assert_eq!(envelope.decode_request().unwrap(), request);
    }

    #[test]
    fn test_mutation_id_only_for_mutating() {
        let read = ApiRequest::get_node("//tmp").into_envelope().unwrap();
        assert!(read.mutation_id.is_none());
        assert!(read.retryable);

        let write = ApiRequest::set_node("//tmp/x", json!(1))
            .into_envelope()
            .unwrap();
        assert!(write.mutation_id.is_some());

        // 재시도는 봉투를 복제하므로 ID가 유지됨
        let retry = write.clone();
        assert_eq!(retry.mutation_id, write.mutation_id);

        let other = ApiRequest::set_node("//tmp/x", json!(1))
            .into_envelope()
            .unwrap();
        assert_ne!(other.mutation_id, write.mutation_id);
    }

    #[test]
    fn test_envelope_transaction() {
        let envelope = ApiRequest::get_node("//tmp")
            .into_envelope()
            .unwrap()
            .in_transaction(TransactionId::new("1-2-3-4"))
            .with_retryable(false);

        assert_eq!(envelope.transaction_id.as_ref().map(|t| t.as_str()), Some("1-2-3-4"));
        assert!(!envelope.retryable);
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response(b"").unwrap(), Value::Null);
        assert_eq!(parse_response(br#"{"a":1}"#).unwrap(), json!({"a": 1}));
        assert!(matches!(
            parse_response(b"{oops"),
            Err(DriverError::Serialization(_))
        ));
    }
}
