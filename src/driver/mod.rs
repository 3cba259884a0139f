//! Driver Module
//!
//! RPC 프록시를 거쳐 클러스터에 접속하는 클라이언트 드라이버
//!
//! # 구성
//!
//! - 설정: 데이터센터 목록, 인증 정보, 주기, 스트림 한도 (`ClientConfig`)
//! - 라우팅: 데이터센터별 프록시 조회, 생존 확인, 후보 선택 (`routing`)
//! - 전송: 후보 순서대로 시도하는 페일오버 (`FailoverTransport`)
//! - 스트림: 백프레셔가 있는 테이블 읽기/쓰기 (`TableReader`, `TableWriter`)
//! - 트랜잭션: 트랜잭션 ID를 붙여 보내는 요청 (`Transaction`)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rpc_proxy_driver::driver::{
//!     ClientConfig, ClusterSpec, Credentials, ProxyAddress, TcpProxyConnector,
//!     TransactionalClient,
//! };
//! use rpc_proxy_driver::driver::routing::RoutingClient;
//!
//! let config = ClientConfig::builder()
//!     .with_cluster(ClusterSpec::new("vla").with_balancer(ProxyAddress::parse("vla-balancer")?))
//!     .with_cluster(ClusterSpec::new("sas").with_balancer(ProxyAddress::parse("sas-balancer")?))
//!     .with_local_data_center("vla")
//!     .build()?;
//!
//! let connector = Arc::new(TcpProxyConnector::new(Credentials::token("secret")));
//! let client = RoutingClient::new(config, connector)?;
//! client.wait_until_ready().await;
//!
//! // 노드 조회
//! let value = client.get_node("//home/user/table/@row_count").await?;
//!
//! // 테이블 쓰기
//! let mut writer = client.write_table("//home/user/table").await?;
//! writer.write(rows)?;
//! writer.close().await?;
//!
//! // 트랜잭션
//! let tx = client.start_transaction(Default::default()).await?;
//! tx.set_node("//home/user/flag", true.into()).await?;
//! tx.commit().await?;
//!
//! client.close().await;
//! ```

pub mod routing;
pub mod tcp;
mod config;
mod error;
mod logging;
mod request;
mod streaming;
mod transaction;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use config::{
    ClientConfig, ClientConfigBuilder, ClusterSpec, Credentials, FailoverPolicy, ProxyAddress,
    StreamConfig, DEFAULT_DISPATCH_FANOUT, DEFAULT_PROXY_PORT,
};
pub use error::{DriverError, DriverResult};
pub use logging::init_logging;
pub use request::{
    parse_response, ApiRequest, CopyOptions, CreateOptions, MutationId, RemoveOptions,
    RequestEnvelope, Row, TransactionId, TransactionOptions, TransactionalClient,
};
pub use streaming::{RowStream, StreamState, TableReader, TableWriter};
pub use tcp::{TcpProxyConnector, TcpProxyHandle};
pub use transaction::{Transaction, TransactionState};
pub use transport::{
    FailoverTransport, ProxyConnector, ProxyHandle, RowSink, RowSource, Transport,
};
