//! 라우팅 모듈
//!
//! 데이터센터별로 프록시 목록을 유지하고 요청마다 후보를 고릅니다.
//!
//! # 개요
//!
//! - `DiscoveryService`: 주기적으로 프록시 목록을 조회해 데이터센터에 반영
//! - `DataCenter`: 프록시(`Destination`) 집합과 생존 상태, 가중치
//! - `DestinationSelector`: 로컬 데이터센터 우선, 가중치 순으로 후보 선택
//! - `RoutingClient`: 위 구성 요소를 소유하고 요청을 전송 계층에 넘김
//!
//! # 예시
//!
//! ```ignore
//! use rpc_proxy_driver::driver::routing::RoutingClient;
//!
//! let client = RoutingClient::new(config, connector)?;
//!
//! // 살아있는 프록시가 생길 때까지 대기
//! client.wait_until_ready().await;
//!
//! for (dc, alive) in client.alive_destinations_snapshot() {
//!     println!("{}: {} alive", dc, alive.len());
//! }
//! ```

mod client;
mod data_center;
mod discovery;
mod selector;

pub use client::{ReadyFuture, RoutingClient, RoutingClientBuilder};
pub use data_center::{DataCenter, Destination, UNKNOWN_WEIGHT};
pub use discovery::{
    DiscoveryDelta, DiscoveryEvent, DiscoveryService, DiscoveryState, ProxyDirectory,
    RpcProxyDirectory, StaticDirectory,
};
pub use selector::{DestinationSelector, SelectionPolicy};
