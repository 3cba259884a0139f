//! # RPC Proxy Driver
//!
//! Client-side routing and transport core for a tabular cluster that is
//! reachable only through RPC proxies grouped by data center.
//!
//! ## Features
//!
//! - **Discovery** - Per data center proxy lists, refreshed from a balancer or static seeds
//! - **Liveness** - Periodic pings mark proxies dead or alive and weight them by latency
//! - **Locality** - Local data center first, remote data centers by weight
//! - **Failover** - Ordered candidates, retry on transient errors, stable mutation ids
//! - **Streaming** - Table readers and writers with bounded buffers and backpressure
//! - **Transactions** - Server-side transactions usable through any proxy
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rpc_proxy_driver::driver::routing::RoutingClient;
//! use rpc_proxy_driver::driver::{
//!     ClientConfig, ClusterSpec, Credentials, ProxyAddress, TcpProxyConnector,
//!     TransactionalClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .with_cluster(ClusterSpec::new("vla").with_seed(ProxyAddress::parse("vla-proxy-1")?))
//!         .with_cluster(ClusterSpec::new("sas").with_seed(ProxyAddress::parse("sas-proxy-1")?))
//!         .with_local_data_center("vla")
//!         .with_log_filter("info")
//!         .build()?;
//!
//!     let connector = Arc::new(TcpProxyConnector::new(Credentials::token("secret")));
//!     let client = RoutingClient::new(config, connector)?;
//!     client.wait_until_ready().await;
//!
//!     let exists = client.exists_node("//home/user").await?;
//!     println!("exists: {}", exists);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Table Streams
//!
//! ```rust,no_run
//! # use rpc_proxy_driver::driver::routing::RoutingClient;
//! # use rpc_proxy_driver::driver::TransactionalClient;
//! # async fn example(client: RoutingClient) -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = client.write_table("//home/user/table").await?;
//! for chunk in 0..10 {
//!     // Wait for the buffer to drain below the low-water mark
//!     writer.ready_event().await?;
//!     writer.write(vec![vec![serde_json::json!(chunk)]])?;
//! }
//! writer.close().await?;
//!
//! let mut reader = client.read_table("//home/user/table").await?;
//! while let Some(rows) = reader.next_rows().await? {
//!     println!("{} rows", rows.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Configuration, routing client, streams and transactions
//! - [`wire`] - Frame format spoken with RPC proxies
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;
pub mod wire;

// Re-exports for convenience
pub use driver::routing::{RoutingClient, RoutingClientBuilder};
pub use driver::{
    ApiRequest, ClientConfig, ClientConfigBuilder, ClusterSpec, Credentials, DriverError,
    DriverResult, ProxyAddress, TableReader, TableWriter, TcpProxyConnector, Transaction,
    TransactionalClient,
};

pub use wire::{Frame, FrameCodec, FrameKind, WireError};

/// Config alias for convenience
pub type Config = ClientConfig;
