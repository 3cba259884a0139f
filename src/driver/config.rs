//! Client Configuration
//!
//! 클라이언트 설정 (클러스터, 인증, 주기, 스트림 한도)

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use super::logging::parse_filter;

/// 기본 프록시 포트
pub const DEFAULT_PROXY_PORT: u16 = 9013;

/// 기본 디스패치 후보 수
pub const DEFAULT_DISPATCH_FANOUT: usize = 3;

// ============================================================================
// Credentials - 인증 정보
// ============================================================================

/// 인증 정보
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum Credentials {
    /// 인증 없음
    #[default]
    None,
    /// 토큰 인증
    Token { token: String },
    /// 사용자명/비밀번호
    Password { user: String, password: String },
}

impl Credentials {
    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 토큰 인증 생성
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
        }
    }

    /// 비밀번호 인증 생성
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Password {
            user: user.into(),
            password: password.into(),
        }
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Token { .. } => "token",
            Self::Password { .. } => "password",
        }
    }
}

// ============================================================================
// ProxyAddress - 프록시 주소
// ============================================================================

/// 프록시 주소 (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProxyAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ProxyAddress {
    /// 새 프록시 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 문자열에서 파싱
    ///
    /// 포트가 없으면 기본 포트를 사용합니다.
    pub fn parse(s: &str) -> DriverResult<Self> {
        let s = s.trim().trim_start_matches("http://");
        if s.is_empty() {
            return Err(DriverError::configuration("Empty proxy address"));
        }

        match s.rsplit_once(':') {
            None => Ok(Self::new(s, DEFAULT_PROXY_PORT)),
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(DriverError::configuration(format!(
                        "Invalid proxy address: {}",
                        s
                    )));
                }
                let port = port.parse().map_err(|_| {
                    DriverError::configuration(format!("Invalid port in proxy address: {}", s))
                })?;
                Ok(Self::new(host, port))
            }
        }
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl TryFrom<String> for ProxyAddress {
    type Error = DriverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProxyAddress> for String {
    fn from(addr: ProxyAddress) -> Self {
        addr.to_string()
    }
}

// ============================================================================
// ClusterSpec - 데이터센터 정의
// ============================================================================

/// 데이터센터(클러스터) 정의
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// 데이터센터 이름
    pub name: String,
    /// 초기 프록시 주소 목록
    #[serde(default)]
    pub seed_addresses: Vec<ProxyAddress>,
    /// 밸런서 주소 (있으면 밸런서에서 프록시 목록 조회)
    #[serde(default)]
    pub balancer: Option<ProxyAddress>,
}

impl ClusterSpec {
    /// 새 데이터센터 정의
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed_addresses: Vec::new(),
            balancer: None,
        }
    }

    /// 초기 프록시 추가
    pub fn with_seed(mut self, address: ProxyAddress) -> Self {
        self.seed_addresses.push(address);
        self
    }

    /// 초기 프록시 목록 설정
    pub fn with_seeds(mut self, addresses: impl IntoIterator<Item = ProxyAddress>) -> Self {
        self.seed_addresses.extend(addresses);
        self
    }

    /// 밸런서 설정
    pub fn with_balancer(mut self, balancer: ProxyAddress) -> Self {
        self.balancer = Some(balancer);
        self
    }

    /// 프록시 목록을 조회할 밸런서 주소
    ///
    /// 밸런서와 초기 프록시가 모두 없으면 이름 자체를 밸런서 주소로 씁니다.
    /// 초기 프록시만 있으면 `None`입니다.
    pub fn discovery_balancer(&self) -> DriverResult<Option<ProxyAddress>> {
        match &self.balancer {
            Some(balancer) => Ok(Some(balancer.clone())),
            None if self.seed_addresses.is_empty() => ProxyAddress::parse(&self.name)
                .map(Some)
                .map_err(|_| {
                    DriverError::configuration(format!(
                        "Cluster {} has no seeds and its name is not a balancer address",
                        self.name
                    ))
                }),
            None => Ok(None),
        }
    }
}

// ============================================================================
// FailoverPolicy / StreamConfig
// ============================================================================

/// 페일오버 정책
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPolicy {
    /// 원격 데이터센터 및 프록시 순서를 무작위로 섞을지 여부
    #[serde(default)]
    pub randomize_dcs: bool,
}

/// 스트림 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// 이 값 미만이면 ready 신호
    pub low_water_rows: usize,
    /// 버퍼 최대 행 수
    pub max_buffered_rows: usize,
    /// 한 번에 전송하는 행 수
    pub batch_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            low_water_rows: 1024,
            max_buffered_rows: 65_536,
            batch_size: 512,
        }
    }
}

// ============================================================================
// ClientConfig - 클라이언트 설정
// ============================================================================

/// 라우팅 클라이언트 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 데이터센터 목록 (순서 유지)
    pub clusters: Vec<ClusterSpec>,
    /// 로컬 데이터센터 이름
    pub local_data_center: Option<String>,
    /// 인증 정보
    pub credentials: Credentials,
    /// 생존 확인 주기
    pub ping_interval: Duration,
    /// 프록시 재조회 주기
    pub discovery_interval: Duration,
    /// 디스패치 후보 수
    pub dispatch_fanout: usize,
    /// 페일오버 정책
    pub failover_policy: FailoverPolicy,
    /// 프록시 역할 (밸런서 조회 시 사용)
    pub proxy_role: String,
    /// 스트림 설정
    pub stream: StreamConfig,
    /// 로그 필터 (설정 시 tracing subscriber 설치)
    pub log_filter: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            clusters: Vec::new(),
            local_data_center: None,
            credentials: Credentials::default(),
            ping_interval: Duration::from_secs(5),
            discovery_interval: Duration::from_secs(60),
            dispatch_fanout: DEFAULT_DISPATCH_FANOUT,
            failover_policy: FailoverPolicy::default(),
            proxy_role: "data".to_string(),
            stream: StreamConfig::default(),
            log_filter: None,
        }
    }
}

impl ClientConfig {
    /// 단일 클러스터 설정 생성
    pub fn new(cluster: ClusterSpec) -> Self {
        Self {
            clusters: vec![cluster],
            ..Self::default()
        }
    }

    /// 빌더 시작
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// JSON에서 로드
    pub fn from_json(json: &str) -> DriverResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 검증
    pub fn validate(&self) -> DriverResult<()> {
        if self.clusters.is_empty() {
            return Err(DriverError::configuration("At least one cluster is required"));
        }

        let mut names = HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(DriverError::configuration("Cluster name must not be empty"));
            }
            if !names.insert(cluster.name.as_str()) {
                return Err(DriverError::configuration(format!(
                    "Duplicate cluster name: {}",
                    cluster.name
                )));
            }
            cluster.discovery_balancer()?;
        }

        if let Some(local) = &self.local_data_center {
            if !names.contains(local.as_str()) {
                return Err(DriverError::configuration(format!(
                    "Local data center {} is not a configured cluster",
                    local
                )));
            }
        }

        if self.dispatch_fanout == 0 {
            return Err(DriverError::configuration("dispatch_fanout must be at least 1"));
        }
        if self.ping_interval.is_zero() || self.discovery_interval.is_zero() {
            return Err(DriverError::configuration("Intervals must be non-zero"));
        }
        if self.stream.batch_size == 0 {
            return Err(DriverError::configuration("stream.batch_size must be at least 1"));
        }
        if self.stream.low_water_rows >= self.stream.max_buffered_rows {
            return Err(DriverError::configuration(
                "stream.low_water_rows must be below stream.max_buffered_rows",
            ));
        }
        if let Some(filter) = &self.log_filter {
            parse_filter(filter)?;
        }

        Ok(())
    }

    /// 로컬 데이터센터 지정 여부
    pub fn has_local_data_center(&self) -> bool {
        self.local_data_center.is_some()
    }
}

// ============================================================================
// ClientConfigBuilder - 설정 빌더
// ============================================================================

/// 클라이언트 설정 빌더
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// 데이터센터 추가
    pub fn with_cluster(mut self, cluster: ClusterSpec) -> Self {
        self.config.clusters.push(cluster);
        self
    }

    /// 로컬 데이터센터 설정
    pub fn with_local_data_center(mut self, name: impl Into<String>) -> Self {
        self.config.local_data_center = Some(name.into());
        self
    }

    /// 인증 정보 설정
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    /// 생존 확인 주기 설정
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// 재조회 주기 설정
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.config.discovery_interval = interval;
        self
    }

    /// 디스패치 후보 수 설정
    pub fn with_dispatch_fanout(mut self, fanout: usize) -> Self {
        self.config.dispatch_fanout = fanout;
        self
    }

    /// 데이터센터 순서 무작위화 설정
    pub fn with_randomize_dcs(mut self, randomize: bool) -> Self {
        self.config.failover_policy.randomize_dcs = randomize;
        self
    }

    /// 프록시 역할 설정
    pub fn with_proxy_role(mut self, role: impl Into<String>) -> Self {
        self.config.proxy_role = role.into();
        self
    }

    /// 스트림 설정
    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.config.stream = stream;
        self
    }

    /// 로그 필터 설정
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = Some(filter.into());
        self
    }

    /// 빌드 (검증 포함)
    pub fn build(self) -> DriverResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Tests
// ============================================================================
