//! Driver Error Types
//!
//! 드라이버 에러 정의

use std::io;
use thiserror::Error;

use crate::wire::WireError;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// 선택 가능한 살아있는 프록시가 없음
    #[error("No alive destinations")]
    NoAliveDestinations,

    /// 클라이언트가 이미 닫힘
    #[error("Client is closed")]
    ClientClosed,

    /// 프록시 목록 조회 실패 (다음 주기에 재시도)
    #[error("Discovery resolution failed: {0}")]
    DiscoveryResolutionFailed(String),

    /// 단일 후보 프록시에 대한 전송 실패
    #[error("Transport error ({address}): {message}")]
    Transport { address: String, message: String },

    /// 모든 후보 프록시에 대한 전송 실패
    #[error("All {attempts} candidates failed, last error: {last}")]
    TransportFailure { attempts: usize, last: Box<DriverError> },

    /// 쓰기 버퍼 한도 초과 (백프레셔 무시)
    #[error("Buffer overrun: {buffered} rows buffered, {incoming} incoming, cap {cap}")]
    BufferOverrun {
        buffered: usize,
        incoming: usize,
        cap: usize,
    },

    /// 스트림이 이미 닫힘
    #[error("Stream closed")]
    StreamClosed,

    /// 스트림이 전송 에러로 종료됨
    #[error("Stream failed: {0}")]
    StreamFailed(String),

    /// 서버 에러
    #[error("Server error: {code} - {message}")]
    Server { code: i32, message: String },

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 직렬화 에러
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 프로토콜 에러
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 트랜잭션 에러
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    /// 전송 에러 생성
    pub fn transport(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            address: address.into(),
            message: message.into(),
        }
    }

    /// 조회 실패 에러 생성
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::DiscoveryResolutionFailed(msg.into())
    }

    /// 서버 에러 생성
    pub fn server(code: i32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 직렬화 에러 생성
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 트랜잭션 에러 생성
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// 스트림 실패 에러 생성
    pub fn stream_failed(msg: impl Into<String>) -> Self {
        Self::StreamFailed(msg.into())
    }

    /// 재시도 가능 여부
    ///
    /// 다음 후보 프록시로 넘어가도 되는 일시적 에러인지 판단합니다.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout(_) | Self::Io(_) => true,
            Self::Server { code, .. } => is_retryable_code(*code),
            _ => false,
        }
    }

    /// 클라이언트 에러 여부
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::Serialization(_)
                | Self::BufferOverrun { .. }
                | Self::ClientClosed
        )
    }
}

/// 재시도 가능한 서버 에러 코드 확인
///
/// 프록시 과부하, 마스터 연결 불가, 요청 큐 초과 등
fn is_retryable_code(code: i32) -> bool {
    matches!(code, 100 | 101 | 105 | 108 | 109 | 111 | 1703 | 1706)
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Serialization(err.to_string())
    }
}

impl From<WireError> for DriverError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => DriverError::Io(e),
            WireError::ConnectionClosed => DriverError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed",
            )),
            WireError::Remote { code, message } => DriverError::Server { code, message },
            other => DriverError::Protocol(other.to_string()),
        }
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Tests
// ============================================================================
