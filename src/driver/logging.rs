//! Logging
//!
//! tracing subscriber 설치 (선택)

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::error::{DriverError, DriverResult};

/// 로그 필터 파싱
pub(crate) fn parse_filter(level: &str) -> DriverResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| DriverError::configuration(format!("invalid log filter {:?}: {}", level, e)))
}

/// tracing subscriber 설치
///
/// 필터 문자열이 잘못되면 `Configuration` 오류입니다. 이미 전역 subscriber가
/// 설치되어 있으면 `false`를 반환하고 아무것도 바꾸지 않습니다.
pub fn init_logging(level: &str) -> DriverResult<bool> {
    let filter = parse_filter(level)?;

    let installed = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .try_init()
        .is_ok();

    Ok(installed)
}
