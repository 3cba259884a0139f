//! Table Streaming
//!
//! 테이블 읽기/쓰기 스트림과 흐름 제어
//!
//! 두 방향 모두 같은 상태 기계를 사용합니다: `Open → Active → Draining → Closed`.
//!
//! # Example
//!
//! ```ignore
//! let mut writer = client.write_table("//home/logs").await?;
//! for chunk in rows.chunks(1000) {
//!     writer.ready_event().await?;
//!     writer.write(chunk.to_vec())?;
//! }
//! writer.close().await?;
//!
//! let mut reader = client.read_table("//home/logs").await?;
//! while let Some(rows) = reader.next_rows().await? {
//!     process(rows);
//! }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::{ProxyAddress, StreamConfig};
use super::error::{DriverError, DriverResult};
use super::request::Row;
use super::transport::{RowSink, RowSource};

// ============================================================================
// StreamState / StreamStatus
// ============================================================================

/// 스트림 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// 열림 (아직 데이터 없음)
    Open,
    /// 데이터 주고받는 중
    Active,
    /// 남은 데이터 처리 중
    Draining,
    /// 닫힘
    Closed,
}

/// ready 대기에 쓰는 스냅샷
#[derive(Debug, Clone)]
struct StreamStatus {
    state: StreamState,
    buffered: usize,
    /// 서버 쪽 스트림 끝 (읽기)
    finished: bool,
    error: Option<String>,
}

impl StreamStatus {
    fn new() -> Self {
        Self {
            state: StreamState::Open,
            buffered: 0,
            finished: false,
            error: None,
        }
    }
}

/// 버퍼와 상태 (잠금 하나로 보호)
#[derive(Debug)]
struct Inner {
    rows: VecDeque<Row>,
    state: StreamState,
    finished: bool,
    error: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            rows: VecDeque::new(),
            state: StreamState::Open,
            finished: false,
            error: None,
        }
    }

    fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            buffered: self.rows.len(),
            finished: self.finished,
            error: self.error.clone(),
        }
    }

    /// 전송 에러로 종료, 남은 데이터는 버림
    fn fail(&mut self, error: &DriverError) {
        self.state = StreamState::Closed;
        self.error = Some(error.to_string());
        self.rows.clear();
    }

    fn closed_error(&self) -> DriverError {
        match &self.error {
            Some(e) => DriverError::stream_failed(e.clone()),
            None => DriverError::StreamClosed,
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    /// 백그라운드 작업 깨우기
    wake: Notify,
    status: watch::Sender<StreamStatus>,
}

impl Shared {
    fn new() -> Arc<Self> {
        let (status, _) = watch::channel(StreamStatus::new());
        Arc::new(Self {
            inner: Mutex::new(Inner::new()),
            wake: Notify::new(),
            status,
        })
    }

    /// 잠금 안에서 변경 후 상태 공개
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock();
        let result = f(&mut inner);
        self.status.send_replace(inner.status());
        result
    }

    fn state(&self) -> StreamState {
        self.inner.lock().state
    }

    fn buffered(&self) -> usize {
        self.inner.lock().rows.len()
    }
}

// ============================================================================
// TableWriter - 쓰기 스트림
// ============================================================================

/// 테이블 쓰기 스트림
///
/// `write`는 버퍼에 넣기만 하고, 백그라운드 작업이 묶음 단위로 서버에 보냅니다.
/// 버퍼가 한도를 넘으면 `BufferOverrun`을 반환합니다.
pub struct TableWriter {
    shared: Arc<Shared>,
    config: StreamConfig,
    address: ProxyAddress,
    cancel: CancellationToken,
    flusher: Option<JoinHandle<DriverResult<()>>>,
}

impl TableWriter {
    /// 쓰기 스트림 시작
    pub fn start(
        sink: Box<dyn RowSink>,
        config: StreamConfig,
        address: ProxyAddress,
        runtime: &Handle,
    ) -> Self {
        let shared = Shared::new();
        let cancel = CancellationToken::new();
        let flusher = runtime.spawn(run_flusher(
            sink,
            shared.clone(),
            config.batch_size,
            cancel.clone(),
        ));

        Self {
            shared,
            config,
            address,
            cancel,
            flusher: Some(flusher),
        }
    }

    /// 스트림이 연결된 프록시
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    /// 현재 상태
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// 버퍼에 남은 행 수
    pub fn buffered_rows(&self) -> usize {
        self.shared.buffered()
    }

    /// 행 쓰기 (대기하지 않음)
    ///
    /// 버퍼가 비어 있으면 한도보다 큰 묶음도 받습니다. 그 외에 한도를 넘기면
    /// `BufferOverrun`입니다.
    pub fn write(&self, rows: Vec<Row>) -> DriverResult<()> {
        let cap = self.config.max_buffered_rows;
        self.shared.update(|inner| {
            match inner.state {
                StreamState::Closed => return Err(inner.closed_error()),
                StreamState::Draining => return Err(DriverError::StreamClosed),
                StreamState::Open | StreamState::Active => {}
            }

            // 빈 버퍼에는 한도보다 큰 묶음도 받음
            let buffered = inner.rows.len();
            if buffered > 0 && buffered + rows.len() > cap {
                return Err(DriverError::BufferOverrun {
                    buffered,
                    incoming: rows.len(),
                    cap,
                });
            }

            inner.rows.extend(rows);
            inner.state = StreamState::Active;
            Ok(())
        })?;

        self.shared.wake.notify_one();
        Ok(())
    }

    /// 다시 쓸 수 있을 때까지 대기
    ///
    /// 버퍼가 `low_water_rows` 미만이 되면 완료됩니다. 스트림이 닫히면 에러입니다.
    pub async fn ready_event(&self) -> DriverResult<()> {
        let low_water = self.config.low_water_rows;
        let mut status = self.shared.status.subscribe();
        let snapshot = status
            .wait_for(|s| s.state == StreamState::Closed || s.buffered < low_water)
            .await
            .map_err(|_| DriverError::StreamClosed)?
            .clone();

        match snapshot.state {
            StreamState::Closed => Err(match snapshot.error {
                Some(e) => DriverError::stream_failed(e),
                None => DriverError::StreamClosed,
            }),
            _ => Ok(()),
        }
    }

    /// 남은 행을 모두 보내고 스트림 종료
    pub async fn close(&mut self) -> DriverResult<()> {
        let Some(flusher) = self.flusher.take() else {
            return match self.shared.state() {
                StreamState::Closed => {
                    let error = self.shared.inner.lock().error.clone();
                    error.map_or(Ok(()), |e| Err(DriverError::stream_failed(e)))
                }
                _ => Ok(()),
            };
        };

        self.shared.update(|inner| {
            if inner.state != StreamState::Closed {
                inner.state = StreamState::Draining;
            }
        });
        self.shared.wake.notify_one();

        match flusher.await {
            Ok(result) => result,
            Err(e) => {
                let error = DriverError::stream_failed(e.to_string());
                self.shared.update(|inner| inner.fail(&error));
                Err(error)
            }
        }
    }

    /// 전송 포기
    ///
    /// 아직 보내지 않은 행은 버리고 서버 스트림을 취소합니다.
    pub async fn abort(&mut self) {
        self.cancel.cancel();
        if let Some(flusher) = self.flusher.take() {
            let _ = flusher.await;
        }
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        if self.flusher.is_some() {
            // 닫지 않은 스트림은 포기로 처리
            self.cancel.cancel();
        }
    }
}

impl fmt::Debug for TableWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableWriter")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("buffered", &self.buffered_rows())
            .finish()
    }
}

enum FlushStep {
    Send(Vec<Row>),
    Finish,
    Wait,
}

async fn run_flusher(
    mut sink: Box<dyn RowSink>,
    shared: Arc<Shared>,
    batch_size: usize,
    cancel: CancellationToken,
) -> DriverResult<()> {
    loop {
        // 알림을 먼저 등록해 두어야 확인과 대기 사이의 깨우기를 놓치지 않음
        let notified = shared.wake.notified();

        let step = shared.update(|inner| {
            if inner.state == StreamState::Closed {
                return FlushStep::Finish;
            }
            if !inner.rows.is_empty() {
                let n = batch_size.min(inner.rows.len());
                return FlushStep::Send(inner.rows.drain(..n).collect());
            }
            if inner.state == StreamState::Draining {
                FlushStep::Finish
            } else {
                FlushStep::Wait
            }
        });

        let outcome = match step {
            FlushStep::Wait => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    _ = notified => continue,
                }
            }
            FlushStep::Send(batch) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = sink.send_batch(batch) => Some(result),
                }
            }
            FlushStep::Finish => {
                if shared.state() == StreamState::Closed {
                    return Err(shared.inner.lock().closed_error());
                }
                let result = sink.finish().await;
                return match result {
                    Ok(()) => {
                        shared.update(|inner| inner.state = StreamState::Closed);
                        debug!("table write stream finished");
                        Ok(())
                    }
                    Err(e) => {
                        shared.update(|inner| inner.fail(&e));
                        Err(e)
                    }
                };
            }
        };

        let Some(result) = outcome else {
            return abandon(sink, &shared).await;
        };

        if let Err(e) = result {
            warn!(error = %e, "table write stream failed, discarding buffered rows");
            shared.update(|inner| inner.fail(&e));
            if let Err(abort_err) = sink.abort().await {
                debug!(error = %abort_err, "failed to abort write stream");
            }
            return Err(e);
        }
    }
}

async fn abandon(mut sink: Box<dyn RowSink>, shared: &Shared) -> DriverResult<()> {
    let discarded = shared.update(|inner| {
        let discarded = inner.rows.len();
        inner.rows.clear();
        inner.state = StreamState::Closed;
        discarded
    });
    debug!(discarded, "table write stream abandoned");

    if let Err(e) = sink.abort().await {
        debug!(error = %e, "failed to abort write stream");
    }
    Ok(())
}

// ============================================================================
// TableReader - 읽기 스트림
// ============================================================================

/// 테이블 읽기 스트림
///
/// 백그라운드 작업이 서버에서 행을 받아 버퍼에 쌓습니다. 버퍼가
/// `max_buffered_rows`에 도달하면 읽을 때까지 더 받지 않습니다.
pub struct TableReader {
    shared: Arc<Shared>,
    address: ProxyAddress,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
}

impl TableReader {
    /// 읽기 스트림 시작
    pub fn start(
        source: Box<dyn RowSource>,
        config: StreamConfig,
        address: ProxyAddress,
        runtime: &Handle,
    ) -> Self {
        let shared = Shared::new();
        let cancel = CancellationToken::new();
        let pump = runtime.spawn(run_pump(
            source,
            shared.clone(),
            config.max_buffered_rows,
            cancel.clone(),
        ));

        Self {
            shared,
            address,
            cancel,
            pump: Some(pump),
        }
    }

    /// 스트림이 연결된 프록시
    pub fn address(&self) -> &ProxyAddress {
        &self.address
    }

    /// 현재 상태
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// 버퍼에 있는 행 수
    pub fn buffered_rows(&self) -> usize {
        self.shared.buffered()
    }

    /// 더 읽을 수 있는지 확인
    ///
    /// 서버가 스트림 끝을 알리고 버퍼가 빈 뒤, 또는 스트림이 닫힌 뒤에만 `false`입니다.
    /// 아직 도착한 행이 없어도 `true`일 수 있으니 `ready_event()`로 기다립니다.
    pub fn can_read(&self) -> bool {
        let inner = self.shared.inner.lock();
        if inner.state == StreamState::Closed {
            return false;
        }
        !(inner.finished && inner.rows.is_empty())
    }

    /// 버퍼의 행을 모두 가져옴 (대기하지 않음)
    ///
    /// 스트림 끝이면 `None`, 아직 도착한 행이 없으면 빈 벡터입니다.
    pub fn read(&self) -> DriverResult<Option<Vec<Row>>> {
        let result = self.shared.update(|inner| {
            if inner.state == StreamState::Closed {
                return match &inner.error {
                    Some(e) => Err(DriverError::stream_failed(e.clone())),
                    None if inner.finished => Ok(None),
                    None => Err(DriverError::StreamClosed),
                };
            }

            let rows: Vec<Row> = inner.rows.drain(..).collect();
            if inner.finished {
                inner.state = if rows.is_empty() {
                    StreamState::Closed
                } else {
                    StreamState::Draining
                };
                if rows.is_empty() {
                    return Ok(None);
                }
            }
            Ok(Some(rows))
        });

        // 버퍼가 비었으니 다시 받기 시작
        self.shared.wake.notify_one();
        result
    }

    /// 읽을 행이 생기거나 스트림이 끝날 때까지 대기
    pub async fn ready_event(&self) -> DriverResult<()> {
        let mut status = self.shared.status.subscribe();
        let snapshot = status
            .wait_for(|s| s.buffered > 0 || s.finished || s.state == StreamState::Closed)
            .await
            .map_err(|_| DriverError::StreamClosed)?
            .clone();

        if snapshot.buffered > 0 || snapshot.finished {
            return Ok(());
        }
        Err(match snapshot.error {
            Some(e) => DriverError::stream_failed(e),
            None => DriverError::StreamClosed,
        })
    }

    /// 다음 행 묶음 (스트림 끝이면 `None`)
    pub async fn next_rows(&mut self) -> DriverResult<Option<Vec<Row>>> {
        loop {
            self.ready_event().await?;
            match self.read()? {
                Some(rows) if rows.is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    /// 남은 행을 모두 읽음
    pub async fn read_all(&mut self) -> DriverResult<Vec<Row>> {
        let mut all = Vec::new();
        while let Some(rows) = self.next_rows().await? {
            all.extend(rows);
        }
        Ok(all)
    }

    /// 행 단위 비동기 스트림으로 변환
    pub fn into_stream(mut self, runtime: &Handle) -> RowStream {
        let (tx, rx) = mpsc::channel(1);
        runtime.spawn(async move {
            loop {
                match self.next_rows().await {
                    Ok(Some(rows)) => {
                        for row in rows {
                            if tx.send(Ok(row)).await.is_err() {
                                self.close().await;
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });
        RowStream {
            inner: ReceiverStream::new(rx),
        }
    }

    /// 스트림 종료
    ///
    /// 끝까지 읽기 전에 닫으면 서버 스트림을 취소합니다.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
        self.shared.update(|inner| {
            inner.rows.clear();
            inner.state = StreamState::Closed;
        });
    }
}

impl Drop for TableReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for TableReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableReader")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("buffered", &self.buffered_rows())
            .finish()
    }
}

async fn run_pump(
    mut source: Box<dyn RowSource>,
    shared: Arc<Shared>,
    max_buffered: usize,
    cancel: CancellationToken,
) {
    loop {
        // 버퍼가 가득 차면 읽을 때까지 대기
        loop {
            let notified = shared.wake.notified();
            if shared.buffered() < max_buffered {
                break;
            }
            if cancel.is_cancelled() {
                return cancel_source(source).await;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = notified => {}
            }
        }

        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            batch = source.next_batch() => Some(batch),
        };
        let Some(batch) = batch else {
            return cancel_source(source).await;
        };

        match batch {
            Ok(Some(rows)) => shared.update(|inner| {
                inner.rows.extend(rows);
                inner.state = StreamState::Active;
            }),
            Ok(None) => {
                shared.update(|inner| {
                    inner.finished = true;
                    inner.state = if inner.rows.is_empty() {
                        StreamState::Closed
                    } else {
                        StreamState::Draining
                    };
                });
                debug!("table read stream finished");
                return;
            }
            Err(e) => {
                warn!(error = %e, "table read stream failed");
                shared.update(|inner| inner.fail(&e));
                return;
            }
        }
    }
}

async fn cancel_source(mut source: Box<dyn RowSource>) {
    if let Err(e) = source.cancel().await {
        debug!(error = %e, "failed to cancel read stream");
    }
}

// ============================================================================
// RowStream - 행 스트림
// ============================================================================

/// 행 단위 비동기 스트림
pub struct RowStream {
    inner: ReceiverStream<DriverResult<Row>>,
}

impl Stream for RowStream {
    type Item = DriverResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream").finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{rows, FakeSink, FakeSource};
    use std::time::Duration;
    use tokio_stream::StreamExt;

    fn config(low_water: usize, max: usize, batch: usize) -> StreamConfig {
        StreamConfig {
            low_water_rows: low_water,
            max_buffered_rows: max,
            batch_size: batch,
        }
    }

    fn addr() -> ProxyAddress {
        ProxyAddress::new("proxy", 9013)
    }

    #[tokio::test]
    async fn test_writer_close_flushes_everything() {
        let sink = FakeSink::new();
        let mut writer = TableWriter::start(
            Box::new(sink.clone()),
            config(100, 2000, 64),
            addr(),
            &Handle::current(),
        );
        assert_eq!(writer.state(), StreamState::Open);

        // ready_event를 기다리지 않고 한 번에 씀
        writer.write(rows(0..1000)).unwrap();
        writer.close().await.unwrap();

        assert_eq!(writer.state(), StreamState::Closed);
        assert_eq!(sink.received(), rows(0..1000));
        assert!(sink.is_finished());
        assert!(!sink.is_aborted());
    }

    #[tokio::test]
    async fn test_writer_buffer_overrun() {
        let sink = FakeSink::new();
        sink.block();
        let mut writer = TableWriter::start(
            Box::new(sink.clone()),
            config(2, 10, 100),
            addr(),
            &Handle::current(),
        );

        writer.write(rows(0..6)).unwrap();
        // 첫 묶음이 막혀 있는 동안 버퍼를 채움
        tokio::time::sleep(Duration::from_millis(20)).await;
        writer.write(rows(6..16)).unwrap();

        let err = writer.write(rows(16..17)).unwrap_err();
        assert!(matches!(
            err,
            DriverError::BufferOverrun {
                buffered: 10,
                incoming: 1,
                cap: 10
            }
        ));

        sink.unblock();
        writer.close().await.unwrap();
        assert_eq!(sink.received(), rows(0..16));
    }

    #[tokio::test]
    async fn test_writer_accepts_oversize_batch_into_empty_buffer() {
        let sink = FakeSink::new();
        sink.block();
        let mut writer = TableWriter::start(
            Box::new(sink.clone()),
            config(2, 10, 5),
            addr(),
            &Handle::current(),
        );

        writer.ready_event().await.unwrap();
        writer.write(rows(0..25)).unwrap();
        assert!(matches!(
            writer.write(rows(25..26)),
            Err(DriverError::BufferOverrun { incoming: 1, cap: 10, .. })
        ));

        sink.unblock();
        writer.close().await.unwrap();
        assert_eq!(sink.received(), rows(0..25));
    }

    #[tokio::test]
    async fn test_writer_ready_event_after_drain() {
        let sink = FakeSink::new();
        sink.block();
        let mut writer = TableWriter::start(
            Box::new(sink.clone()),
            config(4, 100, 3),
            addr(),
            &Handle::current(),
        );

        writer.write(rows(0..20)).unwrap();
        let ready = tokio::time::timeout(Duration::from_millis(20), writer.ready_event()).await;
        assert!(ready.is_err(), "buffer is above low water");

        sink.unblock();
        writer.ready_event().await.unwrap();
        assert!(writer.buffered_rows() < 4);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_terminal_error_discards_and_fails_ready() {
        let sink = FakeSink::new();
        sink.fail_after(1);
        let mut writer = TableWriter::start(
            Box::new(sink.clone()),
            config(1, 100, 5),
            addr(),
            &Handle::current(),
        );

        writer.write(rows(0..50)).unwrap();
        let err = writer.ready_event().await.unwrap_err();
        assert!(matches!(err, DriverError::StreamFailed(_)));
        assert_eq!(writer.state(), StreamState::Closed);
        assert_eq!(writer.buffered_rows(), 0);

        assert!(matches!(writer.write(rows(0..1)), Err(DriverError::StreamFailed(_))));
        assert!(writer.close().await.is_err());

        // 첫 묶음만 전달되고 나머지는 버려짐
        assert_eq!(sink.received(), rows(0..5));
        assert!(sink.is_aborted());
    }

    #[tokio::test]
    async fn test_writer_abort_discards_unsent_rows() {
        let sink = FakeSink::new();
        sink.block();
        let mut writer = TableWriter::start(
            Box::new(sink.clone()),
            config(1, 100, 10),
            addr(),
            &Handle::current(),
        );

        writer.write(rows(0..30)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.abort().await;

        assert_eq!(writer.state(), StreamState::Closed);
        assert!(sink.is_aborted());
        assert!(sink.received().is_empty());
        assert!(matches!(writer.write(rows(0..1)), Err(DriverError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_writer_drop_abandons_stream() {
        let sink = FakeSink::new();
        {
            let writer = TableWriter::start(
                Box::new(sink.clone()),
                config(1, 100, 10),
                addr(),
                &Handle::current(),
            );
            writer.write(rows(0..5)).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while !sink.is_aborted() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(!sink.is_finished());
    }

    #[tokio::test]
    async fn test_reader_reads_until_end() {
        let source = FakeSource::new(rows(0..25), 10);
        let mut reader = TableReader::start(
            Box::new(source.clone()),
            config(1, 100, 10),
            addr(),
            &Handle::current(),
        );

        let all = reader.read_all().await.unwrap();
        assert_eq!(all, rows(0..25));
        assert_eq!(reader.state(), StreamState::Closed);
        assert!(!reader.can_read());
        assert_eq!(reader.read().unwrap(), None);
        assert!(!source.is_cancelled());
    }

    #[tokio::test]
    async fn test_reader_backpressure() {
        let source = FakeSource::new(rows(0..100), 10);
        let mut reader = TableReader::start(
            Box::new(source.clone()),
            config(1, 20, 10),
            addr(),
            &Handle::current(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(reader.can_read());
        assert_eq!(reader.buffered_rows(), 20);
        assert_eq!(source.pulls(), 2);

        let first = reader.read().unwrap().unwrap();
        assert_eq!(first, rows(0..20));

        let rest = reader.read_all().await.unwrap();
        assert_eq!(rest, rows(20..100));
    }

    #[tokio::test]
    async fn test_reader_can_read_loop_until_end() {
        let source = FakeSource::new(rows(0..25), 10);
        let reader = TableReader::start(
            Box::new(source),
            config(1, 100, 10),
            addr(),
            &Handle::current(),
        );

        // 아직 아무 행도 도착하지 않음
        assert!(reader.can_read());

        let mut collected = Vec::new();
        while reader.can_read() {
            if let Some(rows) = reader.read().unwrap() {
                collected.extend(rows);
            }
            reader.ready_event().await.unwrap();
        }

        assert_eq!(collected, rows(0..25));
        assert!(!reader.can_read());
        assert!(reader.read().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_cannot_read_after_close_or_error() {
        let source = FakeSource::new(rows(0..100), 10);
        let mut reader = TableReader::start(
            Box::new(source),
            config(1, 100, 10),
            addr(),
            &Handle::current(),
        );
        assert!(reader.can_read());
        reader.close().await;
        assert!(!reader.can_read());

        let failing = FakeSource::new(rows(0..100), 10);
        failing.fail_after(0);
        let reader = TableReader::start(
            Box::new(failing),
            config(1, 100, 10),
            addr(),
            &Handle::current(),
        );
        assert!(reader.ready_event().await.is_err());
        assert!(!reader.can_read());
    }

    #[tokio::test]
    async fn test_reader_early_close_cancels_server_stream() {
        let source = FakeSource::new(rows(0..100), 10);
        let mut reader = TableReader::start(
            Box::new(source.clone()),
            config(1, 10, 10),
            addr(),
            &Handle::current(),
        );

        reader.ready_event().await.unwrap();
        reader.close().await;

        assert!(source.is_cancelled());
        assert_eq!(reader.state(), StreamState::Closed);
        assert!(matches!(reader.read(), Err(DriverError::StreamClosed)));
        assert!(matches!(reader.ready_event().await, Err(DriverError::StreamClosed)));
    }

    #[tokio::test]
    async fn test_reader_error_terminates() {
        let source = FakeSource::new(rows(0..100), 10);
        source.fail_after(2);
        let mut reader = TableReader::start(
            Box::new(source),
            config(1, 1000, 10),
            addr(),
            &Handle::current(),
        );

        let err = reader.read_all().await.unwrap_err();
        assert!(matches!(err, DriverError::StreamFailed(_)));
        assert_eq!(reader.state(), StreamState::Closed);
        assert!(reader.ready_event().await.is_err());
    }

    #[tokio::test]
    async fn test_reader_into_stream() {
        let source = FakeSource::new(rows(0..7), 3);
        let reader = TableReader::start(
            Box::new(source),
            config(1, 100, 10),
            addr(),
            &Handle::current(),
        );

        let collected: Vec<Row> = reader
            .into_stream(&Handle::current())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(collected, rows(0..7));
    }
}
