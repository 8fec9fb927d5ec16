//! 构建进度
//!
//! 进度协议为纯文本：第一行是数值状态（`0.0..=1.0` 为进行中，`2` 为成功，
//! `3` 为被取消，负数为失败），可选的第二行是说明文字。取消不是错误。
//!
//! 每次构建都有自己的状态通道（`tokio::sync::watch`），也可以同时写入进度文件，
//! 供外部进程轮询。轮询端在一段时间内收不到任何信号时先告警、再超时。

use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// 成功状态码
pub const STATUS_SUCCESS: f64 = 2.0;

/// 取消状态码
pub const STATUS_CANCELLED: f64 = 3.0;

/// 构建状态
#[derive(Debug, Clone, PartialEq)]
pub enum BuildStatus {
    /// 进行中，0..=1
    Progress { fraction: f64, message: Option<String> },
    Succeeded { message: Option<String> },
    /// 被取消或被更新的请求取代
    Cancelled { message: Option<String> },
    Failed { code: f64, message: String },
}

impl BuildStatus {
    pub fn progress(fraction: f64, message: impl Into<String>) -> Self {
        Self::Progress {
            fraction: fraction.clamp(0.0, 1.0),
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            code: -1.0,
            message: message.into(),
        }
    }

    /// 构建错误对应的终止状态，取消不按失败上报
    pub fn from_error(error: &BuildError) -> Self {
        if error.is_cancellation() {
            Self::Cancelled { message: Some(error.to_string()) }
        } else {
            Self::failed(error.to_string())
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }

    /// 数值状态
    pub fn code(&self) -> f64 {
        match self {
            Self::Progress { fraction, .. } => *fraction,
            Self::Succeeded { .. } => STATUS_SUCCESS,
            Self::Cancelled { .. } => STATUS_CANCELLED,
            Self::Failed { code, .. } => *code,
        }
    }

    /// 序列化为协议文本
    pub fn to_protocol(&self) -> String {
        let message = match self {
            Self::Progress { message, .. } | Self::Succeeded { message } | Self::Cancelled { message } => {
                message.as_deref()
            }
            Self::Failed { message, .. } => Some(message.as_str()),
        };
        match message {
            Some(m) if !m.is_empty() => format!("{}\n{}\n", self.code(), m.replace('\n', " ")),
            _ => format!("{}\n", self.code()),
        }
    }

    /// 解析协议文本，格式不对时返回 None
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let code: f64 = lines.next()?.trim().parse().ok()?;
        let message = lines
            .next()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if !code.is_finite() {
            return None;
        }
        if code < 0.0 {
            Some(Self::Failed {
                code,
                message: message.unwrap_or_else(|| "build failed".to_string()),
            })
        } else if (code - STATUS_SUCCESS).abs() < f64::EPSILON {
            Some(Self::Succeeded { message })
        } else if (code - STATUS_CANCELLED).abs() < f64::EPSILON {
            Some(Self::Cancelled { message })
        } else if code <= 1.0 {
            Some(Self::Progress { fraction: code, message })
        } else {
            None
        }
    }
}

/// 进度接收端
pub trait ProgressSink: Send + Sync {
    fn report(&self, status: BuildStatus);
}

impl ProgressSink for watch::Sender<BuildStatus> {
    fn report(&self, status: BuildStatus) {
        self.send_replace(status);
    }
}

/// 丢弃全部进度
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _status: BuildStatus) {}
}

/// 同时转发给多个接收端
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ProgressSink for FanoutSink {
    fn report(&self, status: BuildStatus) {
        for sink in &self.sinks {
            sink.report(status.clone());
        }
    }
}

/// 进度文件
///
/// 先写临时文件再改名，读端不会看到写了一半的内容。
#[derive(Debug, Clone)]
pub struct FileProgressSink {
    path: PathBuf,
}

impl FileProgressSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, status: &BuildStatus) -> std::io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, status.to_protocol())?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl ProgressSink for FileProgressSink {
    fn report(&self, status: BuildStatus) {
        if let Err(e) = self.write(&status) {
            tracing::error!("Failed to write progress file {}: {}", self.path.display(), e);
        }
    }
}

/// 轮询的终止结果
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Succeeded(Option<String>),
    Cancelled,
    Failed(String),
}

/// 超时计时：记录最后一次信号时间，判断告警与超时
struct Watchdog {
    last_signal: Instant,
    warned: bool,
    warn_after: Duration,
    timeout: Duration,
}

impl Watchdog {
    fn new(config: &BuildConfig) -> Self {
        Self {
            last_signal: Instant::now(),
            warned: false,
            warn_after: config.warn_after(),
            timeout: config.timeout(),
        }
    }

    fn signal(&mut self) {
        self.last_signal = Instant::now();
        self.warned = false;
    }

    fn check(&mut self) -> BuildResult<()> {
        let elapsed = self.last_signal.elapsed();
        if elapsed >= self.timeout {
            tracing::error!("No progress signal for {:?}, giving up", elapsed);
            return Err(BuildError::StageTimeout {
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        if elapsed >= self.warn_after && !self.warned {
            tracing::warn!("No progress signal for {:?}", elapsed);
            self.warned = true;
        }
        Ok(())
    }
}

fn outcome(status: &BuildStatus) -> Option<WatchOutcome> {
    match status {
        BuildStatus::Succeeded { message } => Some(WatchOutcome::Succeeded(message.clone())),
        BuildStatus::Cancelled { .. } => Some(WatchOutcome::Cancelled),
        BuildStatus::Failed { message, .. } => Some(WatchOutcome::Failed(message.clone())),
        BuildStatus::Progress { .. } => None,
    }
}

/// 轮询进度文件直到终止状态或超时
///
/// 文件内容变化即视为一次信号；文件不存在或格式不对时当作无信号。
pub async fn watch_progress_file(path: &Path, config: &BuildConfig) -> BuildResult<WatchOutcome> {
    let mut ticker = tokio::time::interval(config.poll_interval());
    let mut watchdog = Watchdog::new(config);
    let mut last_text: Option<String> = None;

    loop {
        ticker.tick().await;
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            if last_text.as_deref() != Some(text.as_str()) {
                if let Some(status) = BuildStatus::parse(&text) {
                    watchdog.signal();
                    tracing::debug!("Progress {}", status.code());
                    if let Some(done) = outcome(&status) {
                        return Ok(done);
                    }
                }
                last_text = Some(text);
            }
        }
        watchdog.check()?;
    }
}

/// 监视状态通道直到终止状态或超时
///
/// 发送端关闭而未给出终止状态时按失败处理。
pub async fn watch_status(
    mut rx: watch::Receiver<BuildStatus>,
    config: &BuildConfig,
) -> BuildResult<WatchOutcome> {
    let mut watchdog = Watchdog::new(config);
    if let Some(done) = outcome(&rx.borrow_and_update()) {
        return Ok(done);
    }

    loop {
        match tokio::time::timeout(config.poll_interval(), rx.changed()).await {
            Ok(Ok(())) => {
                watchdog.signal();
                let status = rx.borrow_and_update().clone();
                if let Some(done) = outcome(&status) {
                    return Ok(done);
                }
            }
            Ok(Err(_)) => {
                return Ok(WatchOutcome::Failed("status channel closed".to_string()));
            }
            Err(_) => {}
        }
        watchdog.check()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_round_trip() {
        let status = BuildStatus::progress(0.25, "构建柱网");
        assert_eq!(status.to_protocol(), "0.25\n构建柱网\n");
        assert_eq!(BuildStatus::parse(&status.to_protocol()), Some(status));

        assert_eq!(
            BuildStatus::parse("2"),
            Some(BuildStatus::Succeeded { message: None })
        );
        assert_eq!(
            BuildStatus::parse("-3\nbad purlin"),
            Some(BuildStatus::Failed { code: -3.0, message: "bad purlin".to_string() })
        );
        let cancelled = BuildStatus::Cancelled { message: Some("superseded".to_string()) };
        assert_eq!(cancelled.to_protocol(), "3\nsuperseded\n");
        assert_eq!(BuildStatus::parse(&cancelled.to_protocol()), Some(cancelled));
        assert_eq!(BuildStatus::parse("1.5"), None);
        assert_eq!(BuildStatus::parse("abc"), None);
        assert_eq!(BuildStatus::parse(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_status_success() {
        let (tx, rx) = watch::channel(BuildStatus::progress(0.0, "start"));
        let config = BuildConfig::default();
        let task = tokio::spawn(async move { watch_status(rx, &config).await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.report(BuildStatus::progress(0.5, "half"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.report(BuildStatus::Succeeded { message: None });
        assert_eq!(task.await.unwrap().unwrap(), WatchOutcome::Succeeded(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_status_times_out() {
        let (_tx, rx) = watch::channel(BuildStatus::progress(0.0, "start"));
        let config = BuildConfig { timeout_ms: 3_000, ..Default::default() };
        let result = watch_status(rx, &config).await;
        assert!(matches!(result, Err(BuildError::StageTimeout { elapsed_ms }) if elapsed_ms >= 3_000));
    }

    #[tokio::test]
    async fn test_watch_progress_file_failure() {
        let dir = std::env::temp_dir().join(format!("gujian-progress-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("progress.txt");
        let sink = FileProgressSink::new(&path);
        sink.report(BuildStatus::failed("ridge intersection"));

        let config = BuildConfig { poll_interval_ms: 10, ..Default::default() };
        let outcome = watch_progress_file(&path, &config).await.unwrap();
        assert_eq!(outcome, WatchOutcome::Failed("ridge intersection".to_string()));
        std::fs::remove_dir_all(&dir).ok();
    }
}
