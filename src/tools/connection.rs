//! 后端连接管理
//!
//! 连接在首次使用时惰性建立，之后整个进程复用同一个句柄。初始化由一把异步互斥锁把关：
//! 同一时刻只有一个调用方在建连，其余调用方等待锁（有上限）后重新检查句柄，不会重复建连。
//! 建连失败分两类：可重试（网络错误、5xx、429）按指数退避重试，次数有上限；
//! 永久性失败（凭证被拒、缺少凭证）立即返回，不重试。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// 建连失败（对工具而言即后端不可用）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Backend unavailable: gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Backend unavailable: timed out after {0:?} waiting for connection in progress")]
    WaitTimeout(Duration),

    /// 后端明确拒绝（如 401/403、缺少 token），重试无意义
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// 未配置后端（如没有设计文件），由调用方决定是否降级
    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

/// 单次建连失败的分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Retryable(String),
    Permanent(String),
}

impl std::fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retryable(e) | Self::Permanent(e) => f.write_str(e),
        }
    }
}

/// 指数退避配置
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// 第一次失败后的等待
    pub base_delay: Duration,
    /// 单次等待上限
    pub max_delay: Duration,
    /// 每次连续失败的倍数（通常 2.0）
    pub multiplier: f64,
    /// 总尝试次数（含第一次）
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 4,
        }
    }
}

impl BackoffConfig {
    /// 第 n 次失败（从 0 开始）后的等待时长
    pub fn delay_for(&self, failures: u32) -> Duration {
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(failures as i32);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// 建立一次后端连接
#[async_trait]
pub trait Connector: Send + Sync {
    type Handle: Send + Sync;

    async fn connect(&self) -> Result<Self::Handle, ConnectFailure>;
}

/// 建连期间置位 connecting，future 被丢弃时也会复位
struct ConnectingFlag<'a>(&'a AtomicBool);

impl<'a> ConnectingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ConnectingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 连接管理器：注入到工具中，而不是模块级单例
pub struct ConnectionManager<C: Connector> {
    connector: C,
    handle: RwLock<Option<Arc<C::Handle>>>,
    gate: Mutex<()>,
    connecting: AtomicBool,
    backoff: BackoffConfig,
    wait_timeout: Duration,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C, backoff: BackoffConfig) -> Self {
        Self {
            connector,
            handle: RwLock::new(None),
            gate: Mutex::new(()),
            connecting: AtomicBool::new(false),
            backoff,
            wait_timeout: Duration::from_secs(30),
        }
    }

    /// 等待进行中建连的最长时间
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst)
    }

    pub async fn is_connected(&self) -> bool {
        self.handle.read().await.is_some()
    }

    /// 取得共享句柄；尚未连接时建连（全进程只会有一个建连过程）
    pub async fn handle(&self) -> Result<Arc<C::Handle>, ConnectionError> {
        if let Some(h) = self.handle.read().await.clone() {
            return Ok(h);
        }

        let _gate = tokio::time::timeout(self.wait_timeout, self.gate.lock())
            .await
            .map_err(|_| ConnectionError::WaitTimeout(self.wait_timeout))?;

        // 等锁期间可能已有其他调用方完成建连
        if let Some(h) = self.handle.read().await.clone() {
            return Ok(h);
        }

        let result = {
            let _flag = ConnectingFlag::raise(&self.connecting);
            self.connect_with_backoff().await
        };

        let handle = Arc::new(result?);
        *self.handle.write().await = Some(handle.clone());
        tracing::info!("backend connection established");
        Ok(handle)
    }

    async fn connect_with_backoff(&self) -> Result<C::Handle, ConnectionError> {
        let max_attempts = self.backoff.max_attempts.max(1);
        let mut failures = 0;
        loop {
            match self.connector.connect().await {
                Ok(h) => return Ok(h),
                Err(ConnectFailure::Permanent(e)) => {
                    tracing::warn!(error = %e, "backend rejected connection");
                    return Err(ConnectionError::Rejected(e));
                }
                Err(ConnectFailure::Retryable(e)) => {
                    failures += 1;
                    if failures >= max_attempts {
                        tracing::warn!(attempts = failures, error = %e, "backend connection failed");
                        return Err(ConnectionError::Exhausted {
                            attempts: failures,
                            last_error: e,
                        });
                    }
                    let delay = self.backoff.delay_for(failures - 1);
                    tracing::debug!(attempt = failures, delay_ms = delay.as_millis() as u64, error = %e, "retrying backend connection");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingConnector {
        attempts: Arc<AtomicU32>,
        fail_first: u32,
        delay: Duration,
        permanent: bool,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        type Handle = u32;

        async fn connect(&self) -> Result<u32, ConnectFailure> {
            tokio::time::sleep(self.delay).await;
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.permanent {
                Err(ConnectFailure::Permanent(format!("HTTP 403: invalid token #{n}")))
            } else if n <= self.fail_first {
                Err(ConnectFailure::Retryable(format!("connect refused #{n}")))
            } else {
                Ok(n)
            }
        }
    }

    fn fast_backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            multiplier: 2.0,
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let b = BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            max_attempts: 5,
        };
        assert_eq!(b.delay_for(0), Duration::from_millis(100));
        assert_eq!(b.delay_for(1), Duration::from_millis(200));
        assert_eq!(b.delay_for(2), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connection() {
        let attempts = Arc::new(AtomicU32::new(0));
        let manager = Arc::new(ConnectionManager::new(
            CountingConnector {
                attempts: attempts.clone(),
                fail_first: 0,
                delay: Duration::from_millis(30),
                permanent: false,
            },
            fast_backoff(3),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let m = manager.clone();
                tokio::spawn(async move { m.handle().await.map(|h| *h) })
            })
            .collect();
        for result in futures_util::future::join_all(tasks).await {
            assert_eq!(result.unwrap(), Ok(1));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(manager.is_connected().await);
        assert!(!manager.is_connecting());
    }

    #[tokio::test]
    async fn test_retries_with_backoff_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(
            CountingConnector {
                attempts: attempts.clone(),
                fail_first: 2,
                delay: Duration::ZERO,
                permanent: false,
            },
            fast_backoff(4),
        );
        assert_eq!(*manager.handle().await.unwrap(), 3);
        // 已连接后不再建连
        assert_eq!(*manager.handle().await.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(
            CountingConnector {
                attempts: attempts.clone(),
                fail_first: u32::MAX,
                delay: Duration::ZERO,
                permanent: false,
            },
            fast_backoff(3),
        );
        let err = manager.handle().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Exhausted { attempts: 3, .. }));
        assert!(err.to_string().starts_with("Backend unavailable"));
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_waiter_times_out_while_connect_in_progress() {
        let attempts = Arc::new(AtomicU32::new(0));
        let manager = Arc::new(
            ConnectionManager::new(
                CountingConnector {
                    attempts,
                    fail_first: 0,
                    delay: Duration::from_millis(200),
                    permanent: false,
                },
                fast_backoff(1),
            )
            .with_wait_timeout(Duration::from_millis(20)),
        );
        let first = {
            let m = manager.clone();
            tokio::spawn(async move { m.handle().await.map(|h| *h) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.is_connecting());
        let err = manager.handle().await.unwrap_err();
        assert!(matches!(err, ConnectionError::WaitTimeout(_)));
        assert_eq!(first.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let manager = ConnectionManager::new(
            CountingConnector {
                attempts: attempts.clone(),
                fail_first: 0,
                delay: Duration::ZERO,
                permanent: true,
            },
            fast_backoff(4),
        );
        let err = manager.handle().await.unwrap_err();
        assert_eq!(err, ConnectionError::Rejected("HTTP 403: invalid token #1".into()));
        assert!(!err.to_string().contains("Backend unavailable"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connecting());
    }

    #[tokio::test]
    async fn test_dropped_connect_clears_connecting_flag() {
        let manager = ConnectionManager::new(
            CountingConnector {
                attempts: Arc::new(AtomicU32::new(0)),
                fail_first: 0,
                delay: Duration::from_secs(5),
                permanent: false,
            },
            fast_backoff(1),
        );
        let cut_short = tokio::time::timeout(Duration::from_millis(20), manager.handle()).await;
        assert!(cut_short.is_err());
        assert!(!manager.is_connecting());
        assert!(!manager.is_connected().await);
    }
}
