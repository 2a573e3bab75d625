//! 重试策略引擎（固定/自定义延迟与指数退避）
//!
//! 把任意异步操作按声明式策略包装为可重试操作：失败后按
//! `should_retry` 判定与延迟策略重试，预算耗尽时报告类型化的
//! `RETRY_ERROR` 终态错误，绝不静默吞掉失败。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{ExecError, Result};

/// 重试次数下限（含首次尝试）
pub const MIN_RETRIES: u32 = 1;
/// 重试次数上限
pub const MAX_RETRIES: u32 = 16;
/// 默认基础延迟（毫秒）
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// 按失败序号计算延迟毫秒数的函数
pub type RetryDelayFn = Arc<dyn Fn(u32) -> u64 + Send + Sync>;

/// 是否继续重试的判定谓词
pub type RetryPredicate = Arc<dyn Fn(&ExecError) -> bool + Send + Sync>;

/// 延迟策略：固定毫秒值，或以零基失败序号为入参的自定义函数
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(u64),
    Custom(RetryDelayFn),
}

impl Default for RetryDelay {
    fn default() -> Self {
        RetryDelay::Fixed(DEFAULT_RETRY_DELAY_MS)
    }
}

impl fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryDelay::Fixed(ms) => f.debug_tuple("Fixed").field(ms).finish(),
            RetryDelay::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

/// 重试策略配置
#[derive(Clone)]
pub struct RetryOptions {
    /// 总尝试次数（含首次），规范化后落在 `[1, 16]`
    pub max_retries: u32,
    /// 延迟策略
    pub retry_delay: RetryDelay,
    /// 为 true 且延迟为固定值时，第 n 次失败后的延迟为 `base * 2^n`
    pub use_exponential_backoff: bool,
    /// 重试判定；`None` 等价于恒真
    pub should_retry: Option<RetryPredicate>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: RetryDelay::default(),
            use_exponential_backoff: false,
            should_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("use_exponential_backoff", &self.use_exponential_backoff)
            .field("should_retry", &self.should_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    /// 填充默认并把 `max_retries` 夹到 `[1, 16]`
    pub fn normalize(mut self) -> Self {
        self.max_retries = self.max_retries.clamp(MIN_RETRIES, MAX_RETRIES);
        self
    }

    /// 把延迟策略归约为统一的函数形式
    ///
    /// 指数退避被表达为函数形式的派生情形，而不是独立代码路径，
    /// 避免两套取整/边界行为。
    pub fn delay_fn(&self) -> RetryDelayFn {
        match &self.retry_delay {
            RetryDelay::Custom(f) => Arc::clone(f),
            RetryDelay::Fixed(base) => {
                let base = *base;
                if self.use_exponential_backoff {
                    Arc::new(move |attempt| base.saturating_mul(2u64.saturating_pow(attempt)))
                } else {
                    Arc::new(move |_| base)
                }
            }
        }
    }

    /// 以逐字段浅合并的方式应用单次调用覆盖
    pub fn merge(&self, overrides: &RetryOverrides) -> RetryOptions {
        RetryOptions {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            retry_delay: overrides
                .retry_delay
                .clone()
                .unwrap_or_else(|| self.retry_delay.clone()),
            use_exponential_backoff: overrides
                .use_exponential_backoff
                .unwrap_or(self.use_exponential_backoff),
            should_retry: overrides
                .should_retry
                .clone()
                .or_else(|| self.should_retry.clone()),
        }
        .normalize()
    }
}

/// 单次调用级别的策略覆盖（未设置的字段沿用策略默认）
#[derive(Clone, Default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub retry_delay: Option<RetryDelay>,
    pub use_exponential_backoff: Option<bool>,
    pub should_retry: Option<RetryPredicate>,
}

impl RetryOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_retry_delay(mut self, delay: RetryDelay) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = Some(enabled);
        self
    }

    pub fn with_should_retry(mut self, predicate: RetryPredicate) -> Self {
        self.should_retry = Some(predicate);
        self
    }
}

/// 带重试的执行函数
///
/// 第 0 次尝试立即运行。失败后先咨询 `should_retry`：被否决时立即
/// 原样上抛底层错误（区别于预算耗尽的 `RETRY_ERROR` 包装）；否则按
/// 延迟策略等待（延迟为 0 时跳过等待）后重试。全部尝试失败后报告
/// 携带末次错误信息的重试耗尽错误。
pub async fn execute_with_retry<F, Fut, T>(options: &RetryOptions, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let options = options.clone().normalize();
    let delay_fn = options.delay_fn();

    let mut last_error: Option<ExecError> = None;
    for attempt in 0..options.max_retries {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if let Some(predicate) = &options.should_retry {
                    if !predicate(&err) {
                        debug!(
                            attempt = attempt + 1,
                            "retry vetoed by predicate, propagating original error"
                        );
                        return Err(err);
                    }
                }

                if attempt + 1 >= options.max_retries {
                    return Err(ExecError::RetryExhausted {
                        attempts: options.max_retries,
                        message: err.to_string(),
                    });
                }

                let delay = Duration::from_millis(delay_fn(attempt));
                debug!(
                    attempt = attempt + 1,
                    max_retries = options.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure: {err}"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    // max_retries 下限为 1，循环必然在上面返回；保底分支仅作防御
    Err(ExecError::RetryExhausted {
        attempts: options.max_retries,
        message: last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "max retries exceeded".to_string()),
    })
}

/// 规范化后的重试策略
///
/// 持有一份 `normalize` 过的配置，可反复执行不同操作；
/// `execute_with` 支持单次调用覆盖。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            options: options.normalize(),
        }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        execute_with_retry(&self.options, f).await
    }

    pub async fn execute_with<F, Fut, T>(&self, overrides: &RetryOverrides, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let merged = self.options.merge(overrides);
        execute_with_retry(&merged, f).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}
