//! 取消协调器（代理式 Abort 管理）
//!
//! 把零个或多个取消触发源（毫秒级超时、外部取消令牌）组合为每个
//! 登记一枚派生取消令牌。所有终态路径（手动 abort、超时、外部取消、
//! 显式 cleanup、abort_all）都保证幂等释放定时器与监听任务，登记
//! 从内部簿记中彻底移除，`abort_id` 立即可复用。
//!
//! 组合采用显式簿记而非令牌父子链：定时器与监听各是一个可被 abort
//! 的 tokio 任务，句柄存放在登记条目里，由第一个到达的终态路径统一
//! 释放，借此满足"无悬挂定时器/监听"的资源安全不变量。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ExecError, Result};

/// 本地取消时机触发的回调
pub type AbortCallback = Arc<dyn Fn() + Send + Sync>;

/// 登记配置
#[derive(Clone, Default)]
pub struct AbortConfig {
    /// 协调器实例内唯一键；缺省时自动生成（池名前缀 + 序号）
    pub abort_id: Option<String>,
    /// 毫秒级超时；`None` 或 `Some(0)` 表示不设超时，不创建定时器
    pub abort_timeout_ms: Option<u64>,
    /// 外部取消令牌；其取消会传导进派生令牌，但协调器绝不反向取消它
    pub signal: Option<CancellationToken>,
    /// 手动 `abort()` 时触发一次；上游外部取消不触发
    pub on_aborted: Option<AbortCallback>,
    /// 超时触发取消时触发一次；上游外部取消不触发
    pub on_aborted_timeout: Option<AbortCallback>,
}

impl AbortConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abort_id<T: Into<String>>(mut self, abort_id: T) -> Self {
        self.abort_id = Some(abort_id.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.abort_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_on_aborted(mut self, callback: AbortCallback) -> Self {
        self.on_aborted = Some(callback);
        self
    }

    pub fn with_on_aborted_timeout(mut self, callback: AbortCallback) -> Self {
        self.on_aborted_timeout = Some(callback);
        self
    }
}

/// 登记结果：`signal` 是本次登记专属的派生取消令牌
#[derive(Debug, Clone)]
pub struct AbortHandle {
    pub abort_id: String,
    pub signal: CancellationToken,
}

/// 注册表条目
struct RegistrationEntry {
    derived: CancellationToken,
    timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    on_aborted: Option<AbortCallback>,
}

impl RegistrationEntry {
    /// 释放两个触发源的任务资源；重复调用无额外效果
    fn release(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// 取消协调器
///
/// 登记/释放/手动取消均为同步簿记操作；只有派生令牌的最终触发
/// 是异步的（由定时器或外部事件驱动）。
pub struct AbortCoordinator {
    name: Arc<str>,
    registrations: Arc<DashMap<String, RegistrationEntry>>,
    seq: AtomicU64,
}

impl AbortCoordinator {
    /// `name` 为池名，用于自动生成 id 与重复注册的错误描述
    pub fn new<T: Into<Arc<str>>>(name: T) -> Self {
        Self {
            name: name.into(),
            registrations: Arc::new(DashMap::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前存活登记数
    pub fn live_count(&self) -> usize {
        self.registrations.len()
    }

    fn next_abort_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.name, seq)
    }

    /// 登记一次可取消操作
    ///
    /// 重复的存活 `abort_id` 在调用点同步报错。外部令牌在登记时就已
    /// 取消的，直接返回已取消的派生令牌且不建立任何簿记。
    pub fn register(&self, config: AbortConfig) -> Result<AbortHandle> {
        let abort_id = config
            .abort_id
            .clone()
            .unwrap_or_else(|| self.next_abort_id());

        // 上游已取消：协调器作为透明代理，不重复宣告、不占用登记表
        if let Some(signal) = &config.signal {
            if signal.is_cancelled() {
                let derived = CancellationToken::new();
                derived.cancel();
                debug!(
                    pool = %self.name,
                    abort_id = %abort_id,
                    "external signal already cancelled at registration"
                );
                return Ok(AbortHandle {
                    abort_id,
                    signal: derived,
                });
            }
        }

        let derived = CancellationToken::new();
        match self.registrations.entry(abort_id.clone()) {
            Entry::Occupied(_) => Err(ExecError::DuplicateAbortId {
                coordinator: self.name.to_string(),
                abort_id,
            }),
            Entry::Vacant(slot) => {
                let timer = match config.abort_timeout_ms {
                    Some(timeout_ms) if timeout_ms > 0 => Some(self.spawn_timer(
                        abort_id.clone(),
                        timeout_ms,
                        derived.clone(),
                        config.on_aborted_timeout.clone(),
                    )),
                    // 非法或缺省的超时：不创建定时器
                    _ => None,
                };
                let listener = config.signal.clone().map(|signal| {
                    self.spawn_listener(abort_id.clone(), signal, derived.clone())
                });

                slot.insert(RegistrationEntry {
                    derived: derived.clone(),
                    timer,
                    listener,
                    on_aborted: config.on_aborted.clone(),
                });
                debug!(pool = %self.name, abort_id = %abort_id, "registration created");
                Ok(AbortHandle {
                    abort_id,
                    signal: derived,
                })
            }
        }
    }

    fn spawn_timer(
        &self,
        abort_id: String,
        timeout_ms: u64,
        derived: CancellationToken,
        on_aborted_timeout: Option<AbortCallback>,
    ) -> JoinHandle<()> {
        let registrations = Arc::clone(&self.registrations);
        let pool = Arc::clone(&self.name);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            // 从注册表移除即赢得终态裁决；输掉的触发源已被释放
            if let Some((_, mut entry)) = registrations.remove(&abort_id) {
                entry.release();
                derived.cancel();
                debug!(pool = %pool, abort_id = %abort_id, timeout_ms, "registration aborted by timeout");
                // 簿记已完成，回调异常不影响内部状态
                if let Some(callback) = on_aborted_timeout {
                    callback();
                }
            }
        })
    }

    fn spawn_listener(
        &self,
        abort_id: String,
        signal: CancellationToken,
        derived: CancellationToken,
    ) -> JoinHandle<()> {
        let registrations = Arc::clone(&self.registrations);
        let pool = Arc::clone(&self.name);
        tokio::spawn(async move {
            signal.cancelled().await;
            if let Some((_, mut entry)) = registrations.remove(&abort_id) {
                entry.release();
                derived.cancel();
                // 上游宣告的取消只做透明传导，不触发本地回调
                debug!(pool = %pool, abort_id = %abort_id, "registration released by upstream signal");
            }
        })
    }

    /// 手动取消指定登记
    ///
    /// 返回是否命中了存活登记；二次调用返回 false（幂等）。
    /// `on_aborted` 在簿记清理完成后触发一次。
    pub fn abort(&self, abort_id: &str) -> bool {
        match self.registrations.remove(abort_id) {
            Some((_, mut entry)) => {
                entry.release();
                entry.derived.cancel();
                debug!(pool = %self.name, abort_id = %abort_id, "registration aborted manually");
                if let Some(callback) = entry.on_aborted.take() {
                    callback();
                }
                true
            }
            None => false,
        }
    }

    /// 释放登记资源但不触发取消、不触发任何回调
    ///
    /// 对未知 id 或已释放登记是 no-op。
    pub fn cleanup(&self, abort_id: &str) -> bool {
        match self.registrations.remove(abort_id) {
            Some((_, mut entry)) => {
                entry.release();
                debug!(pool = %self.name, abort_id = %abort_id, "registration cleaned up");
                true
            }
            None => false,
        }
    }

    /// 取消全部存活登记并释放资源，不触发任何回调
    pub fn abort_all(&self) {
        let ids: Vec<String> = self
            .registrations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let count = ids.len();
        for abort_id in ids {
            if let Some((_, mut entry)) = self.registrations.remove(&abort_id) {
                entry.release();
                entry.derived.cancel();
            }
        }
        if count > 0 {
            debug!(pool = %self.name, count, "aborted all live registrations");
        }
    }
}
