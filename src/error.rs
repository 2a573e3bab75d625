//! 统一异常处理模块
//!
//! - 为执行器、重试引擎与取消协调器提供共享的类型化错误
//! - 每个变体携带稳定的错误码，便于上层按码分流和告警

use thiserror::Error;

/// 执行引擎错误类型
///
/// 错误在执行上下文中会被暂存（`hooks_runtimes.error`），因此要求 `Clone`，
/// 所有变体只携带字符串负载。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// 未被任何 on_error 插件消化的阶段错误（通用包装）
    #[error("[UNKNOWN_ASYNC_ERROR] {message}")]
    UnknownAsync { message: String },

    /// 生命周期阶段内插件产生的错误
    #[error("[{stage}] plugin '{plugin}' failed: {message}")]
    Stage {
        stage: String,
        plugin: String,
        message: String,
    },

    /// 工作单元（任务本体）执行失败
    #[error("task failed: {message}")]
    Task { message: String },

    /// 重试预算耗尽后的终态错误
    #[error("all {attempts} attempts failed: {message}")]
    RetryExhausted { attempts: u32, message: String },

    /// 同一协调器下重复注册了仍然存活的 abort_id
    #[error("duplicate abort id '{abort_id}' in coordinator '{coordinator}'")]
    DuplicateAbortId {
        coordinator: String,
        abort_id: String,
    },

    /// 配置加载或校验失败
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl ExecError {
    /// 构造通用包装错误
    pub fn unknown<T: Into<String>>(message: T) -> Self {
        ExecError::UnknownAsync {
            message: message.into(),
        }
    }

    /// 构造阶段错误
    pub fn stage<S, P, M>(stage: S, plugin: P, message: M) -> Self
    where
        S: Into<String>,
        P: Into<String>,
        M: Into<String>,
    {
        ExecError::Stage {
            stage: stage.into(),
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// 构造任务错误
    pub fn task<T: Into<String>>(message: T) -> Self {
        ExecError::Task {
            message: message.into(),
        }
    }

    /// 稳定的机器可读错误码
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::UnknownAsync { .. } => "UNKNOWN_ASYNC_ERROR",
            ExecError::Stage { .. } => "STAGE_ERROR",
            ExecError::Task { .. } => "TASK_ERROR",
            ExecError::RetryExhausted { .. } => "RETRY_ERROR",
            ExecError::DuplicateAbortId { .. } => "DUPLICATE_ABORT_ID",
            ExecError::Config { .. } => "CONFIG_ERROR",
        }
    }
}

// anyhow 只出现在配置装载边界，跨边界统一折叠为配置错误
impl From<anyhow::Error> for ExecError {
    fn from(err: anyhow::Error) -> Self {
        ExecError::Config {
            message: format!("{err:#}"),
        }
    }
}

/// 引擎统一 Result 别名
pub type Result<T> = std::result::Result<T, ExecError>;
