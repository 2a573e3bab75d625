//! Flare Exec Core 异步任务执行引擎
//!
//! - 可组合的插件生命周期执行器（before → exec → success → error）
//! - 声明式重试策略引擎（固定/自定义延迟与指数退避）
//! - 代理式取消协调器（超时与外部信号组合为派生取消令牌）

pub mod abort;
pub mod config;
pub mod error;
pub mod executor;
pub mod retry;
pub mod tracing;

pub use abort::{AbortCallback, AbortConfig, AbortCoordinator, AbortHandle};
pub use config::{
    AbortDefaultsConfig, ExecAppConfig, LoggingConfig, RetryDefaultsConfig, load_config,
    load_config_strict,
};
pub use error::{ExecError, Result};
pub use executor::{
    ErrorChainOutcome, ExecOutcome, ExecutionContext, Executor, ExecutorPlugin, ExecutorTask,
    HookRunner, HookStage, HooksRuntimes, TaskFuture,
};
pub use retry::{
    RetryDelay, RetryOptions, RetryOverrides, RetryPolicy, RetryPredicate, execute_with_retry,
};
