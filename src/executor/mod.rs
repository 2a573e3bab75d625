//! 异步任务执行器模块
//!
//! - 提供统一的执行上下文、插件能力接口与执行结果定义
//! - 四阶段生命周期（before → exec → success → error）按注册顺序串行驱动
//! - 支持断链信号、阶段门控与非抛出调用模式

mod engine;
mod runner;
mod types;

pub use engine::Executor;
pub use runner::{ErrorChainOutcome, HookRunner};
pub use types::{
    ExecOutcome, ExecutionContext, ExecutorPlugin, ExecutorTask, HookStage, HooksRuntimes,
    TaskFuture,
};
