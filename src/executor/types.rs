use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ExecError, Result};

/// 生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    Before,
    Exec,
    Success,
    Error,
}

impl HookStage {
    pub fn name(&self) -> &'static str {
        match self {
            HookStage::Before => "on_before",
            HookStage::Exec => "on_exec",
            HookStage::Success => "on_success",
            HookStage::Error => "on_error",
        }
    }
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 单次执行内的钩子运行时暂存区
///
/// 每次 `exec` 调用新建，执行结束即丢弃，绝不跨执行持久化。
#[derive(Debug)]
pub struct HooksRuntimes<R> {
    /// 当前阶段已调用的钩子计数（每个新阶段重置为 0）
    pub times: u32,
    /// 断链标记：置位后当前阶段不再调用后续钩子
    pub break_chain: bool,
    /// 钩子链累积的结果值
    pub return_value: Option<R>,
    /// 当前待传播的错误（仅 on_error 阶段有值）
    pub error: Option<ExecError>,
}

impl<R> Default for HooksRuntimes<R> {
    fn default() -> Self {
        Self {
            times: 0,
            break_chain: false,
            return_value: None,
            error: None,
        }
    }
}

impl<R> HooksRuntimes<R> {
    /// 在新阶段（新的一"流"工作）开始时重置计数与断链标记
    pub fn reset_stream(&mut self) {
        self.times = 0;
        self.break_chain = false;
    }

    pub fn bump(&mut self) {
        self.times += 1;
    }
}

/// 执行上下文
///
/// 由单次执行独占，不在并发调用间共享。插件通过 `parameters`
/// 传递副作用，通过 `return_value` 传递/改写结果。
#[derive(Debug)]
pub struct ExecutionContext<P, R> {
    /// 执行标识，用于日志关联
    pub exec_id: String,
    /// 调用方入参，各阶段插件可修改
    pub parameters: P,
    /// 最终返回给调用方的结果
    pub return_value: Option<R>,
    /// 本次执行的钩子暂存区
    pub hooks_runtimes: HooksRuntimes<R>,
}

impl<P, R> ExecutionContext<P, R> {
    pub fn new(parameters: P) -> Self {
        Self {
            exec_id: Uuid::new_v4().to_string(),
            parameters,
            return_value: None,
            hooks_runtimes: HooksRuntimes::default(),
        }
    }

    /// 置位断链标记，终止当前阶段的后续钩子
    pub fn break_chain(&mut self) {
        self.hooks_runtimes.break_chain = true;
    }
}

/// 执行器插件
///
/// 每个生命周期方法都是可选的（默认空实现）。`handles` 声明插件在
/// 哪些阶段真正挂载了钩子，`enabled` 则按阶段+上下文做运行时门控：
/// 被禁用的插件在该阶段不可见，但注册状态保留（`use_plugin` 幂等
/// 判断仍然生效）。
#[async_trait]
pub trait ExecutorPlugin<P, R>: Send + Sync
where
    P: Send,
    R: Send,
{
    /// 插件标识，用于幂等注册与日志
    fn plugin_name(&self) -> &str;

    /// 为 true 时同名插件只允许注册一次（二次注册告警并忽略）
    fn only_one(&self) -> bool {
        false
    }

    /// 插件是否在指定阶段挂载了钩子
    fn handles(&self, _stage: HookStage) -> bool {
        true
    }

    /// 运行时门控：返回 false 时跳过该阶段，注册状态不受影响
    fn enabled(&self, _stage: HookStage, _ctx: &ExecutionContext<P, R>) -> bool {
        true
    }

    /// before 阶段：返回值被忽略，副作用仅通过 `ctx.parameters` 传递
    async fn on_before(&self, _ctx: &mut ExecutionContext<P, R>) -> Result<()> {
        Ok(())
    }

    /// exec 阶段：返回 `Some` 表示拦截本次执行并终止钩子链；
    /// 协作式累积通过改写 `ctx.hooks_runtimes.return_value` 并返回 `None` 完成
    async fn on_exec(&self, _ctx: &mut ExecutionContext<P, R>) -> Result<Option<R>> {
        Ok(None)
    }

    /// success 阶段：可改写 `ctx.return_value`，后续插件看到改写后的值
    async fn on_success(&self, _ctx: &mut ExecutionContext<P, R>) -> Result<()> {
        Ok(())
    }

    /// error 阶段：返回 `Ok(Some)` 以替换待传播错误（继续后续插件）；
    /// 返回 `Err` 则取代原错误并立即终止 on_error 链
    async fn on_error(&self, _ctx: &mut ExecutionContext<P, R>) -> Result<Option<ExecError>> {
        Ok(None)
    }
}

#[async_trait]
impl<P, R, T> ExecutorPlugin<P, R> for Arc<T>
where
    P: Send + 'static,
    R: Send + 'static,
    T: ExecutorPlugin<P, R> + ?Sized,
{
    fn plugin_name(&self) -> &str {
        (**self).plugin_name()
    }

    fn only_one(&self) -> bool {
        (**self).only_one()
    }

    fn handles(&self, stage: HookStage) -> bool {
        (**self).handles(stage)
    }

    fn enabled(&self, stage: HookStage, ctx: &ExecutionContext<P, R>) -> bool {
        (**self).enabled(stage, ctx)
    }

    async fn on_before(&self, ctx: &mut ExecutionContext<P, R>) -> Result<()> {
        (**self).on_before(ctx).await
    }

    async fn on_exec(&self, ctx: &mut ExecutionContext<P, R>) -> Result<Option<R>> {
        (**self).on_exec(ctx).await
    }

    async fn on_success(&self, ctx: &mut ExecutionContext<P, R>) -> Result<()> {
        (**self).on_success(ctx).await
    }

    async fn on_error(&self, ctx: &mut ExecutionContext<P, R>) -> Result<Option<ExecError>> {
        (**self).on_error(ctx).await
    }
}

/// 任务返回的装箱 Future
pub type TaskFuture<'a, R> = Pin<Box<dyn Future<Output = Result<R>> + Send + 'a>>;

/// 执行器提交的工作单元
///
/// 任务以只读方式观察执行上下文（含插件写入的参数），
/// 取消令牌等协作信息由插件放入 `parameters` 后在此读取。
pub trait ExecutorTask<P, R>: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a ExecutionContext<P, R>) -> TaskFuture<'a, R>;
}

impl<P, R, F> ExecutorTask<P, R> for F
where
    F: for<'a> Fn(&'a ExecutionContext<P, R>) -> TaskFuture<'a, R> + Send + Sync,
{
    fn call<'a>(&'a self, ctx: &'a ExecutionContext<P, R>) -> TaskFuture<'a, R> {
        self(ctx)
    }
}

/// 非抛出模式的执行结果
#[derive(Debug)]
pub enum ExecOutcome<R> {
    Completed(R),
    Failed(ExecError),
}

impl<R> ExecOutcome<R> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ExecOutcome::Completed(_))
    }

    pub fn into_result(self) -> Result<R> {
        match self {
            ExecOutcome::Completed(value) => Ok(value),
            ExecOutcome::Failed(err) => Err(err),
        }
    }

    pub fn err(&self) -> Option<&ExecError> {
        match self {
            ExecOutcome::Completed(_) => None,
            ExecOutcome::Failed(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        assert_eq!(HookStage::Before.name(), "on_before");
        assert_eq!(HookStage::Error.to_string(), "on_error");
    }

    #[test]
    fn reset_stream_clears_counter_and_break_flag() {
        let mut runtimes: HooksRuntimes<String> = HooksRuntimes::default();
        runtimes.bump();
        runtimes.bump();
        runtimes.break_chain = true;
        runtimes.return_value = Some("kept".into());

        runtimes.reset_stream();

        assert_eq!(runtimes.times, 0);
        assert!(!runtimes.break_chain);
        assert_eq!(runtimes.return_value.as_deref(), Some("kept"));
    }

    #[test]
    fn context_owns_fresh_runtimes() {
        let ctx: ExecutionContext<u32, String> = ExecutionContext::new(7);
        assert_eq!(ctx.parameters, 7);
        assert_eq!(ctx.hooks_runtimes.times, 0);
        assert!(ctx.return_value.is_none());
        assert!(!ctx.exec_id.is_empty());
    }
}
