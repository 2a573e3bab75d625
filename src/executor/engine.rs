use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{ExecError, Result};

use super::runner::{ErrorChainOutcome, HookRunner};
use super::types::{ExecOutcome, ExecutionContext, ExecutorPlugin, ExecutorTask};

/// 异步任务执行器
///
/// 持有插件注册表并驱动四阶段生命周期（before → exec → success → error）。
/// 注册表只在装配期写入，执行期只读；每次 `exec` 独占一个全新的
/// [`ExecutionContext`]，并发调用互不干扰。
pub struct Executor<P, R> {
    plugins: RwLock<Vec<Arc<dyn ExecutorPlugin<P, R>>>>,
}

impl<P, R> Default for Executor<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> Executor<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// 注册插件
    ///
    /// `only_one` 插件重复注册时是一次带告警的 no-op，而不是错误：
    /// 调用方装配顺序不应因幂等注册而中断。
    pub async fn use_plugin(&self, plugin: Arc<dyn ExecutorPlugin<P, R>>) {
        let mut guard = self.plugins.write().await;
        if plugin.only_one()
            && guard
                .iter()
                .any(|registered| registered.plugin_name() == plugin.plugin_name())
        {
            warn!(
                plugin = plugin.plugin_name(),
                "plugin already registered, ignoring duplicate"
            );
            return;
        }
        guard.push(plugin);
    }

    /// 已注册插件数量
    pub async fn plugin_count(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// 运行完整生命周期，失败时上抛类型化错误
    ///
    /// 流程：构建上下文 → before 链 → exec 链（插件拦截优先，否则运行
    /// 原始任务）→ success 链。任一阶段失败跳转 on_error 链；没有插件
    /// 接手时原错误被包装为 `UNKNOWN_ASYNC_ERROR` 后传播。
    pub async fn exec<T>(&self, parameters: P, task: &T) -> Result<R>
    where
        T: ExecutorTask<P, R> + ?Sized,
    {
        // 注册表快照：执行期间后续的 use_plugin 不影响本次调用
        let plugins: Vec<Arc<dyn ExecutorPlugin<P, R>>> =
            { self.plugins.read().await.clone() };
        let mut ctx = ExecutionContext::new(parameters);
        debug!(
            exec_id = %ctx.exec_id,
            plugin_count = plugins.len(),
            "starting execution"
        );

        let failure: ExecError = 'lifecycle: {
            if let Err(err) = HookRunner::run_before(&plugins, &mut ctx).await {
                break 'lifecycle err;
            }

            if let Err(err) = HookRunner::run_exec(&plugins, &mut ctx).await {
                break 'lifecycle err;
            }

            // 拦截值优先；没有插件拦截时回落到原始任务
            match ctx.hooks_runtimes.return_value.take() {
                Some(intercepted) => ctx.return_value = Some(intercepted),
                None => match task.call(&ctx).await {
                    Ok(value) => ctx.return_value = Some(value),
                    Err(err) => break 'lifecycle err,
                },
            }

            if let Err(err) = HookRunner::run_success(&plugins, &mut ctx).await {
                break 'lifecycle err;
            }

            let Some(value) = ctx.return_value.take() else {
                break 'lifecycle ExecError::task("return value missing after success stage");
            };
            debug!(exec_id = %ctx.exec_id, "execution completed");
            return Ok(value);
        };

        debug!(exec_id = %ctx.exec_id, "execution failed: {failure}");
        match HookRunner::run_error(&plugins, &mut ctx, failure).await {
            ErrorChainOutcome::Replaced(err) => Err(err),
            ErrorChainOutcome::Unresolved(err) => Err(match err {
                wrapped @ ExecError::UnknownAsync { .. } => wrapped,
                other => ExecError::unknown(other.to_string()),
            }),
        }
    }

    /// `exec` 的 `(task)` 形态：入参取默认值
    pub async fn exec_with_default<T>(&self, task: &T) -> Result<R>
    where
        T: ExecutorTask<P, R> + ?Sized,
        P: Default,
    {
        self.exec(P::default(), task).await
    }

    /// 非抛出模式：失败集合与 `exec` 完全一致，只是以值的形式返回
    pub async fn exec_no_error<T>(&self, parameters: P, task: &T) -> ExecOutcome<R>
    where
        T: ExecutorTask<P, R> + ?Sized,
    {
        match self.exec(parameters, task).await {
            Ok(value) => ExecOutcome::Completed(value),
            Err(err) => ExecOutcome::Failed(err),
        }
    }

    /// `exec_no_error` 的 `(task)` 形态
    pub async fn exec_no_error_with_default<T>(&self, task: &T) -> ExecOutcome<R>
    where
        T: ExecutorTask<P, R> + ?Sized,
        P: Default,
    {
        match self.exec_with_default(task).await {
            Ok(value) => ExecOutcome::Completed(value),
            Err(err) => ExecOutcome::Failed(err),
        }
    }
}
