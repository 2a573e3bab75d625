use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ExecError, Result};

use super::types::{ExecutionContext, ExecutorPlugin, HookStage};

/// on_error 链的裁决结果
///
/// `Unresolved` 表示没有插件接手，执行器需要在传播前做通用包装；
/// `Replaced` 表示某个插件显式给出了替换错误（或自身失败取代了原错误），
/// 按原样传播。
#[derive(Debug)]
pub enum ErrorChainOutcome {
    Unresolved(ExecError),
    Replaced(ExecError),
}

impl ErrorChainOutcome {
    pub fn into_error(self) -> ExecError {
        match self {
            ErrorChainOutcome::Unresolved(err) | ErrorChainOutcome::Replaced(err) => err,
        }
    }
}

/// 钩子链执行器
///
/// 无状态的阶段驱动器：按注册顺序串行调用插件钩子，尊重
/// `handles`/`enabled` 门控与 `break_chain` 断链信号。
pub struct HookRunner;

impl HookRunner {
    /// 给钩子失败补充阶段与插件标注；已标注的错误原样透传
    fn annotate(stage: HookStage, plugin: &str, err: ExecError) -> ExecError {
        match err {
            annotated @ ExecError::Stage { .. } => annotated,
            other => ExecError::stage(stage.name(), plugin, other.to_string()),
        }
    }

    /// 判断插件在指定阶段是否应被调用
    fn admitted<P, R>(
        plugin: &Arc<dyn ExecutorPlugin<P, R>>,
        stage: HookStage,
        ctx: &ExecutionContext<P, R>,
    ) -> bool
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        plugin.handles(stage) && plugin.enabled(stage, ctx)
    }

    /// 运行 before 阶段
    ///
    /// 任一插件返回错误立即终止本阶段，错误带上阶段与插件标注后上抛；
    /// 断链不是错误路径，仅提前结束本阶段。
    pub async fn run_before<P, R>(
        plugins: &[Arc<dyn ExecutorPlugin<P, R>>],
        ctx: &mut ExecutionContext<P, R>,
    ) -> Result<()>
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        ctx.hooks_runtimes.reset_stream();
        for plugin in plugins {
            if ctx.hooks_runtimes.break_chain {
                debug!(exec_id = %ctx.exec_id, stage = %HookStage::Before, "hook chain broken");
                break;
            }
            if !Self::admitted(plugin, HookStage::Before, ctx) {
                continue;
            }
            ctx.hooks_runtimes.bump();
            if let Err(err) = plugin.on_before(ctx).await {
                warn!(
                    exec_id = %ctx.exec_id,
                    plugin = plugin.plugin_name(),
                    "on_before hook failed: {err}"
                );
                return Err(Self::annotate(HookStage::Before, plugin.plugin_name(), err));
            }
        }
        Ok(())
    }

    /// 运行 exec 阶段
    ///
    /// 插件可以通过改写 `ctx.hooks_runtimes.return_value` 协作累积；
    /// 第一个返回 `Some` 的插件完成拦截并终止钩子链。阶段结束后
    /// `return_value` 为 `Some` 即表示原始任务被替代。
    pub async fn run_exec<P, R>(
        plugins: &[Arc<dyn ExecutorPlugin<P, R>>],
        ctx: &mut ExecutionContext<P, R>,
    ) -> Result<()>
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        ctx.hooks_runtimes.reset_stream();
        for plugin in plugins {
            if ctx.hooks_runtimes.break_chain {
                debug!(exec_id = %ctx.exec_id, stage = %HookStage::Exec, "hook chain broken");
                break;
            }
            if !Self::admitted(plugin, HookStage::Exec, ctx) {
                continue;
            }
            ctx.hooks_runtimes.bump();
            match plugin.on_exec(ctx).await {
                Ok(Some(value)) => {
                    debug!(
                        exec_id = %ctx.exec_id,
                        plugin = plugin.plugin_name(),
                        "on_exec hook intercepted execution"
                    );
                    ctx.hooks_runtimes.return_value = Some(value);
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        exec_id = %ctx.exec_id,
                        plugin = plugin.plugin_name(),
                        "on_exec hook failed: {err}"
                    );
                    return Err(Self::annotate(HookStage::Exec, plugin.plugin_name(), err));
                }
            }
        }
        Ok(())
    }

    /// 运行 success 阶段
    ///
    /// 插件按注册顺序依次改写 `ctx.return_value`，后一个插件看到的
    /// 是前一个改写后的值。
    pub async fn run_success<P, R>(
        plugins: &[Arc<dyn ExecutorPlugin<P, R>>],
        ctx: &mut ExecutionContext<P, R>,
    ) -> Result<()>
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        ctx.hooks_runtimes.reset_stream();
        for plugin in plugins {
            if ctx.hooks_runtimes.break_chain {
                debug!(exec_id = %ctx.exec_id, stage = %HookStage::Success, "hook chain broken");
                break;
            }
            if !Self::admitted(plugin, HookStage::Success, ctx) {
                continue;
            }
            ctx.hooks_runtimes.bump();
            if let Err(err) = plugin.on_success(ctx).await {
                warn!(
                    exec_id = %ctx.exec_id,
                    plugin = plugin.plugin_name(),
                    "on_success hook failed: {err}"
                );
                return Err(Self::annotate(HookStage::Success, plugin.plugin_name(), err));
            }
        }
        Ok(())
    }

    /// 运行 on_error 链
    ///
    /// 插件返回 `Ok(Some(e))` 时替换待传播错误并继续；返回 `Err(e)` 时
    /// 新错误取代原错误并跳过剩余 on_error 插件。
    pub async fn run_error<P, R>(
        plugins: &[Arc<dyn ExecutorPlugin<P, R>>],
        ctx: &mut ExecutionContext<P, R>,
        original: ExecError,
    ) -> ErrorChainOutcome
    where
        P: Send + 'static,
        R: Send + 'static,
    {
        ctx.hooks_runtimes.reset_stream();
        ctx.hooks_runtimes.error = Some(original.clone());
        let mut resolved = false;
        let mut pending = original;

        for plugin in plugins {
            if ctx.hooks_runtimes.break_chain {
                debug!(exec_id = %ctx.exec_id, stage = %HookStage::Error, "hook chain broken");
                break;
            }
            if !Self::admitted(plugin, HookStage::Error, ctx) {
                continue;
            }
            ctx.hooks_runtimes.bump();
            match plugin.on_error(ctx).await {
                Ok(Some(replacement)) => {
                    debug!(
                        exec_id = %ctx.exec_id,
                        plugin = plugin.plugin_name(),
                        "on_error hook replaced pending error"
                    );
                    ctx.hooks_runtimes.error = Some(replacement.clone());
                    pending = replacement;
                    resolved = true;
                }
                Ok(None) => {}
                Err(superseding) => {
                    warn!(
                        exec_id = %ctx.exec_id,
                        plugin = plugin.plugin_name(),
                        "on_error hook failed, superseding pending error: {superseding}"
                    );
                    let annotated =
                        Self::annotate(HookStage::Error, plugin.plugin_name(), superseding);
                    ctx.hooks_runtimes.error = Some(annotated.clone());
                    return ErrorChainOutcome::Replaced(annotated);
                }
            }
        }

        if resolved {
            ErrorChainOutcome::Replaced(pending)
        } else {
            ErrorChainOutcome::Unresolved(pending)
        }
    }
}
