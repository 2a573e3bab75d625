// 执行器生命周期集成测试
// 覆盖阶段顺序、断链、幂等注册、错误链裁决与非抛出模式的一致性

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio_test::assert_ok;

use flare_exec_core::{
    ExecError, ExecOutcome, ExecutionContext, Executor, ExecutorPlugin, ExecutorTask, HookStage,
    Result, TaskFuture,
};

#[derive(Debug, Default, Clone)]
struct Params {
    modified_by: Option<String>,
}

type Ctx = ExecutionContext<Params, String>;

/// 返回插件写入的 modified_by
fn modified_by_task<'a>(ctx: &'a Ctx) -> TaskFuture<'a, String> {
    Box::pin(async move {
        Ok(ctx
            .parameters
            .modified_by
            .clone()
            .unwrap_or_else(|| "unset".to_string()))
    })
}

/// 恒定返回 "x"
fn x_task<'a>(_ctx: &'a Ctx) -> TaskFuture<'a, String> {
    Box::pin(async move { Ok("x".to_string()) })
}

/// 恒定失败
fn failing_task<'a>(_ctx: &'a Ctx) -> TaskFuture<'a, String> {
    Box::pin(async move { Err(ExecError::task("boom")) })
}

/// 记录每个阶段调用次数的任务替身
struct CountingTask {
    calls: Arc<AtomicU32>,
}

impl ExecutorTask<Params, String> for CountingTask {
    fn call<'a>(&'a self, _ctx: &'a Ctx) -> TaskFuture<'a, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok("from task".to_string()) })
    }
}

/// before 阶段写入 modified_by
struct BeforeWriter {
    name: String,
    value: String,
}

#[async_trait]
impl ExecutorPlugin<Params, String> for BeforeWriter {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    async fn on_before(&self, ctx: &mut Ctx) -> Result<()> {
        ctx.parameters.modified_by = Some(self.value.clone());
        Ok(())
    }
}

/// 各阶段调用计数器
#[derive(Default)]
struct StageCounter {
    name: String,
    before: AtomicU32,
    exec: AtomicU32,
    success: AtomicU32,
    error: AtomicU32,
    only_one: bool,
    disabled_stage: Option<HookStage>,
}

impl StageCounter {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ExecutorPlugin<Params, String> for StageCounter {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    fn only_one(&self) -> bool {
        self.only_one
    }

    fn enabled(&self, stage: HookStage, _ctx: &Ctx) -> bool {
        self.disabled_stage != Some(stage)
    }

    async fn on_before(&self, _ctx: &mut Ctx) -> Result<()> {
        self.before.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_exec(&self, _ctx: &mut Ctx) -> Result<Option<String>> {
        self.exec.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn on_success(&self, _ctx: &mut Ctx) -> Result<()> {
        self.success.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_error(&self, _ctx: &mut Ctx) -> Result<Option<ExecError>> {
        self.error.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// before 阶段直接失败
struct FailingBefore;

#[async_trait]
impl ExecutorPlugin<Params, String> for FailingBefore {
    fn plugin_name(&self) -> &str {
        "failing-before"
    }

    async fn on_before(&self, _ctx: &mut Ctx) -> Result<()> {
        Err(ExecError::task("before blew up"))
    }
}

/// success 阶段把结果改写为 "<prev> modified by <tag>"
struct SuccessDecorator {
    name: String,
    tag: String,
}

#[async_trait]
impl ExecutorPlugin<Params, String> for SuccessDecorator {
    fn plugin_name(&self) -> &str {
        &self.name
    }

    async fn on_success(&self, ctx: &mut Ctx) -> Result<()> {
        if let Some(prev) = ctx.return_value.take() {
            ctx.return_value = Some(format!("{} modified by {}", prev, self.tag));
        }
        Ok(())
    }
}

#[tokio::test]
async fn before_failure_skips_remaining_before_hooks_and_runs_error_chain() {
    let executor: Executor<Params, String> = Executor::new();
    let tail = Arc::new(StageCounter::named("tail"));
    executor.use_plugin(Arc::new(FailingBefore)).await;
    executor.use_plugin(tail.clone()).await;

    let err = executor
        .exec(Params::default(), &modified_by_task)
        .await
        .unwrap_err();

    // 无人接手的失败走通用包装，但阶段与插件标注保留在消息里
    assert_eq!(err.code(), "UNKNOWN_ASYNC_ERROR");
    assert!(err.to_string().contains("on_before"));
    assert!(err.to_string().contains("failing-before"));
    assert!(err.to_string().contains("before blew up"));
    assert_eq!(tail.before.load(Ordering::SeqCst), 0);
    // on_error 链仍然完整地跑了一次
    assert_eq!(tail.error.load(Ordering::SeqCst), 1);
    assert_eq!(tail.success.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn success_hooks_chain_in_registration_order() {
    let executor: Executor<Params, String> = Executor::new();
    executor
        .use_plugin(Arc::new(SuccessDecorator {
            name: "deco-a".into(),
            tag: "A".into(),
        }))
        .await;
    executor
        .use_plugin(Arc::new(SuccessDecorator {
            name: "deco-b".into(),
            tag: "B".into(),
        }))
        .await;

    let result = executor.exec(Params::default(), &x_task).await.unwrap();
    assert_eq!(result, "x modified by A modified by B");
}

#[tokio::test]
async fn only_one_plugin_registers_exactly_once() {
    let executor: Executor<Params, String> = Executor::new();
    let counter = Arc::new(StageCounter {
        name: "singleton".into(),
        only_one: true,
        ..Default::default()
    });
    executor.use_plugin(counter.clone()).await;
    executor.use_plugin(counter.clone()).await;

    assert_eq!(executor.plugin_count().await, 1);

    executor
        .exec(Params::default(), &x_task)
        .await
        .unwrap();
    assert_eq!(counter.before.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn last_before_writer_wins() {
    let executor: Executor<Params, String> = Executor::new();
    executor
        .use_plugin(Arc::new(BeforeWriter {
            name: "writer-a".into(),
            value: "A".into(),
        }))
        .await;
    executor
        .use_plugin(Arc::new(BeforeWriter {
            name: "writer-b".into(),
            value: "B".into(),
        }))
        .await;

    let result = executor
        .exec(Params::default(), &modified_by_task)
        .await
        .unwrap();
    assert_eq!(result, "B");
}

#[tokio::test]
async fn exec_interception_skips_original_task() {
    struct Interceptor;

    #[async_trait]
    impl ExecutorPlugin<Params, String> for Interceptor {
        fn plugin_name(&self) -> &str {
            "interceptor"
        }

        async fn on_exec(&self, _ctx: &mut Ctx) -> Result<Option<String>> {
            Ok(Some("intercepted".to_string()))
        }
    }

    let executor: Executor<Params, String> = Executor::new();
    executor.use_plugin(Arc::new(Interceptor)).await;
    let task_calls = Arc::new(AtomicU32::new(0));
    let task = CountingTask {
        calls: task_calls.clone(),
    };

    let result = executor.exec(Params::default(), &task).await.unwrap();

    assert_eq!(result, "intercepted");
    assert_eq!(task_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exec_falls_back_to_original_task_without_interceptor() {
    let executor: Executor<Params, String> = Executor::new();
    let task_calls = Arc::new(AtomicU32::new(0));
    let task = CountingTask {
        calls: task_calls.clone(),
    };

    let result = executor.exec(Params::default(), &task).await.unwrap();

    assert_eq!(result, "from task");
    assert_eq!(task_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exec_hooks_accumulate_until_first_defined_value() {
    /// 写入部分结果但不拦截
    struct Seed;

    #[async_trait]
    impl ExecutorPlugin<Params, String> for Seed {
        fn plugin_name(&self) -> &str {
            "seed"
        }

        async fn on_exec(&self, ctx: &mut Ctx) -> Result<Option<String>> {
            ctx.hooks_runtimes.return_value = Some("x".to_string());
            Ok(None)
        }
    }

    /// 读取前序累积值并给出最终拦截值
    struct Finalizer;

    #[async_trait]
    impl ExecutorPlugin<Params, String> for Finalizer {
        fn plugin_name(&self) -> &str {
            "finalizer"
        }

        async fn on_exec(&self, ctx: &mut Ctx) -> Result<Option<String>> {
            let prev = ctx.hooks_runtimes.return_value.take().unwrap_or_default();
            Ok(Some(format!("{prev} finalized")))
        }
    }

    let executor: Executor<Params, String> = Executor::new();
    let tail = Arc::new(StageCounter::named("after-finalizer"));
    executor.use_plugin(Arc::new(Seed)).await;
    executor.use_plugin(Arc::new(Finalizer)).await;
    executor.use_plugin(tail.clone()).await;

    let result = executor
        .exec(Params::default(), &modified_by_task)
        .await
        .unwrap();

    assert_eq!(result, "x finalized");
    // 第一个产生确定值的插件之后，exec 链不再调用
    assert_eq!(tail.exec.load(Ordering::SeqCst), 0);
    // 其余阶段不受影响
    assert_eq!(tail.before.load(Ordering::SeqCst), 1);
    assert_eq!(tail.success.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn break_chain_ends_stage_without_failing_execution() {
    struct Breaker;

    #[async_trait]
    impl ExecutorPlugin<Params, String> for Breaker {
        fn plugin_name(&self) -> &str {
            "breaker"
        }

        async fn on_before(&self, ctx: &mut Ctx) -> Result<()> {
            ctx.break_chain();
            Ok(())
        }
    }

    let executor: Executor<Params, String> = Executor::new();
    let tail = Arc::new(StageCounter::named("tail"));
    executor.use_plugin(Arc::new(Breaker)).await;
    executor.use_plugin(tail.clone()).await;

    let result = executor.exec(Params::default(), &x_task).await.unwrap();

    assert_eq!(result, "x");
    assert_eq!(tail.before.load(Ordering::SeqCst), 0);
    // 断链只影响当前阶段；success 阶段照常运行
    assert_eq!(tail.success.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_stage_is_invisible_but_plugin_stays_registered() {
    let executor: Executor<Params, String> = Executor::new();
    let counter = Arc::new(StageCounter {
        name: "gated".into(),
        only_one: true,
        disabled_stage: Some(HookStage::Before),
        ..Default::default()
    });
    executor.use_plugin(counter.clone()).await;
    // 幂等注册依旧生效
    executor.use_plugin(counter.clone()).await;
    assert_eq!(executor.plugin_count().await, 1);

    executor.exec(Params::default(), &x_task).await.unwrap();

    assert_eq!(counter.before.load(Ordering::SeqCst), 0);
    assert_eq!(counter.success.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unresolved_failure_is_wrapped_as_unknown_async_error() {
    let executor: Executor<Params, String> = Executor::new();

    let err = executor
        .exec(Params::default(), &failing_task)
        .await
        .unwrap_err();

    assert_eq!(err.code(), "UNKNOWN_ASYNC_ERROR");
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn on_error_replacement_becomes_the_propagated_error() {
    struct Replacer;

    #[async_trait]
    impl ExecutorPlugin<Params, String> for Replacer {
        fn plugin_name(&self) -> &str {
            "replacer"
        }

        async fn on_error(&self, _ctx: &mut Ctx) -> Result<Option<ExecError>> {
            Ok(Some(ExecError::task("replaced by plugin")))
        }
    }

    let executor: Executor<Params, String> = Executor::new();
    executor.use_plugin(Arc::new(Replacer)).await;

    let err = executor
        .exec(Params::default(), &failing_task)
        .await
        .unwrap_err();

    // 替换错误按原样传播，不再做通用包装
    assert_eq!(err, ExecError::task("replaced by plugin"));
}

#[tokio::test]
async fn on_error_failure_supersedes_and_short_circuits() {
    struct Thrower;

    #[async_trait]
    impl ExecutorPlugin<Params, String> for Thrower {
        fn plugin_name(&self) -> &str {
            "thrower"
        }

        async fn on_error(&self, _ctx: &mut Ctx) -> Result<Option<ExecError>> {
            Err(ExecError::task("error hook itself failed"))
        }
    }

    let executor: Executor<Params, String> = Executor::new();
    let tail = Arc::new(StageCounter::named("tail"));
    executor.use_plugin(Arc::new(Thrower)).await;
    executor.use_plugin(tail.clone()).await;

    let err = executor
        .exec(Params::default(), &failing_task)
        .await
        .unwrap_err();

    // 钩子自身失败的错误带阶段与插件标注，原样传播不再包装
    assert_eq!(err.code(), "STAGE_ERROR");
    let text = err.to_string();
    assert!(text.contains("on_error"));
    assert!(text.contains("thrower"));
    assert!(text.contains("error hook itself failed"));
    // 后续 on_error 插件被跳过
    assert_eq!(tail.error.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exec_and_exec_no_error_report_the_same_failures() {
    let executor: Executor<Params, String> = Executor::new();

    let thrown = executor
        .exec(Params::default(), &failing_task)
        .await
        .unwrap_err();
    let outcome = executor
        .exec_no_error(Params::default(), &failing_task)
        .await;

    match outcome {
        ExecOutcome::Failed(returned) => assert_eq!(thrown, returned),
        ExecOutcome::Completed(value) => panic!("unexpected success: {value}"),
    }
}

#[tokio::test]
async fn exec_with_default_uses_default_parameters() {
    let executor: Executor<Params, String> = Executor::new();
    let result = executor.exec_with_default(&modified_by_task).await.unwrap();
    assert_eq!(result, "unset");

    let outcome = executor.exec_no_error_with_default(&x_task).await;
    assert!(outcome.is_completed());
}

#[tokio::test]
async fn hook_times_reset_per_stage() {
    /// 记录各自阶段调用时观察到的 times 值
    struct TimesProbe {
        name: String,
        observed: Arc<Mutex<Vec<(HookStage, u32)>>>,
    }

    #[async_trait]
    impl ExecutorPlugin<Params, String> for TimesProbe {
        fn plugin_name(&self) -> &str {
            &self.name
        }

        async fn on_before(&self, ctx: &mut Ctx) -> Result<()> {
            self.observed
                .lock()
                .unwrap()
                .push((HookStage::Before, ctx.hooks_runtimes.times));
            Ok(())
        }

        async fn on_success(&self, ctx: &mut Ctx) -> Result<()> {
            self.observed
                .lock()
                .unwrap()
                .push((HookStage::Success, ctx.hooks_runtimes.times));
            Ok(())
        }
    }

    let observed = Arc::new(Mutex::new(Vec::new()));
    let executor: Executor<Params, String> = Executor::new();
    executor
        .use_plugin(Arc::new(TimesProbe {
            name: "probe-1".into(),
            observed: observed.clone(),
        }))
        .await;
    executor
        .use_plugin(Arc::new(TimesProbe {
            name: "probe-2".into(),
            observed: observed.clone(),
        }))
        .await;

    executor.exec(Params::default(), &x_task).await.unwrap();

    let seen = observed.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (HookStage::Before, 1),
            (HookStage::Before, 2),
            (HookStage::Success, 1),
            (HookStage::Success, 2),
        ]
    );
}

#[tokio::test]
async fn json_valued_parameters_survive_plugin_mutation() {
    use serde_json::{Value, json};

    /// 在 JSON 入参上追加标记
    struct JsonTagger;

    #[async_trait]
    impl ExecutorPlugin<Value, String> for JsonTagger {
        fn plugin_name(&self) -> &str {
            "json-tagger"
        }

        async fn on_before(&self, ctx: &mut ExecutionContext<Value, String>) -> Result<()> {
            ctx.parameters["modified_by"] = json!("tagger");
            Ok(())
        }
    }

    fn render(ctx: &ExecutionContext<Value, String>) -> TaskFuture<'_, String> {
        Box::pin(async move {
            Ok(ctx.parameters["modified_by"]
                .as_str()
                .unwrap_or("missing")
                .to_string())
        })
    }

    let executor: Executor<Value, String> = Executor::new();
    executor.use_plugin(Arc::new(JsonTagger)).await;

    let result = tokio_test::assert_ok!(
        executor
            .exec(json!({ "modified_by": "caller" }), &render)
            .await
    );
    assert_eq!(result, "tagger");
}

#[tokio::test]
async fn concurrent_executions_do_not_share_context() {
    let executor: Arc<Executor<Params, String>> = Arc::new(Executor::new());

    let mut handles = Vec::new();
    for i in 0..16 {
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let params = Params {
                modified_by: Some(format!("caller-{i}")),
            };
            executor.exec(params, &modified_by_task).await.unwrap()
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), format!("caller-{i}"));
    }
}
