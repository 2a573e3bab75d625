//! 执行引擎配置模块
//!
//! 该模块提供引擎级配置管理功能，包括：
//! - TOML 配置文件加载和解析
//! - 环境变量指定配置路径（`FLARE_EXEC_CONFIG`）
//! - 日志、重试默认值与取消池默认值的配置定义

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::retry::{RetryDelay, RetryOptions};

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<ExecAppConfig> = OnceLock::new();

/// 默认配置文件路径
const DEFAULT_CONFIG_PATH: &str = "config/flare-exec.toml";
/// 配置路径环境变量
const CONFIG_PATH_ENV: &str = "FLARE_EXEC_CONFIG";

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（trace/debug/info/warn/error）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 是否输出 target
    #[serde(default = "default_true")]
    pub with_target: bool,
    /// 是否输出线程 ID
    #[serde(default)]
    pub with_thread_ids: bool,
    /// 是否输出源文件名
    #[serde(default)]
    pub with_file: bool,
    /// 是否输出行号
    #[serde(default)]
    pub with_line_number: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

/// 重试默认值配置
#[derive(Debug, Clone, Deserialize)]
pub struct RetryDefaultsConfig {
    /// 总尝试次数（含首次）
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 基础延迟（毫秒）
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 是否启用指数退避
    #[serde(default)]
    pub use_exponential_backoff: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    crate::retry::DEFAULT_RETRY_DELAY_MS
}

impl Default for RetryDefaultsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            use_exponential_backoff: false,
        }
    }
}

impl RetryDefaultsConfig {
    /// 转换为重试引擎的选项（已规范化）
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries,
            retry_delay: RetryDelay::Fixed(self.retry_delay_ms),
            use_exponential_backoff: self.use_exponential_backoff,
            should_retry: None,
        }
        .normalize()
    }
}

/// 取消协调器默认值配置
#[derive(Debug, Clone, Deserialize)]
pub struct AbortDefaultsConfig {
    /// 池名（自动生成 abort_id 的前缀）
    #[serde(default = "default_pool_name")]
    pub pool_name: String,
    /// 默认超时（毫秒），0 或缺省表示不设超时
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

fn default_pool_name() -> String {
    "flare-exec".to_string()
}

impl Default for AbortDefaultsConfig {
    fn default() -> Self {
        Self {
            pool_name: default_pool_name(),
            default_timeout_ms: None,
        }
    }
}

/// 引擎应用配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExecAppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub retry: RetryDefaultsConfig,
    #[serde(default)]
    pub abort: AbortDefaultsConfig,
}

fn resolve_path(path: Option<&str>) -> PathBuf {
    if let Some(path) = path {
        return PathBuf::from(path);
    }
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(env_path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

/// 严格模式加载：文件缺失或格式非法直接报错
pub fn load_config_strict(path: Option<&str>) -> Result<ExecAppConfig> {
    let path = resolve_path(path);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("unable to read config file: {}", path.display()))?;
    let config: ExecAppConfig = toml::from_str(&content)
        .with_context(|| format!("invalid config format: {}", path.display()))?;
    Ok(config)
}

/// 加载全局配置
///
/// 路径解析优先级：显式参数 → `FLARE_EXEC_CONFIG` 环境变量 → 默认路径。
/// 文件缺失或解析失败时回退到内置默认值并记录告警（非严格模式）。
pub fn load_config(path: Option<&str>) -> &'static ExecAppConfig {
    APP_CONFIG.get_or_init(|| match load_config_strict(path) {
        Ok(config) => config,
        Err(err) => {
            warn!("failed to load exec config, falling back to defaults: {err:#}");
            ExecAppConfig::default()
        }
    })
}
