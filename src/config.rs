//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=openai`）。
//! 引擎本身不读环境变量，只接收由 AppConfig 派生的 EngineConfig。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub engine: EngineSection,
    pub tier: TierSection,
    pub session: SessionSection,
}

/// [app] 段：应用名、CLI 展示的历史条数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// CLI 打印会话历史时最多显示的条数；引擎从不截断 messages
    pub max_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_turns: 20,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；无 API Key 时回退 mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 后端是否支持一次返回多个并行工具调用
    pub parallel_tool_calls: bool,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            parallel_tool_calls: true,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [engine] 段：执行模式、单次工具超时、并发上限、敏感工具
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub parallel_tools: bool,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_concurrent_tools: usize,
    /// 额外视为敏感（需人工确认）的工具名
    pub sensitive_tools: Vec<String>,
    /// 覆盖默认的 system prompt 开头
    pub system_prompt: Option<String>,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            parallel_tools: true,
            tool_timeout_secs: 30,
            max_concurrent_tools: 4,
            sensitive_tools: vec!["send_email".to_string()],
            system_prompt: None,
        }
    }
}

/// [tier] 段：调用方的功能档位，供 FeatureGate 使用
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierSection {
    pub advanced_execution: bool,
}

impl Default for TierSection {
    fn default() -> Self {
        Self {
            advanced_execution: true,
        }
    }
}

/// [session] 段：CLI 使用的会话文件目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub dir: PathBuf,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("sessions"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("engine.sensitive_tools")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
