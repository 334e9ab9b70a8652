use crate::error::RelayError;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3002;
pub const DEFAULT_UPSTREAM_URL: &str =
    "https://clovastudio.stream.ntruss.com/v3/chat-completions/HCX-005";

/// 主配置结构
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

/// 监听配置（主机固定为回环地址）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

/// 上游 Clova API 配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 是否把 requestId 同时作为 X-NCP-CLOVASTUDIO-REQUEST-ID 头发送
    #[serde(default = "default_forward_request_id")]
    pub forward_request_id: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_body_bytes() -> u64 {
    1024 * 1024
}

fn default_upstream_url() -> String {
    DEFAULT_UPSTREAM_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_forward_request_id() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            timeout_secs: default_timeout_secs(),
            forward_request_id: default_forward_request_id(),
        }
    }
}

impl UpstreamConfig {
    /// 整个上游调用（含读流）的超时
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// 从 YAML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// 文件不存在时使用默认配置
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let content = Self::replace_env_vars(content)?;
        // 空文件视为全部默认
        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// 替换配置中的环境变量 ${VAR}
    fn replace_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| RelayError::config(e.to_string()))?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name).map_err(|_| {
                RelayError::config(format!("environment variable not found: {}", var_name))
            })?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.server.max_body_bytes == 0 {
            return Err(RelayError::config("server.max_body_bytes must be positive"));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(RelayError::config("upstream.timeout_secs must be positive"));
        }
        let url = &self.upstream.url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(RelayError::config(format!(
                "upstream.url must be an http(s) URL, got: {}",
                url
            )));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.server.port))
    }
}
