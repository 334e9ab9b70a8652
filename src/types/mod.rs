use crate::error::RelayError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const API_KEY_FIELD: &str = "apiKey";
const REQUEST_ID_FIELD: &str = "requestId";

/// 浏览器发来的代理请求
///
/// 除 `apiKey` 外的所有字段原样转发给上游。
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub api_key: String,
    pub request_id: Option<Value>,
    payload: Map<String, Value>,
}

impl RelayRequest {
    /// 从请求体字节解析
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut payload) = value else {
            return Err(RelayError::NotAnObject);
        };

        let api_key = match payload.remove(API_KEY_FIELD) {
            Some(Value::String(key)) => key,
            Some(_) => return Err(RelayError::InvalidApiKey),
            None => return Err(RelayError::MissingApiKey),
        };

        let request_id = payload.get(REQUEST_ID_FIELD).cloned();

        Ok(Self {
            api_key,
            request_id,
            payload,
        })
    }

    /// 转发给上游的请求体（不含 apiKey）
    pub fn upstream_payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// 用于上游请求头的 requestId，仅接受字符串或数字
    pub fn request_id_header(&self) -> Option<String> {
        match &self.request_id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    /// 日志中使用的请求标识
    pub fn request_id_label(&self) -> String {
        match &self.request_id {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "unknown".to_string(),
            Some(other) => other.to_string(),
        }
    }

    /// API key 前 10 个字符，用于日志
    pub fn api_key_prefix(&self) -> String {
        self.api_key.chars().take(10).collect()
    }

    pub fn messages_preview(&self, max_chars: usize) -> String {
        let messages = self
            .payload
            .get("messages")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        preview(&messages.to_string(), max_chars)
    }

    pub fn payload_preview(&self, max_chars: usize) -> String {
        let payload = serde_json::to_string(&self.payload).unwrap_or_default();
        preview(&payload, max_chars)
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// 返回给浏览器的响应体
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelayResponse {
    Success {
        success: bool,
        content: String,
        /// 缺失时序列化为 null
        #[serde(rename = "requestId")]
        request_id: Value,
    },
    Failure {
        success: bool,
        error: String,
    },
}

impl RelayResponse {
    pub fn success(content: impl Into<String>, request_id: Option<Value>) -> Self {
        RelayResponse::Success {
            success: true,
            content: content.into(),
            request_id: request_id.unwrap_or(Value::Null),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        RelayResponse::Failure {
            success: false,
            error: error.into(),
        }
    }
}

/// 上游 SSE `data:` 行中的事件
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamEvent {
    pub fn into_content(self) -> Option<String> {
        self.message.and_then(|m| m.content)
    }
}
