use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::sse::ContentAccumulator;
use crate::types::RelayRequest;
use crate::Result;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::debug;

pub const REQUEST_ID_HEADER: &str = "X-NCP-CLOVASTUDIO-REQUEST-ID";

/// Clova Studio 流式聊天接口客户端（连接池复用）
#[derive(Debug, Clone)]
pub struct ClovaClient {
    client: Client,
    url: String,
    timeout_secs: u64,
    forward_request_id: bool,
}

impl ClovaClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        // 超时覆盖整个调用，包括读完流
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout_secs: config.timeout_secs,
            forward_request_id: config.forward_request_id,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 转发请求并把 SSE 片段拼接为完整回复
    pub async fn complete(&self, req: &RelayRequest) -> Result<String> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, format!("Bearer {}", req.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .json(req.upstream_payload());

        if self.forward_request_id {
            if let Some(id) = req.request_id_header() {
                builder = builder.header(REQUEST_ID_HEADER, id);
            }
        }

        let response = builder.send().await.map_err(|e| self.upstream_error(e))?;

        // 只认 200，不读取错误响应体
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RelayError::UpstreamStatus(status.as_u16()));
        }

        let mut stream = response.bytes_stream();
        let mut accumulator = ContentAccumulator::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.upstream_error(e))?;
            accumulator.push_chunk(&chunk);
        }

        debug!(fragments = accumulator.fragments(), "上游流读取完成");
        Ok(accumulator.finish())
    }

    // 超时在发送和读流两个阶段都可能发生
    fn upstream_error(&self, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::UpstreamTimeout(self.timeout_secs)
        } else {
            RelayError::HttpError(err)
        }
    }
}
