use super::cors;
use super::RelayState;
use crate::error::RelayError;
use crate::types::{RelayRequest, RelayResponse};
use crate::Result;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

pub const RELAY_PATH: &str = "/clova-proxy";

/// 处理 HTTP 请求的主路由
///
/// 所有错误都转换为响应，连接不会因为单个坏请求中断。
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<RelayState>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible>
where
    B: Body,
    B::Error: Display,
{
    match (req.method(), req.uri().path()) {
        (&Method::OPTIONS, _) => Ok(cors::preflight()),
        (&Method::POST, RELAY_PATH) => Ok(relay(req, &state).await),
        _ => Ok(not_found()),
    }
}

/// 代理端点
async fn relay<B>(req: Request<B>, state: &RelayState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Display,
{
    let relay_req = match read_relay_request(req, state.config.server.max_body_bytes).await {
        Ok(relay_req) => relay_req,
        Err(e) => {
            error!(error = %e, "代理请求解析失败");
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &RelayResponse::failure(e.to_string()),
            );
        }
    };

    let span = info_span!("relay", request_id = %relay_req.request_id_label());
    forward(relay_req, state).instrument(span).await
}

async fn forward(relay_req: RelayRequest, state: &RelayState) -> Response<Full<Bytes>> {
    info!(
        api_key = %format!("{}...", relay_req.api_key_prefix()),
        messages = %relay_req.messages_preview(100),
        "Clova 代理请求"
    );
    info!(payload = %relay_req.payload_preview(200), "转发给 Clova 的数据");

    match state.upstream.complete(&relay_req).await {
        Ok(content) => {
            info!(chars = content.chars().count(), "Clova 响应成功");
            json_response(
                StatusCode::OK,
                &RelayResponse::success(content, relay_req.request_id),
            )
        }
        Err(e) => {
            error!(error = %e, "Clova 代理错误");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &RelayResponse::failure(e.to_string()),
            )
        }
    }
}

/// 按 Content-Length 读取并解析请求体
async fn read_relay_request<B>(req: Request<B>, max_body_bytes: u64) -> Result<RelayRequest>
where
    B: Body,
    B::Error: Display,
{
    let declared = content_length(req.headers())?;
    if declared > max_body_bytes {
        return Err(RelayError::BodyTooLarge {
            size: declared,
            limit: max_body_bytes,
        });
    }

    let body = req
        .into_body()
        .collect()
        .await
        .map_err(RelayError::body)?
        .to_bytes();
    let len = body.len().min(declared as usize);

    RelayRequest::from_slice(&body[..len])
}

fn content_length(headers: &HeaderMap) -> Result<u64> {
    let value = headers
        .get(CONTENT_LENGTH)
        .ok_or(RelayError::MissingContentLength)?;
    let text = value
        .to_str()
        .map_err(|e| RelayError::InvalidContentLength(e.to_string()))?;
    text.trim()
        .parse::<u64>()
        .map_err(|e| RelayError::InvalidContentLength(format!("{:?}: {}", text, e)))
}

fn json_response(status: StatusCode, body: &RelayResponse) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| {
        br#"{"success":false,"error":"response serialization failed"}"#.to_vec()
    });

    let mut response = Response::new(Full::new(Bytes::from(bytes)));
    *response.status_mut() = status;
    cors::apply_cors_headers(response.headers_mut());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// 404 响应：空 body，不带 CORS 头
fn not_found() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}
