use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri},
    response::Response,
};
use tracing::{debug, error};
use url::Url;

use super::{
    AppState,
    error::{RouteError, RouteResult},
};
use crate::{
    consts::{CACHE_STATUS_HEADER, MAX_BODY_SIZE},
    network::{FetchRequest, copy_headers},
    worker::Interception,
};

/// 解析请求的目标地址
///
/// 代理形式的请求（`GET http://host/path`）直接使用完整地址，
/// 其他请求以源站补全。
pub fn resolve_target(uri: &Uri, origin: &Url) -> RouteResult<Url> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).map_err(|e| {
            debug!("Invalid absolute uri {}: {}", uri, e);
            RouteError::BadRequest()
        });
    }
    let path_query = uri
        .path_and_query()
        .map(|v| v.as_str())
        .unwrap_or_else(|| uri.path());
    origin.join(path_query).map_err(|e| {
        debug!("Cannot join {} onto {}: {}", path_query, origin, e);
        RouteError::BadRequest()
    })
}

/// 拦截器入口
///
/// 将请求交给离线缓存拦截器，拦截器不处理的请求直接转发到网络。
/// 每个响应都带有 `x-offline-cache` 头标明来源。
#[axum::debug_handler]
pub async fn serve(State(state): State<AppState>, req: Request<Body>) -> RouteResult<Response> {
    let origin = state
        .worker
        .active_policy()
        .map(|p| p.origin.clone())
        .unwrap_or_else(|| state.origin());
    let url = resolve_target(req.uri(), &origin)?;

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|err| {
            error!("Failed to read request body: {}", err);
            RouteError::BadRequest()
        })?;

    let mut request = FetchRequest::new(parts.method, url);
    request.headers = parts.headers;
    request.body = body;

    match state.worker.handle_fetch(request).await {
        Interception::Respond(served) => build_response(
            served.status,
            &served.headers,
            served.body,
            served.source.as_str(),
        ),
        Interception::PassThrough(request) => {
            let url = request.url.clone();
            let response = state.worker.forward(request).await.map_err(|e| {
                error!("Failed to forward {}: {}", url, e);
                RouteError::BadGateway(e.to_string())
            })?;
            build_response(response.status, &response.headers, response.body, "bypass")
        }
    }
}

fn build_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: Bytes,
    source: &'static str,
) -> RouteResult<Response> {
    let mut builder = Response::builder().status(status);
    let target = builder.headers_mut().ok_or(RouteError::InternalError())?;
    copy_headers(headers, target);
    target.insert(CACHE_STATUS_HEADER, HeaderValue::from_static(source));
    builder.body(Body::from(body)).map_err(|e| {
        error!("Failed to build response: {}", e);
        RouteError::InternalError()
    })
}
