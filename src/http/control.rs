//! 控制通道
//!
//! - `POST /__sw/message`：发送 `skipWaiting` 或 `clearCache`
//! - `GET /__sw/events`：SSE 事件流，每个连接都是一个客户端
//! - `GET /__sw/status`：当前版本、缓存和客户端状态

use std::convert::Infallible;

use async_stream::stream;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header::USER_AGENT},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tracing::{debug, error};

use super::{AppState, error::RouteResult};
use crate::worker::{ControlMessage, MessageOutcome, WorkerStatus};

pub async fn message(
    State(state): State<AppState>,
    body: String,
) -> RouteResult<Json<MessageOutcome>> {
    let message = body.parse::<ControlMessage>()?;
    let outcome = state.worker.handle_message(message).await?;
    Ok(Json(outcome))
}

pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut client = state.worker.attach_client(user_agent);
    debug!("Event stream opened for client {}", client.id());

    // 连接断开时 stream 被 drop，客户端随之移除
    let stream = stream! {
        while let Some(message) = client.recv().await {
            let event = match Event::default().json_data(&message) {
                Ok(event) => event,
                Err(e) => {
                    error!("Failed to encode client message: {}", e);
                    continue;
                }
            };
            yield Ok::<_, Infallible>(event);
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn status(State(state): State<AppState>) -> Json<WorkerStatus> {
    Json(state.worker.status().await)
}
