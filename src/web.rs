//! HTTP 接口
//!
//! - `POST /api/generate`：`{prompt}` -> `{response, iterations, artifact?, usage?}`；空 prompt 400，循环失败 500
//! - `POST /api/generate/stream`：同上，以 NDJSON 逐行推送过程事件，最后一行为 result
//! - `GET /api/health`、`GET /api/tools`

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::{process_prompt, process_prompt_stream, AgentComponents, PromptReply};
use crate::core::AgentError;
use crate::react::LoopEvent;

/// 共享状态：Agent 组件，所有请求共用
#[derive(Clone)]
pub struct AppState {
    pub components: Arc<AgentComponents>,
}

impl AppState {
    pub fn new(components: AgentComponents) -> Self {
        Self {
            components: Arc::new(components),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    iterations: Option<usize>,
}

/// AgentError -> HTTP 错误响应（校验失败 400，其余 500）
pub struct ApiError(AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let body = ErrorBody {
            error: match &self.0 {
                AgentError::Validation(msg) => msg.clone(),
                other => other.to_string(),
            },
            iterations: self.0.iterations(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(api_generate))
        .route("/api/generate/stream", post(api_generate_stream))
        .route("/api/health", get(api_health))
        .route("/api/tools", get(api_tools))
        .with_state(state)
}

async fn api_health() -> &'static str {
    "OK"
}

async fn api_tools(State(state): State<AppState>) -> Json<Vec<serde_json::Value>> {
    Json(state.components.driver.dispatcher().advertisement())
}

async fn api_generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<PromptReply>, ApiError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("generate", request_id = %request_id);
    let prompt = req.prompt.unwrap_or_default();
    let reply = process_prompt(&state.components, &prompt)
        .instrument(span)
        .await?;
    Ok(Json(reply))
}

fn ndjson_line(value: &impl Serialize) -> Bytes {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    Bytes::from(line)
}

enum StreamPhase {
    Events(mpsc::UnboundedReceiver<LoopEvent>, oneshot::Receiver<Result<PromptReply, AgentError>>),
    Finished,
}

/// 流式生成：客户端断开时取消进行中的模型调用
async fn api_generate_stream(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let prompt = req.prompt.unwrap_or_default().trim().to_string();
    if prompt.is_empty() {
        return Err(AgentError::Validation("Prompt is required".to_string()).into());
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("generate_stream", request_id = %request_id);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<LoopEvent>();
    let (result_tx, result_rx) = oneshot::channel();
    let cancel_token = CancellationToken::new();
    let guard = cancel_token.clone().drop_guard();

    let components = Arc::clone(&state.components);
    tokio::spawn(
        async move {
            let result = process_prompt_stream(&components, &prompt, Some(&event_tx), cancel_token).await;
            drop(event_tx);
            let _ = result_tx.send(result);
        }
        .instrument(span),
    );

    let stream = stream::try_unfold(
        (StreamPhase::Events(event_rx, result_rx), Some(guard)),
        |(phase, guard)| async move {
            match phase {
                StreamPhase::Events(mut event_rx, result_rx) => match event_rx.recv().await {
                    Some(ev) => Ok::<_, Infallible>(Some((
                        ndjson_line(&ev),
                        (StreamPhase::Events(event_rx, result_rx), guard),
                    ))),
                    None => {
                        let line = match result_rx.await {
                            Ok(Ok(reply)) => ndjson_line(&serde_json::json!({
                                "type": "result",
                                "response": reply.response,
                                "iterations": reply.iterations,
                                "artifact": reply.artifact,
                                "usage": reply.usage,
                            })),
                            Ok(Err(e)) => ndjson_line(&serde_json::json!({
                                "type": "result",
                                "error": e.to_string(),
                                "iterations": e.iterations(),
                            })),
                            Err(_) => ndjson_line(&serde_json::json!({
                                "type": "result",
                                "error": "generation task aborted",
                            })),
                        };
                        // 已完成，不再需要取消
                        if let Some(g) = guard {
                            g.disarm();
                        }
                        Ok(Some((line, (StreamPhase::Finished, None))))
                    }
                },
                StreamPhase::Finished => Ok(None),
            }
        },
    );

    let mut res = Response::new(Body::from_stream(stream));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/x-ndjson; charset=utf-8"),
    );
    Ok(res)
}
