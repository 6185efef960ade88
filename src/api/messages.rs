use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::protocol::anthropic::decoder::decode_anthropic_request;
use crate::protocol::anthropic::AnthropicRequest;
use crate::protocol::upstream::encoder::{encode_upstream_request, EncodeOptions};
use crate::protocol::upstream::UpstreamRequest;
use crate::state::AppState;
use crate::stream::{collect_response, transform_upstream, StreamTransformer, TransformerConfig};

/// `POST /v1/messages`.
pub async fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    match handler_inner(state, body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(error = %err, "messages request failed");
            err.into_response()
        }
    }
}

async fn handler_inner(state: Arc<AppState>, body: bytes::Bytes) -> Result<Response, GatewayError> {
    let request: AnthropicRequest = serde_json::from_slice(&body)
        .map_err(|err| GatewayError::InvalidRequest(format!("invalid request body: {err}")))?;
    let conversation = decode_anthropic_request(&request)?;

    let upstream_cfg = &state.config.upstream;
    let options = EncodeOptions {
        repo_root: &upstream_cfg.repo_root,
        trigger: &upstream_cfg.trigger,
        chat_id_prefix: &upstream_cfg.chat_id_prefix,
        system_preamble: state.config.features.system_preamble.as_deref(),
    };
    let upstream_request = encode_upstream_request(&conversation, &options, state.ids.as_ref());
    let input_tokens = count_input_tokens(&state, &upstream_request);

    tracing::debug!(
        model = %request.model,
        stream = request.stream,
        messages = upstream_request.messages.len(),
        tools = request.tools.len(),
        input_tokens,
        "forwarding messages request"
    );

    let transformer = StreamTransformer::new(
        TransformerConfig {
            model: request.model.clone(),
            input_tokens,
        },
        Arc::clone(&state.ids),
        Arc::clone(&state.tokens),
    );
    let upstream = state.transport.send_chat(&upstream_request).await?;
    let byte_stream = upstream.bytes_stream();

    if request.stream {
        let frames = transform_upstream(byte_stream, transformer);
        return Ok(sse_ok_response(axum::body::Body::from_stream(frames)));
    }

    let response = collect_response(byte_stream, transformer).await?;
    Ok(axum::Json(response).into_response())
}

fn count_input_tokens(state: &AppState, request: &UpstreamRequest) -> u64 {
    request
        .messages
        .iter()
        .flat_map(|message| &message.parts)
        .map(|part| state.tokens.count_tokens(&part.text))
        .sum()
}

#[inline]
fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
