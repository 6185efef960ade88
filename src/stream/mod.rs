pub mod buffer;
pub mod sse;
pub mod transformer;

pub use buffer::BoundaryTextBuffer;
pub use sse::{anthropic_sse_frame, encode_event, LineDecoder};
pub use transformer::{StreamTransformer, TransformerConfig};

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::GatewayError;
use crate::protocol::anthropic::response_encoder::ResponseAccumulator;
use crate::protocol::anthropic::{AnthropicResponse, AnthropicStreamEvent};

/// State threaded through the [`transform_upstream`] unfold.
struct Pipeline<S> {
    upstream: Pin<Box<S>>,
    decoder: LineDecoder,
    transformer: StreamTransformer,
    lines: Vec<String>,
    events: Vec<AnthropicStreamEvent>,
    pending: VecDeque<Bytes>,
    finished: bool,
}

impl<S> Pipeline<S> {
    fn run_lines(&mut self) {
        for line in self.lines.drain(..) {
            self.transformer.process_line(&line, &mut self.events);
        }
    }

    fn encode_events(&mut self) -> Result<(), GatewayError> {
        for event in self.events.drain(..) {
            let frame = encode_event(&event)?;
            tracing::debug!(frame = %frame.trim_end(), "downstream frame");
            self.pending.push_back(Bytes::from(frame));
        }
        Ok(())
    }
}

/// Transform an upstream response body into Anthropic SSE frames.
///
/// Frames are yielded in emission order. A read error on the upstream body
/// yields one [`GatewayError::Transport`] item and ends the stream; frames
/// produced before it have already been yielded. End of body without a
/// `[DONE]` line is handled as if the terminator had arrived.
pub fn transform_upstream<S, E>(
    byte_stream: S,
    transformer: StreamTransformer,
) -> impl Stream<Item = Result<Bytes, GatewayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let pipeline = Pipeline {
        upstream: Box::pin(byte_stream),
        decoder: LineDecoder::new(),
        transformer,
        lines: Vec::with_capacity(8),
        events: Vec::with_capacity(8),
        pending: VecDeque::with_capacity(8),
        finished: false,
    };

    futures_util::stream::unfold(pipeline, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished {
                return None;
            }

            match state.upstream.as_mut().next().await {
                Some(Ok(chunk)) => {
                    state.decoder.feed_into(&chunk, &mut state.lines);
                    state.run_lines();
                    state.finished = state.transformer.is_done();
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "upstream stream read failed");
                    state.finished = true;
                    return Some((
                        Err(GatewayError::Transport(format!("upstream read failed: {err}"))),
                        state,
                    ));
                }
                None => {
                    state.lines.extend(state.decoder.finish());
                    state.run_lines();
                    state.transformer.finish_stream(&mut state.events);
                    state.finished = true;
                }
            }

            if let Err(err) = state.encode_events() {
                state.finished = true;
                state.pending.clear();
                return Some((Err(err), state));
            }
        }
    })
}

/// Drive [`transform_upstream`] into `writer`, flushing at the end.
///
/// # Errors
///
/// Returns the first upstream read, encoding, or write failure. Bytes written
/// before the failure are not retracted.
pub async fn write_transformed<S, E, W>(
    byte_stream: S,
    transformer: StreamTransformer,
    writer: &mut W,
) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let frames = transform_upstream(byte_stream, transformer);
    let mut frames = std::pin::pin!(frames);
    while let Some(frame) = frames.next().await {
        let frame = frame?;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| GatewayError::Transport(format!("downstream write failed: {e}")))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| GatewayError::Transport(format!("downstream flush failed: {e}")))
}

/// Run the transformation to completion and fold the events into a single
/// Messages response.
///
/// # Errors
///
/// Returns [`GatewayError::Transport`] when reading the upstream body fails.
pub async fn collect_response<S, E>(
    byte_stream: S,
    mut transformer: StreamTransformer,
) -> Result<AnthropicResponse, GatewayError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut upstream = std::pin::pin!(byte_stream);
    let mut decoder = LineDecoder::new();
    let mut lines = Vec::new();
    let mut events = Vec::new();
    let mut accumulator = ResponseAccumulator::new();

    while !transformer.is_done() {
        let eof = match upstream.next().await {
            Some(Ok(chunk)) => {
                decoder.feed_into(&chunk, &mut lines);
                false
            }
            Some(Err(err)) => {
                return Err(GatewayError::Transport(format!("upstream read failed: {err}")));
            }
            None => {
                lines.extend(decoder.finish());
                true
            }
        };
        for line in lines.drain(..) {
            transformer.process_line(&line, &mut events);
        }
        if eof {
            transformer.finish_stream(&mut events);
        }
        for event in events.drain(..) {
            accumulator.push(event);
        }
    }

    Ok(accumulator.finish())
}
