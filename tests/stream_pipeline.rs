use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};
use tagbridge_rs::ids::SequentialIdGenerator;
use tagbridge_rs::observability::Tokenizer;
use tagbridge_rs::stream::{write_transformed, StreamTransformer, TransformerConfig};

fn transformer() -> StreamTransformer {
    StreamTransformer::new(
        TransformerConfig {
            model: "claude-sonnet-4-5".to_string(),
            input_tokens: 0,
        },
        Arc::new(SequentialIdGenerator::new()),
        Arc::new(Tokenizer::default()),
    )
}

fn data_line(value: &Value) -> String {
    format!("data: {value}\n\n")
}

/// Upstream body with the given text split into deltas of `chunk` chars,
/// delivered in network chunks of `net` bytes.
fn upstream_chunks(text: &str, chunk: usize, net: usize) -> Vec<Result<Bytes, String>> {
    let mut body = String::new();
    body.push_str(&data_line(&json!({"type": "start"})));
    body.push_str(&data_line(&json!({"type": "start-step"})));
    body.push_str(&data_line(&json!({"type": "text-start", "id": "t0"})));
    let chars: Vec<char> = text.chars().collect();
    for piece in chars.chunks(chunk) {
        let delta: String = piece.iter().collect();
        body.push_str(&data_line(&json!({"type": "text-delta", "id": "t0", "delta": delta})));
    }
    body.push_str(&data_line(&json!({"type": "text-end", "id": "t0"})));
    body.push_str(&data_line(&json!({"type": "finish-step"})));
    body.push_str(&data_line(&json!({"type": "finish", "finishReason": "stop"})));
    body.push_str("data: [DONE]\n\n");

    body.into_bytes()
        .chunks(net)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect()
}

async fn run(text: &str, chunk: usize, net: usize) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    write_transformed(
        futures_util::stream::iter(upstream_chunks(text, chunk, net)),
        transformer(),
        &mut out,
    )
    .await
    .expect("transform");

    let output = String::from_utf8(out).expect("utf8 output");
    output
        .split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let mut lines = frame.lines();
            let event = lines
                .next()
                .and_then(|l| l.strip_prefix("event: "))
                .expect("event line")
                .to_string();
            let data = lines
                .next()
                .and_then(|l| l.strip_prefix("data: "))
                .expect("data line");
            (event, serde_json::from_str(data).expect("json data"))
        })
        .collect()
}

fn visible_text(frames: &[(String, Value)]) -> String {
    frames
        .iter()
        .filter(|(_, data)| data["delta"]["type"] == "text_delta")
        .filter_map(|(_, data)| data["delta"]["text"].as_str())
        .collect()
}

fn tool_uses(frames: &[(String, Value)]) -> Vec<Value> {
    frames
        .iter()
        .filter(|(_, data)| data["content_block"]["type"] == "tool_use")
        .map(|(_, data)| data["content_block"].clone())
        .collect()
}

fn stop_reason(frames: &[(String, Value)]) -> String {
    let deltas: Vec<&Value> = frames
        .iter()
        .filter(|(event, _)| event == "message_delta")
        .map(|(_, data)| data)
        .collect();
    assert_eq!(deltas.len(), 1);
    deltas[0]["delta"]["stop_reason"]
        .as_str()
        .expect("stop_reason")
        .to_string()
}

const TOOL_TEXT: &str = "I'll find the config files first.\n\n<function_calls>\n<invoke name=\"Glob\">\n<parameter name=\"pattern\">**/*.yaml</parameter>\n</invoke>\n<invoke name=\"Bash\">\n<parameter name=\"command\">ls -la</parameter>\n<parameter name=\"timeout\">30000</parameter>\n</invoke>\n</function_calls>";

#[tokio::test]
async fn whole_block_in_one_delta_yields_every_call() {
    let frames = run(TOOL_TEXT, 1000, 4096).await;

    assert_eq!(frames.first().map(|f| f.0.as_str()), Some("message_start"));
    assert_eq!(frames.last().map(|f| f.0.as_str()), Some("message_stop"));
    assert_eq!(visible_text(&frames), "I'll find the config files first.\n\n");

    let tools = tool_uses(&frames);
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[0]["name"], "Glob");
    assert_eq!(tools[0]["input"], json!({"pattern": "**/*.yaml"}));
    assert_eq!(tools[1]["name"], "Bash");
    assert_eq!(tools[1]["input"], json!({"command": "ls -la", "timeout": 30000}));
    assert_eq!(stop_reason(&frames), "tool_use");
}

#[tokio::test]
async fn markup_never_leaks_regardless_of_chunking() {
    for (chunk, net) in [(1, 4096), (3, 7), (7, 1), (120, 4096)] {
        let frames = run(TOOL_TEXT, chunk, net).await;

        assert_eq!(frames.first().map(|f| f.0.as_str()), Some("message_start"));
        assert_eq!(frames.last().map(|f| f.0.as_str()), Some("message_stop"));

        let text = visible_text(&frames);
        assert!(!text.contains("function_calls"), "chunk={chunk} net={net}: {text:?}");
        assert!(!text.contains("<invoke"), "chunk={chunk} net={net}: {text:?}");
        assert!(text.starts_with("I'll find the config files first."));

        // Glob closes in an earlier delta than Bash, so only Glob is surfaced.
        let names: Vec<Value> = tool_uses(&frames).into_iter().map(|t| t["name"].clone()).collect();
        assert_eq!(names, [json!("Glob")], "chunk={chunk} net={net}");
        assert_eq!(stop_reason(&frames), "tool_use");
    }
}

#[tokio::test]
async fn block_indices_strictly_increase() {
    let frames = run(TOOL_TEXT, 1, 4096).await;
    let starts: Vec<u64> = frames
        .iter()
        .filter(|(event, _)| event == "content_block_start")
        .map(|(_, data)| data["index"].as_u64().expect("index"))
        .collect();
    assert!(starts.windows(2).all(|w| w[0] < w[1]), "{starts:?}");

    let stops: Vec<u64> = frames
        .iter()
        .filter(|(event, _)| event == "content_block_stop")
        .map(|(_, data)| data["index"].as_u64().expect("index"))
        .collect();
    assert_eq!(starts, stops);
}

#[tokio::test]
async fn prose_with_angle_brackets_is_preserved() {
    let text = "Use Vec<u8>; compare a < b, then <toolbox> or <tool name=\"x\"> and <function>.";
    for (chunk, net) in [(1, 4096), (4, 3), (500, 4096)] {
        let frames = run(text, chunk, net).await;
        assert_eq!(visible_text(&frames), text, "chunk={chunk} net={net}");
        assert!(tool_uses(&frames).is_empty());
        assert_eq!(stop_reason(&frames), "end_turn");
    }
}

#[tokio::test]
async fn prose_mentioning_a_wrapper_tag_survives_any_chunking() {
    let text = "Wrap each call in a <tool> element, then close it. Nothing else is needed.";
    for (chunk, net) in [(1, 4096), (5, 9), (21, 4096), (500, 4096)] {
        let frames = run(text, chunk, net).await;
        assert_eq!(visible_text(&frames), text, "chunk={chunk} net={net}");
        assert!(tool_uses(&frames).is_empty());
        assert_eq!(stop_reason(&frames), "end_turn");
    }
}

#[tokio::test]
async fn lead_in_prose_survives_any_chunking() {
    for (chunk, net) in [(1, 4096), (40, 4096), (60, 11), (120, 4096), (1000, 4096)] {
        let frames = run(TOOL_TEXT, chunk, net).await;
        assert_eq!(
            visible_text(&frames),
            "I'll find the config files first.\n\n",
            "chunk={chunk} net={net}"
        );
    }
}

#[tokio::test]
async fn input_json_delta_repeats_block_input() {
    let frames = run(TOOL_TEXT, 1000, 4096).await;
    let partials: Vec<Value> = frames
        .iter()
        .filter(|(_, data)| data["delta"]["type"] == "input_json_delta")
        .map(|(_, data)| {
            serde_json::from_str(data["delta"]["partial_json"].as_str().expect("partial_json"))
                .expect("partial_json is JSON")
        })
        .collect();
    let inputs: Vec<Value> = tool_uses(&frames).into_iter().map(|t| t["input"].clone()).collect();
    assert_eq!(partials, inputs);
}
