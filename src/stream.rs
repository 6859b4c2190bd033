use std::io::{self, Read};

use serde::Deserialize;

const FRAME_DELIMITER: &str = "data: ";

#[derive(Deserialize, Default)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Default)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Returns the non-empty `choices[0].delta.content` of a single frame.
pub fn extract_delta(frame: &str) -> Option<String> {
    let frame = frame.trim();
    if frame.is_empty() {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(frame).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
}

/// Folds decoded text chunks into a running assistant message. The last
/// fragment of a chunk is held back until it parses or more text arrives.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    content: String,
    pending: String,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let buffered = std::mem::take(&mut self.pending);

        let mut fragments: Vec<&str> = buffered.split(FRAME_DELIMITER).collect();
        let tail = fragments.pop().unwrap_or_default();

        let mut deltas: Vec<String> = fragments.into_iter().filter_map(extract_delta).collect();

        match extract_delta(tail) {
            Some(delta) => deltas.push(delta),
            None if is_complete_frame(tail) => {}
            None => self.pending = tail.to_string(),
        }

        for delta in &deltas {
            self.content.push_str(delta);
        }
        deltas
    }

    pub fn finish(&mut self) -> Vec<String> {
        let tail = std::mem::take(&mut self.pending);
        let deltas: Vec<String> = extract_delta(&tail).into_iter().collect();
        for delta in &deltas {
            self.content.push_str(delta);
        }
        deltas
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }
}

// A tail that already parses as JSON, or that ends a line, will not grow.
fn is_complete_frame(fragment: &str) -> bool {
    fragment.ends_with('\n') || serde_json::from_str::<serde_json::Value>(fragment.trim()).is_ok()
}

/// Drives a [`DeltaAccumulator`] from a byte stream, calling `on_delta` after
/// every usable delta.
pub fn read_deltas<R, F>(mut reader: R, mut on_delta: F) -> io::Result<String>
where
    R: Read,
    F: FnMut(&str),
{
    let mut accumulator = DeltaAccumulator::new();
    let mut buffer = [0u8; 4096];
    let mut carry: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        carry.extend_from_slice(&buffer[..n]);

        let text = take_utf8_prefix(&mut carry);
        for delta in accumulator.push(&text) {
            on_delta(&delta);
        }
    }

    if !carry.is_empty() {
        let rest = String::from_utf8_lossy(&carry).into_owned();
        for delta in accumulator.push(&rest) {
            on_delta(&delta);
        }
    }
    for delta in accumulator.finish() {
        on_delta(&delta);
    }

    Ok(accumulator.into_content())
}

// Decodes as much of `bytes` as possible. Invalid bytes become U+FFFD; an
// incomplete trailing sequence stays in place for the next read.
fn take_utf8_prefix(bytes: &mut Vec<u8>) -> String {
    let mut text = String::new();
    let mut start = 0;
    while start < bytes.len() {
        match std::str::from_utf8(&bytes[start..]) {
            Ok(valid) => {
                text.push_str(valid);
                start = bytes.len();
            }
            Err(e) => {
                let valid = e.valid_up_to();
                text.push_str(&String::from_utf8_lossy(&bytes[start..start + valid]));
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        start += valid + len;
                    }
                    None => {
                        start += valid;
                        break;
                    }
                }
            }
        }
    }
    bytes.drain(..start);
    text
}
