// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::cancel::CancelToken;
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use tracing::{debug, error, warn};

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";
const STOP_REASON: &str = "stop";
const SENTENCE_TERMINATORS: [char; 7] = ['.', '。', '!', '！', '?', '？', '\n'];
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Receives decoder output. Channel callbacks carry the full accumulated
/// channel text, never a delta, so the last call per channel always wins.
pub trait DecodeSink {
    fn on_think_content(&mut self, _text: &str) {}
    fn on_display_content(&mut self, _text: &str) {}
    fn on_complete(&mut self) {}
    fn on_error(&mut self, _reason: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    Think(String),
    Display(String),
    Complete,
    Error(String),
}

impl DecodeSink for Vec<DecodeEvent> {
    fn on_think_content(&mut self, text: &str) {
        self.push(DecodeEvent::Think(text.to_owned()));
    }

    fn on_display_content(&mut self, text: &str) {
        self.push(DecodeEvent::Display(text.to_owned()));
    }

    fn on_complete(&mut self) {
        self.push(DecodeEvent::Complete);
    }

    fn on_error(&mut self, reason: &str) {
        self.push(DecodeEvent::Error(reason.to_owned()));
    }
}

impl DecodeSink for VecDeque<DecodeEvent> {
    fn on_think_content(&mut self, text: &str) {
        self.push_back(DecodeEvent::Think(text.to_owned()));
    }

    fn on_display_content(&mut self, text: &str) {
        self.push_back(DecodeEvent::Display(text.to_owned()));
    }

    fn on_complete(&mut self) {
        self.push_back(DecodeEvent::Complete);
    }

    fn on_error(&mut self, reason: &str) {
        self.push_back(DecodeEvent::Error(reason.to_owned()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Hold a trailing `<`, `<th`, `</thin`... back until the next delta
    /// so tags split across deltas are still recognized.
    pub carry_partial_tags: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            carry_partial_tags: true,
        }
    }
}

/// How a decode call ended. Only `Failed` is accompanied by an `on_error`
/// call; malformed tokens report through `on_error` without ending the decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Splits `content` deltas into the think and display channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThinkSplitter {
    in_think: bool,
    think_content: String,
    display_content: String,
    sentence: String,
    partial_tag: String,
    carry_partial_tags: bool,
}

impl ThinkSplitter {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            carry_partial_tags: options.carry_partial_tags,
            ..Self::default()
        }
    }

    pub fn is_in_think_tag(&self) -> bool {
        self.in_think
    }

    pub fn think_content(&self) -> &str {
        &self.think_content
    }

    pub fn display_content(&self) -> &str {
        &self.display_content
    }

    pub fn push_delta<S: DecodeSink + ?Sized>(&mut self, content: &str, sink: &mut S) {
        let text: Cow<'_, str> = if self.partial_tag.is_empty() {
            Cow::Borrowed(content)
        } else {
            let mut joined = std::mem::take(&mut self.partial_tag);
            joined.push_str(content);
            Cow::Owned(joined)
        };

        let mut rest: &str = &text;
        while let Some(ch) = rest.chars().next() {
            if let Some(after) = rest.strip_prefix(THINK_OPEN) {
                self.flush(sink);
                self.in_think = true;
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix(THINK_CLOSE) {
                self.flush(sink);
                self.in_think = false;
                rest = after;
                continue;
            }
            if self.carry_partial_tags && is_partial_tag(rest) {
                self.partial_tag = rest.to_owned();
                self.flush(sink);
                return;
            }

            self.sentence.push(ch);
            rest = &rest[ch.len_utf8()..];
            if SENTENCE_TERMINATORS.contains(&ch) || rest.is_empty() {
                self.flush(sink);
            }
        }
    }

    /// End of stream: a partial tag still held back is ordinary text.
    pub fn finish<S: DecodeSink + ?Sized>(&mut self, sink: &mut S) {
        if !self.partial_tag.is_empty() {
            let carried = std::mem::take(&mut self.partial_tag);
            self.sentence.push_str(&carried);
        }
        self.flush(sink);
    }

    fn flush<S: DecodeSink + ?Sized>(&mut self, sink: &mut S) {
        if self.sentence.trim().is_empty() {
            return;
        }
        if self.in_think {
            self.think_content.push_str(&self.sentence);
            sink.on_think_content(&self.think_content);
        } else {
            self.display_content.push_str(&self.sentence);
            sink.on_display_content(&self.display_content);
        }
        self.sentence.clear();
    }
}

fn is_partial_tag(rest: &str) -> bool {
    [THINK_OPEN, THINK_CLOSE]
        .iter()
        .any(|tag| rest.len() < tag.len() && tag.starts_with(rest))
}

/// Line framing over raw bytes. Bytes are buffered until a `\n` arrives, so
/// multi-byte characters split across reads decode intact.
#[derive(Debug, Clone, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    splitter: ThinkSplitter,
    finished: bool,
}

impl StreamDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            splitter: ThinkSplitter::new(options),
            ..Self::default()
        }
    }

    pub fn splitter(&self) -> &ThinkSplitter {
        &self.splitter
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn feed<S: DecodeSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) -> Flow {
        if self.finished {
            return Flow::Finished;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..newline]);
            if self.process_line(&line, sink) == Flow::Finished {
                return Flow::Finished;
            }
        }
        Flow::Continue
    }

    /// Reader reported end of stream. An unterminated last line is still
    /// processed before the pending sentence is flushed.
    pub fn finish<S: DecodeSink + ?Sized>(&mut self, sink: &mut S) {
        if self.finished {
            return;
        }
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&line);
            if self.process_line(&line, sink) == Flow::Finished {
                return;
            }
        }
        self.complete(sink);
    }

    fn process_line<S: DecodeSink + ?Sized>(&mut self, line: &str, sink: &mut S) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return Flow::Continue;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            self.complete(sink);
            return Flow::Finished;
        }

        let token: StreamToken = match serde_json::from_str(payload) {
            Ok(token) => token,
            Err(error) => {
                warn!(%error, payload, "skipping malformed stream token");
                sink.on_error(&format!("decode stream chunk: {error}"));
                return Flow::Continue;
            }
        };

        let Some(choice) = token.choices.into_iter().flatten().next() else {
            return Flow::Continue;
        };
        if let Some(content) = choice.delta.and_then(|delta| delta.content)
            && !content.is_empty()
        {
            self.splitter.push_delta(&content, sink);
        }
        if choice.finish_reason.as_deref() == Some(STOP_REASON) {
            self.complete(sink);
            return Flow::Finished;
        }
        Flow::Continue
    }

    fn complete<S: DecodeSink + ?Sized>(&mut self, sink: &mut S) {
        self.splitter.finish(sink);
        self.buffer.clear();
        self.finished = true;
        sink.on_complete();
    }
}

/// Pulls chunks from `reader` through a [`StreamDecoder`]. Usable either as
/// an iterator of [`DecodeEvent`]s or driven into a [`DecodeSink`].
pub struct ChatStream<R> {
    reader: R,
    decoder: StreamDecoder,
    cancel: CancelToken,
    pending: VecDeque<DecodeEvent>,
    outcome: Option<DecodeOutcome>,
    chunk: Vec<u8>,
}

impl<R: Read> ChatStream<R> {
    pub fn new(reader: R, options: DecoderOptions, cancel: CancelToken) -> Self {
        Self {
            reader,
            decoder: StreamDecoder::new(options),
            cancel,
            pending: VecDeque::new(),
            outcome: None,
            chunk: vec![0; READ_CHUNK_BYTES],
        }
    }

    /// Set once the stream has ended; `None` while more reads may follow.
    pub fn outcome(&self) -> Option<DecodeOutcome> {
        self.outcome
    }

    pub fn decode_into<S: DecodeSink + ?Sized>(mut self, sink: &mut S) -> DecodeOutcome {
        loop {
            if let Some(outcome) = self.pump(sink) {
                return outcome;
            }
        }
    }

    /// One read. Returns the outcome once the stream has ended.
    fn pump<S: DecodeSink + ?Sized>(&mut self, sink: &mut S) -> Option<DecodeOutcome> {
        if let Some(outcome) = self.outcome {
            return Some(outcome);
        }
        if self.cancel.is_cancelled() {
            return self.stop(DecodeOutcome::Cancelled);
        }

        let read = match self.reader.read(&mut self.chunk) {
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => return None,
            Err(error) => {
                if self.cancel.is_cancelled() {
                    return self.stop(DecodeOutcome::Cancelled);
                }
                error!(%error, "chat stream read failed");
                sink.on_error(&format!("read stream: {error}"));
                return self.stop(DecodeOutcome::Failed);
            }
        };
        // A chunk that lands after cancellation is dropped unseen.
        if self.cancel.is_cancelled() {
            return self.stop(DecodeOutcome::Cancelled);
        }

        if read == 0 {
            self.decoder.finish(sink);
            return self.stop(DecodeOutcome::Completed);
        }
        match self.decoder.feed(&self.chunk[..read], sink) {
            Flow::Finished => self.stop(DecodeOutcome::Completed),
            Flow::Continue => None,
        }
    }

    fn stop(&mut self, outcome: DecodeOutcome) -> Option<DecodeOutcome> {
        if outcome == DecodeOutcome::Cancelled {
            debug!("chat stream cancelled");
        }
        self.outcome = Some(outcome);
        Some(outcome)
    }
}

impl<R: Read> Iterator for ChatStream<R> {
    type Item = DecodeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.outcome.is_some() {
                return None;
            }
            let mut pending = std::mem::take(&mut self.pending);
            self.pump(&mut pending);
            self.pending = pending;
        }
    }
}

/// Decodes `reader` to the end, reporting into `sink`. Never panics and
/// never returns an error: failures arrive through [`DecodeSink::on_error`].
pub fn decode<R, S>(
    reader: R,
    sink: &mut S,
    options: DecoderOptions,
    cancel: &CancelToken,
) -> DecodeOutcome
where
    R: Read,
    S: DecodeSink + ?Sized,
{
    ChatStream::new(reader, options, cancel.clone()).decode_into(sink)
}

// Providers send `null` for absent parts, so every level is optional.
#[derive(Debug, Deserialize)]
struct StreamToken {
    #[serde(default)]
    choices: Option<Vec<TokenChoice>>,
}

#[derive(Debug, Deserialize)]
struct TokenChoice {
    #[serde(default)]
    delta: Option<TokenDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenDelta {
    content: Option<String>,
}
