// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Streaming chat-completions support: the SSE decoder that splits model
//! output into think and display channels, the HTTP transport, and the
//! conversation history built on top of them.

mod cancel;
mod client;
mod conversation;
mod decoder;

pub use cancel::CancelToken;
pub use client::{Client, Message, Role};
pub use conversation::{ANALYSIS_HEADING, ChatEntry, Conversation, history_file_name};
pub use decoder::{
    ChatStream, DecodeEvent, DecodeOutcome, DecodeSink, DecoderOptions, Flow, StreamDecoder,
    THINK_CLOSE, THINK_OPEN, ThinkSplitter, decode,
};
