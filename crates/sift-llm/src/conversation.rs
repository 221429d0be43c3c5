// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::cancel::CancelToken;
use crate::client::{Client, Message, Role};
use crate::decoder::{DecodeOutcome, DecodeSink};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use time::Date;
use tracing::info;

pub const ANALYSIS_HEADING: &str = "Filtered data from the analysis view:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub think_content: String,
    /// Locally generated failure notices; never sent back to the model.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatEntry {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_owned(),
            think_content: String::new(),
            is_error: false,
        }
    }

    fn error(reason: &str) -> Self {
        Self {
            is_error: true,
            ..Self::new(Role::Assistant, &format!("Error: {reason}"))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    entries: Vec<ChatEntry>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a history file written by [`Conversation::save`]. Error entries
    /// are kept for display but still never replayed to the model.
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path)
            .with_context(|| format!("read chat history {}", path.display()))?;
        let entries: Vec<ChatEntry> = serde_json::from_str(&body)
            .with_context(|| format!("decode chat history {}", path.display()))?;
        info!(path = %path.display(), entries = entries.len(), "loaded chat history");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// History as request messages followed by the new user turn. Analysis
    /// data goes into the outgoing text only; the stored entry keeps `input`.
    pub fn build_request_messages(
        &self,
        input: &str,
        analysis_data: Option<&Value>,
    ) -> Result<Vec<Message>> {
        let mut content = input.to_owned();
        if let Some(data) = analysis_data {
            if is_empty_export(data) {
                bail!("no filtered data to include -- show a column and apply a filter first");
            }
            let pretty = serde_json::to_string_pretty(data).context("encode analysis data")?;
            content.push_str("\n\n");
            content.push_str(ANALYSIS_HEADING);
            content.push('\n');
            content.push_str(&pretty);
        }

        let mut messages: Vec<Message> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_error)
            .map(|entry| Message {
                role: entry.role,
                content: entry.content.clone(),
            })
            .collect();
        messages.push(Message::user(content));
        Ok(messages)
    }

    /// One full exchange: the user entry and an assistant entry that is
    /// filled in as the stream decodes. `observer` sees every decoder
    /// callback as it happens.
    pub fn ask<S: DecodeSink + ?Sized>(
        &mut self,
        client: &Client,
        input: &str,
        analysis_data: Option<&Value>,
        cancel: &CancelToken,
        observer: &mut S,
    ) -> Result<DecodeOutcome> {
        if input.trim().is_empty() {
            bail!("message must not be empty");
        }
        let messages = self.build_request_messages(input, analysis_data)?;
        self.entries.push(ChatEntry::new(Role::User, input));

        let stream = match client.chat_stream(&messages, cancel) {
            Ok(stream) => stream,
            Err(error) => {
                self.entries.push(ChatEntry::error(&format!("{error:#}")));
                return Err(error);
            }
        };

        self.entries.push(ChatEntry::new(Role::Assistant, ""));
        let reply = self.entries.len() - 1;
        let mut sink = EntrySink {
            entry: &mut self.entries[reply],
            observer,
            last_error: None,
        };
        let outcome = stream.decode_into(&mut sink);
        let last_error = sink.last_error;

        if outcome == DecodeOutcome::Failed {
            let reason = last_error.unwrap_or_else(|| "stream failed".to_owned());
            self.entries.push(ChatEntry::error(&reason));
        }
        Ok(outcome)
    }

    /// Writes the history as `chat_history_YYYY-MM-DD.json` inside `dir`.
    pub fn save(&self, dir: &Path, date: Date) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create chat directory {}", dir.display()))?;
        let path = dir.join(history_file_name(date));
        let body = serde_json::to_string_pretty(&self.entries).context("encode chat history")?;
        fs::write(&path, body).with_context(|| format!("write chat history {}", path.display()))?;
        info!(path = %path.display(), entries = self.entries.len(), "saved chat history");
        Ok(path)
    }
}

pub fn history_file_name(date: Date) -> String {
    format!("chat_history_{date}.json")
}

fn is_empty_export(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

struct EntrySink<'a, S: ?Sized> {
    entry: &'a mut ChatEntry,
    observer: &'a mut S,
    last_error: Option<String>,
}

impl<S: DecodeSink + ?Sized> DecodeSink for EntrySink<'_, S> {
    fn on_think_content(&mut self, text: &str) {
        self.entry.think_content = text.to_owned();
        self.observer.on_think_content(text);
    }

    fn on_display_content(&mut self, text: &str) {
        self.entry.content = text.to_owned();
        self.observer.on_display_content(text);
    }

    fn on_complete(&mut self) {
        self.observer.on_complete();
    }

    fn on_error(&mut self, reason: &str) {
        self.last_error = Some(reason.to_owned());
        self.observer.on_error(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatEntry, Conversation, history_file_name};
    use crate::client::Role;
    use anyhow::Result;
    use serde_json::json;
    use time::macros::date;

    fn with_history() -> Conversation {
        Conversation {
            entries: vec![
                ChatEntry::new(Role::User, "first"),
                ChatEntry {
                    think_content: "hmm".to_owned(),
                    ..ChatEntry::new(Role::Assistant, "answer")
                },
                ChatEntry::error("API request failed: 500 Internal Server Error"),
            ],
        }
    }

    #[test]
    fn request_messages_replay_history_without_error_entries() -> Result<()> {
        let messages = with_history().build_request_messages("next", None)?;
        let roles: Vec<_> = messages.iter().map(|message| message.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(messages[1].content, "answer");
        assert_eq!(messages[2].content, "next");
        Ok(())
    }

    #[test]
    fn analysis_data_is_appended_to_outgoing_text() -> Result<()> {
        let data = json!({ "orders": [{ "id": "1" }] });
        let messages = Conversation::new().build_request_messages("why?", Some(&data))?;
        let content = &messages[0].content;
        assert!(content.starts_with("why?\n\nFiltered data from the analysis view:\n{"));
        assert!(content.contains("\"id\": \"1\""));
        Ok(())
    }

    #[test]
    fn empty_analysis_data_is_rejected() {
        let error = Conversation::new()
            .build_request_messages("why?", Some(&json!({})))
            .expect_err("empty export");
        assert!(error.to_string().contains("apply a filter first"));
    }

    #[test]
    fn save_writes_dated_history_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = with_history().save(temp.path(), date!(2026 - 10 - 19))?;
        assert_eq!(path, temp.path().join("chat_history_2026-10-19.json"));

        let saved: Vec<ChatEntry> = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[1].think_content, "hmm");
        assert!(saved[2].is_error);
        Ok(())
    }

    #[test]
    fn saved_history_loads_back_unchanged() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let history = with_history();
        let path = history.save(temp.path(), date!(2026 - 10 - 19))?;

        let loaded = Conversation::load(&path)?;
        assert_eq!(loaded, history);
        let messages = loaded.build_request_messages("again", None)?;
        assert_eq!(messages.len(), 3);
        Ok(())
    }

    #[test]
    fn loading_a_malformed_history_names_the_file() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("chat_history_2026-10-19.json");
        std::fs::write(&path, r#"{"role":"user"}"#)?;

        let error = Conversation::load(&path).expect_err("object is not a history");
        assert!(format!("{error:#}").contains("decode chat history"), "{error:#}");
        Ok(())
    }

    #[test]
    fn history_file_name_uses_iso_date() {
        assert_eq!(
            history_file_name(date!(2026 - 01 - 05)),
            "chat_history_2026-01-05.json"
        );
    }

    #[test]
    fn clear_empties_history() {
        let mut conversation = with_history();
        conversation.clear();
        assert!(conversation.entries().is_empty());
    }
}
