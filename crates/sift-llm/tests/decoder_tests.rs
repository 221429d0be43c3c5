// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use sift_llm::{CancelToken, DecodeEvent, DecodeOutcome, DecoderOptions, decode};
use sift_testkit::{ChunkedReader, sse_body, sse_data_line, sse_finish_line};
use std::io;

fn decode_chunks(reader: ChunkedReader) -> (Vec<DecodeEvent>, DecodeOutcome) {
    let mut events: Vec<DecodeEvent> = Vec::new();
    let outcome = decode(
        reader,
        &mut events,
        DecoderOptions::default(),
        &CancelToken::new(),
    );
    (events, outcome)
}

fn final_channels(events: &[DecodeEvent]) -> (String, String) {
    let mut think = String::new();
    let mut display = String::new();
    for event in events {
        match event {
            DecodeEvent::Think(text) => think.clone_from(text),
            DecodeEvent::Display(text) => display.clone_from(text),
            DecodeEvent::Complete | DecodeEvent::Error(_) => {}
        }
    }
    (think, display)
}

#[test]
fn network_chunking_does_not_change_the_result() {
    let body = sse_body(&[
        "<think>先想一想。",
        "Then plan</think>",
        "Résumé: ",
        "all good!",
    ]);
    let (whole, _) = decode_chunks(ChunkedReader::new([body.clone().into_bytes()]));

    for size in [1, 2, 3, 7, 64] {
        let (events, outcome) = decode_chunks(ChunkedReader::split_every(body.as_bytes(), size));
        assert_eq!(outcome, DecodeOutcome::Completed, "chunk size {size}");
        assert_eq!(events, whole, "chunk size {size}");
    }

    let (think, display) = final_channels(&whole);
    assert_eq!(think, "先想一想。Then plan");
    assert_eq!(display, "Résumé: all good!");
}

#[test]
fn channels_are_concatenations_of_deltas_outside_and_inside_tags() {
    let deltas = [
        "intro.", "<think>a", "b.", "</think>", " mid", "<think>c", "</think>", "end",
    ];
    let (events, _) = decode_chunks(ChunkedReader::new([sse_body(&deltas).into_bytes()]));

    let (think, display) = final_channels(&events);
    assert_eq!(think, "ab.c");
    assert_eq!(display, "intro. midend");
}

#[test]
fn no_channel_callbacks_after_complete() {
    let body = format!(
        "{}{}{}",
        sse_data_line("kept"),
        sse_finish_line("stop"),
        sse_data_line("dropped")
    );
    let (events, outcome) = decode_chunks(ChunkedReader::new([body.into_bytes()]));

    assert_eq!(outcome, DecodeOutcome::Completed);
    assert_eq!(
        events,
        vec![DecodeEvent::Display("kept".to_owned()), DecodeEvent::Complete]
    );
}

#[test]
fn read_failure_keeps_decoded_text_and_reports_once() {
    let body = format!("{}{}", sse_data_line("partial."), sse_data_line(" more"));
    let reader =
        ChunkedReader::split_every(body.as_bytes(), 16).then_fail(io::ErrorKind::TimedOut);
    let (events, outcome) = decode_chunks(reader);

    assert_eq!(outcome, DecodeOutcome::Failed);
    let (_, display) = final_channels(&events);
    assert_eq!(display, "partial. more");
    let errors = events
        .iter()
        .filter(|event| matches!(event, DecodeEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
    assert!(!events.contains(&DecodeEvent::Complete));
}

#[test]
fn cancelled_before_first_read_reads_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let mut reader = ChunkedReader::new([sse_body(&["never"]).into_bytes()]);
    let mut events: Vec<DecodeEvent> = Vec::new();

    let outcome = decode(&mut reader, &mut events, DecoderOptions::default(), &cancel);
    assert_eq!(outcome, DecodeOutcome::Cancelled);
    assert!(events.is_empty());
    assert_eq!(reader.reads(), 0);
}

/// Blocks in `read` until the test hands it bytes, like a stalled socket.
struct HeldReader {
    started: std::sync::mpsc::Sender<()>,
    bytes: std::sync::mpsc::Receiver<Vec<u8>>,
}

impl io::Read for HeldReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let _ = self.started.send(());
        match self.bytes.recv() {
            Ok(chunk) => {
                let len = chunk.len().min(buf.len());
                buf[..len].copy_from_slice(&chunk[..len]);
                Ok(len)
            }
            Err(_) => Ok(0),
        }
    }
}

#[test]
fn cancel_during_blocked_read_takes_effect_when_read_returns() {
    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (bytes_tx, bytes_rx) = std::sync::mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let worker = std::thread::spawn(move || {
        let reader = HeldReader {
            started: started_tx,
            bytes: bytes_rx,
        };
        let mut events: Vec<DecodeEvent> = Vec::new();
        let outcome = decode(reader, &mut events, DecoderOptions::default(), &worker_cancel);
        (events, outcome)
    });

    started_rx.recv().expect("reader should start");
    cancel.cancel();
    bytes_tx
        .send(sse_data_line("late.").into_bytes())
        .expect("reader should still be waiting");
    let (events, outcome) = worker.join().expect("decode thread");

    assert_eq!(outcome, DecodeOutcome::Cancelled);
    assert!(events.is_empty(), "{events:?}");
}
