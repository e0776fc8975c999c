//! Server-Sent Events framing.
//!
//! Each event becomes an `event:` line, one `data:` line per payload line,
//! and a blank-line terminator. JSON payloads are encoded on a single line.

use crate::events::{Event, Payload};

/// Comment frame sent on quiet streams so intermediaries keep the connection.
/// Clients ignore lines starting with `:`.
pub const KEEP_ALIVE: &str = ": keep-alive\n\n";

/// Encode one event as an SSE frame.
pub fn encode(event: &Event) -> String {
    let mut frame = format!("event: {}\n", event.kind.as_str());
    match &event.payload {
        Payload::Text(text) => push_data_lines(&mut frame, text),
        Payload::Json(value) => {
            // serde_json never emits raw newlines in compact output
            frame.push_str("data: ");
            frame.push_str(&value.to_string());
            frame.push('\n');
        }
    }
    frame.push('\n');
    frame
}

fn push_data_lines(frame: &mut String, text: &str) {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    for line in normalized.split('\n') {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
}
