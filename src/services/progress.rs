//! Streamed progress output for one generation request.
//!
//! The consumer renders fragments as they arrive. `[REMOVE_LAST_LINE]` asks it
//! to drop the previously rendered line, `[DONE]` ends the stream.

use axum::body::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

pub const REMOVE_LAST_LINE: &str = "[REMOVE_LAST_LINE]";
pub const DONE: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressState {
    Loading,
    Completed,
    Error,
}

impl ProgressState {
    fn as_str(self) -> &'static str {
        match self {
            ProgressState::Loading => "loading",
            ProgressState::Completed => "completed",
            ProgressState::Error => "error",
        }
    }
}

/// One line of status text as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub content: String,
    pub state: ProgressState,
    pub percentage: Option<u8>,
}

impl ProgressLine {
    pub fn loading(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            state: ProgressState::Loading,
            percentage: None,
        }
    }

    pub fn completed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            state: ProgressState::Completed,
            percentage: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            state: ProgressState::Error,
            percentage: None,
        }
    }

    pub fn with_percentage(mut self, percentage: u8) -> Self {
        self.percentage = Some(percentage);
        self
    }

    fn render(&self) -> String {
        let percentage = self
            .percentage
            .map(|p| format!(r#" data-percentage="{p}""#))
            .unwrap_or_default();
        format!(
            r#"<div class="mj-progress" data-state="{}"{}>{}</div>"#,
            self.state.as_str(),
            percentage,
            escape_html(&self.content),
        )
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Receiving half, handed to the HTTP response body.
pub type ProgressReceiver = mpsc::UnboundedReceiver<Bytes>;

/// Open a progress stream. The writer is the only producer.
pub fn channel() -> (ProgressWriter, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressWriter {
            tx,
            lines: Vec::new(),
        },
        rx,
    )
}

/// Producing half of a progress stream.
///
/// Keeps a mirror of the lines the consumer currently shows. Delivery is
/// best-effort: once the reader is gone every write is dropped.
#[derive(Debug)]
pub struct ProgressWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    lines: Vec<ProgressLine>,
}

impl ProgressWriter {
    /// Emit a status line, optionally replacing the previous one.
    pub fn update(&mut self, line: ProgressLine, retract_last: bool) {
        if retract_last {
            self.lines.pop();
            self.send(REMOVE_LAST_LINE);
        }
        self.send(&line.render());
        self.lines.push(line);
    }

    pub fn push(&mut self, line: ProgressLine) {
        self.update(line, false);
    }

    /// Emit a raw fragment that is not part of the status lines.
    pub fn write(&self, text: &str) {
        self.send(text);
    }

    /// Lines currently visible to the consumer.
    pub fn lines(&self) -> &[ProgressLine] {
        &self.lines
    }

    /// Terminate the stream. Consuming `self` makes this the last write.
    pub fn finish(self) {
        self.send(DONE);
    }

    fn send(&self, text: &str) {
        if self.tx.send(Bytes::from(text.to_owned())).is_err() {
            tracing::debug!("Progress reader disconnected, dropping fragment");
        }
    }
}
