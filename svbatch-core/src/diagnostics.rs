//! Non-fatal diagnostics raised while a unit runs
//!
//! Plugins push warnings here instead of failing; the collected messages end
//! up in the unit's warning text whatever its final state.

/// Ordered collection of warning messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    messages: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one warning; blank messages are ignored
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        let trimmed = message.trim();
        if !trimmed.is_empty() {
            self.messages.push(trimmed.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Join messages into the unit's warning text (None when empty)
    pub fn warning_text(&self) -> Option<String> {
        if self.messages.is_empty() {
            None
        } else {
            Some(self.messages.join("\n"))
        }
    }
}
