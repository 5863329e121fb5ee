//! Content trimming to fit a backend's size budget.
//!
//! Sizes are measured with an approximate token count (characters divided
//! by a fixed ratio, rounded up). Every strategy guarantees that the trimmed
//! content measures no more than the budget, and content that already fits
//! is returned unchanged.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use conflux_abstraction::{ChatMessage, DEFAULT_CHARS_PER_TOKEN, approximate_tokens};
use serde::{Deserialize, Serialize};

/// Default marker inserted where the middle strategy drops text.
pub const DEFAULT_OMISSION_MARKER: &str = "\n[...]\n";

/// Which part of oversized content survives trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimStrategy {
    /// Drop the head, keep the latest content.
    Start,
    /// Keep a prefix and a suffix, drop the interior.
    Middle,
    /// Drop the tail, keep the earliest content.
    #[default]
    End,
}

impl fmt::Display for TrimStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrimStrategy::Start => write!(f, "start"),
            TrimStrategy::Middle => write!(f, "middle"),
            TrimStrategy::End => write!(f, "end"),
        }
    }
}

impl FromStr for TrimStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(TrimStrategy::Start),
            "middle" => Ok(TrimStrategy::Middle),
            "end" => Ok(TrimStrategy::End),
            other => Err(format!("unknown trim strategy '{}', expected start, middle or end", other)),
        }
    }
}

/// Share of a message a trimming pass may keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Allotment {
    Whole,
    Partial(usize),
}

/// Reduces content to fit a size budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimmer {
    /// Characters per approximate token.
    chars_per_token: usize,
    /// Marker inserted by the middle strategy, if it fits.
    omission_marker: Option<String>,
}

impl Default for Trimmer {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            omission_marker: Some(DEFAULT_OMISSION_MARKER.to_string()),
        }
    }
}

impl Trimmer {
    /// Creates a trimmer measuring `chars_per_token` characters per token.
    #[must_use]
    pub fn new(chars_per_token: usize) -> Self {
        Self { chars_per_token: chars_per_token.max(1), ..Self::default() }
    }

    /// Sets (or clears) the omission marker used by the middle strategy.
    #[must_use]
    pub fn with_omission_marker(mut self, marker: Option<String>) -> Self {
        self.omission_marker = marker.filter(|m| !m.is_empty());
        self
    }

    /// Returns the configured characters-per-token ratio.
    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    /// Measures a piece of text.
    pub fn measure(&self, text: &str) -> usize {
        approximate_tokens(text, self.chars_per_token)
    }

    /// Measures a conversation as the sum of its message contents.
    pub fn measure_messages(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.measure(&m.content)).sum()
    }

    /// Returns `true` if `text` already fits `budget`.
    pub fn fits(&self, text: &str, budget: usize) -> bool {
        self.measure(text) <= budget
    }

    /// Trims a single string to fit `budget`.
    pub fn trim_text(&self, text: &str, budget: usize, strategy: TrimStrategy) -> String {
        if self.fits(text, budget) {
            return text.to_string();
        }

        let max_chars = budget.saturating_mul(self.chars_per_token);
        let total = text.chars().count();

        match strategy {
            TrimStrategy::End => text.chars().take(max_chars).collect(),
            TrimStrategy::Start => text.chars().skip(total.saturating_sub(max_chars)).collect(),
            TrimStrategy::Middle => self.trim_middle(text, total, max_chars),
        }
    }

    fn trim_middle(&self, text: &str, total: usize, max_chars: usize) -> String {
        // The marker only goes in when there is room for it plus some content.
        let marker = self
            .omission_marker
            .as_deref()
            .filter(|m| m.chars().count() < max_chars)
            .unwrap_or("");
        let available = max_chars - marker.chars().count();
        let tail_len = available / 2;
        let head_len = available - tail_len;

        let head: String = text.chars().take(head_len).collect();
        let tail: String = text.chars().skip(total.saturating_sub(tail_len)).collect();
        format!("{head}{marker}{tail}")
    }

    /// Trims a conversation to fit `budget`.
    ///
    /// Whole messages are kept or dropped from the side the strategy
    /// discards; the message straddling the boundary is cut with the same
    /// strategy applied to its text. Roles and order are preserved.
    pub fn trim_messages(
        &self,
        messages: &[ChatMessage],
        budget: usize,
        strategy: TrimStrategy,
    ) -> Vec<ChatMessage> {
        let sizes: Vec<usize> = messages.iter().map(|m| self.measure(&m.content)).collect();
        if sizes.iter().sum::<usize>() <= budget {
            return messages.to_vec();
        }

        let (head_budget, tail_budget) = match strategy {
            TrimStrategy::End => (budget, 0),
            TrimStrategy::Start => (0, budget),
            TrimStrategy::Middle => (budget - budget / 2, budget / 2),
        };
        let head = allot(sizes.iter().copied().enumerate(), head_budget);
        let tail = allot(sizes.iter().copied().enumerate().rev(), tail_budget);

        messages
            .iter()
            .enumerate()
            .filter_map(|(index, message)| {
                let content = match (head.get(&index), tail.get(&index)) {
                    (Some(Allotment::Whole), _) | (_, Some(Allotment::Whole)) => {
                        message.content.clone()
                    }
                    (Some(Allotment::Partial(h)), Some(Allotment::Partial(t))) => {
                        self.trim_text(&message.content, h + t, TrimStrategy::Middle)
                    }
                    (Some(Allotment::Partial(h)), None) => {
                        self.trim_text(&message.content, *h, TrimStrategy::End)
                    }
                    (None, Some(Allotment::Partial(t))) => {
                        self.trim_text(&message.content, *t, TrimStrategy::Start)
                    }
                    (None, None) => return None,
                };
                Some(ChatMessage { role: message.role.clone(), content })
            })
            .collect()
    }
}

/// Hands out `budget` to messages in iteration order until it runs out.
fn allot(sizes: impl Iterator<Item = (usize, usize)>, budget: usize) -> HashMap<usize, Allotment> {
    let mut remaining = budget;
    let mut allotments = HashMap::new();

    for (index, size) in sizes {
        if size <= remaining {
            remaining -= size;
            allotments.insert(index, Allotment::Whole);
        } else {
            if remaining > 0 {
                allotments.insert(index, Allotment::Partial(remaining));
            }
            break;
        }
    }

    allotments
}
