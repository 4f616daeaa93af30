//! Response Parser
//!
//! Classifies inbound device lines as acknowledgements, errors, or
//! informational chatter. Only the first two move the flow-control window.
//!
//! Matching is substring based on the lower-cased line, so `ok`, `OK`, and
//! `ok T:21.0` all acknowledge, while `error:22`, `Error: bad number` and
//! `!! bed heater fault` all reject. A line that carries both an ack token
//! and an error token is resolved by [`TieBreak`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a single inbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// The oldest in-flight command succeeded
    Acknowledgement,
    /// The oldest in-flight command failed
    Error,
    /// Anything else: banners, status chatter, echoes
    Informational,
}

impl ResponseKind {
    /// Whether this line answers an in-flight command
    pub fn consumes_command(self) -> bool {
        !matches!(self, Self::Informational)
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acknowledgement => write!(f, "ack"),
            Self::Error => write!(f, "error"),
            Self::Informational => write!(f, "info"),
        }
    }
}

/// Which classification wins when a line matches both token sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Treat the line as an error; a faulted command is never acknowledged
    #[default]
    ErrorFirst,
    /// Treat the line as an acknowledgement
    AckFirst,
}

/// Token sets used by the parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Substrings marking an acknowledgement
    pub ack_tokens: Vec<String>,
    /// Substrings marking an error
    pub error_tokens: Vec<String>,
    /// Resolution for lines matching both sets
    pub tie_break: TieBreak,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ack_tokens: vec!["ok".to_string()],
            error_tokens: vec!["error".to_string(), "!!".to_string()],
            tie_break: TieBreak::ErrorFirst,
        }
    }
}

/// Line classifier
#[derive(Debug, Clone)]
pub struct ResponseParser {
    ack_tokens: Vec<String>,
    error_tokens: Vec<String>,
    tie_break: TieBreak,
}

impl ResponseParser {
    /// Create a parser with the default token sets
    pub fn new() -> Self {
        Self::with_config(&ClassifierConfig::default())
    }

    /// Create a parser from explicit token sets
    pub fn with_config(config: &ClassifierConfig) -> Self {
        let lower = |tokens: &[String]| {
            tokens
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        };

        Self {
            ack_tokens: lower(&config.ack_tokens),
            error_tokens: lower(&config.error_tokens),
            tie_break: config.tie_break,
        }
    }

    /// Classify a response line
    pub fn parse(&self, line: &str) -> ResponseKind {
        let line = line.trim().to_lowercase();
        if line.is_empty() {
            return ResponseKind::Informational;
        }

        let is_ack = self.ack_tokens.iter().any(|t| line.contains(t.as_str()));
        let is_error = self.error_tokens.iter().any(|t| line.contains(t.as_str()));

        match (is_ack, is_error) {
            (true, true) => match self.tie_break {
                TieBreak::ErrorFirst => ResponseKind::Error,
                TieBreak::AckFirst => ResponseKind::Acknowledgement,
            },
            (true, false) => ResponseKind::Acknowledgement,
            (false, true) => ResponseKind::Error,
            (false, false) => ResponseKind::Informational,
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a line with the default token sets
pub fn classify(line: &str) -> ResponseKind {
    ResponseParser::new().parse(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_variants() {
        let parser = ResponseParser::new();
        assert_eq!(parser.parse("ok"), ResponseKind::Acknowledgement);
        assert_eq!(parser.parse("  OK\r"), ResponseKind::Acknowledgement);
        assert_eq!(parser.parse("ok T:21.3 /0.0"), ResponseKind::Acknowledgement);
    }

    #[test]
    fn test_error_variants() {
        let parser = ResponseParser::new();
        assert_eq!(parser.parse("error:22"), ResponseKind::Error);
        assert_eq!(parser.parse("Error: Bad number format"), ResponseKind::Error);
        assert_eq!(parser.parse("!! printer halted"), ResponseKind::Error);
    }

    #[test]
    fn test_informational() {
        let parser = ResponseParser::new();
        assert_eq!(parser.parse("Grbl 1.1h ['$' for help]"), ResponseKind::Informational);
        assert_eq!(parser.parse("<Idle|MPos:0,0,0>"), ResponseKind::Informational);
        assert_eq!(parser.parse(""), ResponseKind::Informational);
        assert!(!ResponseKind::Informational.consumes_command());
    }

    #[test]
    fn test_tie_break() {
        let line = "ok but error on next move";
        assert_eq!(classify(line), ResponseKind::Error);

        let parser = ResponseParser::with_config(&ClassifierConfig {
            tie_break: TieBreak::AckFirst,
            ..Default::default()
        });
        assert_eq!(parser.parse(line), ResponseKind::Acknowledgement);
    }

    #[test]
    fn test_custom_tokens_are_case_insensitive() {
        let parser = ResponseParser::with_config(&ClassifierConfig {
            ack_tokens: vec!["DONE".to_string()],
            error_tokens: vec!["FAULT".to_string(), "  ".to_string()],
            tie_break: TieBreak::ErrorFirst,
        });
        assert_eq!(parser.parse("done"), ResponseKind::Acknowledgement);
        assert_eq!(parser.parse("ok"), ResponseKind::Informational);
        assert_eq!(parser.parse("Fault 3"), ResponseKind::Error);
    }
}
