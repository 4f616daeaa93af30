//! Line protocol: outbound command normalization and inbound classification

pub mod command;
pub mod response_parser;

pub use command::{parse_lines, Command};
pub use response_parser::{classify, ClassifierConfig, ResponseKind, ResponseParser, TieBreak};
