//! Channel lifecycle events

pub mod event;
