//! Utility functions for timestamp handling.

pub mod timestamps;

pub use timestamps::{iso_timestamp, parse_timestamp, Timestamp, TimestampError};
