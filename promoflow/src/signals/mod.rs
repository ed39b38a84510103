//! Event trigger adapter: upstream build and review signals.

mod adapter;
mod signal;

pub use adapter::{RunSummary, SignalOutcome, TriggerAdapter};
pub use signal::{parse_signal, parse_signal_str, Signal};
