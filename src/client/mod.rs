//! Presentation-side helpers: the cooperative polling loop that watches a
//! conversation until its pending placeholder resolves.

pub mod poll;

pub use poll::{MessageView, PollingLoop};
