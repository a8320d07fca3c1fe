//! Agent sessions

pub mod anthropic;

pub use anthropic::{AnthropicOptions, AnthropicSession};
