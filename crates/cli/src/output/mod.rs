//! Output formatting
//!
//! Every command writes through a [`Formatter`], which renders either
//! human-readable text or strict JSON.

mod formatter;

pub use formatter::{Formatter, human_size};

/// Output settings taken from the global flags
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Strict JSON on stdout, errors as JSON on stderr
    pub json: bool,
    pub no_color: bool,
    /// Suppress everything except errors
    pub quiet: bool,
}
