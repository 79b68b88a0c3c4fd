//! Data models for qrgate

pub mod style;
pub mod token;

pub use style::{StyleCatalog, StyleId, StyleStatus};
pub use token::{GenerationRecord, Theme, Token, TokenSummary};
