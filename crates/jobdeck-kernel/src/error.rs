//! Error type shared by the jobdeck crates.

/// Errors surfaced by repositories, configuration and decoding.
///
/// Derived-state projections (status, latency, display) never produce these;
/// they only come from I/O at the edges.
#[derive(Debug, thiserror::Error)]
pub enum DeckError {
    #[error("Store error: {0}")]
    Store(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Not found: {0}")]
    NotFound(String),
}
