pub mod constants;
pub mod envelope;

// Re-export primary types for convenience.
pub use envelope::ChannelEvent;
