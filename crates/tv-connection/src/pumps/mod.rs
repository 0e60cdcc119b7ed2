//! Per-connection background tasks.

pub(crate) mod read;
