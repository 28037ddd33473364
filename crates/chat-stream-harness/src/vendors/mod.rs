//! Vendor-specific frame sources.
pub mod anthropic;
