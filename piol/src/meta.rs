//! # Rule-driven trace metadata storage
//!
//! A [`rule::Rule`] describes which semantic trace attributes a store
//! carries and how they are packed into typed arrays; a
//! [`param::TraceMetadata`] owns the arrays for a fixed number of records.
pub mod param;
pub mod rule;
