//! # Distributed sorting
//!
//! Comparator-driven global ordering of trace metadata across ranks, plus
//! the permutation plumbing for reading traces back in sorted order.
pub mod global;
pub mod order;
