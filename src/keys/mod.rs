//! Deterministic cache key construction.

mod key_gen;

pub use key_gen::*;
