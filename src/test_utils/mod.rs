//! Shared helpers for unit tests
mod common;

pub(crate) use common::*;
