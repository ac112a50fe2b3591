//! AT command protocol implementations.

pub mod at;
pub mod expect;

pub use expect::{Expectation, expect};
