#![deny(missing_docs)]
//! This lib provide several utilities for use in the `sipcore` project.

pub mod scanner;

pub use scanner::*;
