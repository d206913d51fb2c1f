//! Loader test suite
//!
//! Host-side tests for the ELF64 module loader: unit tests for the parser
//! and section locator, integration tests driving the full
//! parse -> load -> register -> relocate flow over synthetic multi-module
//! images, and property-based fuzzing of the structural validation.


#[cfg(test)]
mod unit;
