//! Unit tests for the image parser and section locator.

mod fuzz_tests;
