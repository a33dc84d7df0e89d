//! Integration tests for schedwatch acceptance testing.

mod common;
mod detection_test;
mod stop_test;
