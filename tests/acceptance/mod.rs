//! Integration tests for pulse-train acceptance testing.

mod common;
mod config_test;
mod pattern_test;
mod timing_test;
