//! Unit tests for fabric-provisioner
//!
//! These tests use mocked dependencies and run fast without external hosts.

mod architecture;
mod prepare_tests;
mod property_tests;
mod provisioner_tests;
