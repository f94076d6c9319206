//! Tests for the CLI module
//!
//! Argument parsing and configuration file loading, kept out of the
//! individual modules.
