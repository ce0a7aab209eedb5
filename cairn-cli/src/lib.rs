//! Cairn CLI - Command-line interface for Cairn migrations.
//!
//! This crate provides the `cairn` binary: it reads `cairn.toml`, applies
//! flag and environment overrides, loads the changelog manifest and runs
//! one migration action against PostgreSQL or MySQL.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
