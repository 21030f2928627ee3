//! Command line front end for the audit pipeline.
//!
//! The binary loads [`config::Config`], connects to PostgreSQL (or keeps
//! rows in memory with `--ephemeral`), and runs one of the [`cli`]
//! subcommands through [`commands`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod config;

pub use config::Config;
