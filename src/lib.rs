//! Relaychat is the protocol core of a multi-provider chat client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`mcp`] connects to every configured Model Context Protocol endpoint,
//!   lists their tools concurrently and merges them into one namespaced
//!   capability registry.
//! - [`core::streams`] records generation streams and carries out-of-band
//!   `append-message` notifications per stream.
//! - [`core::resume`] decides, after a reload, whether a conversation view
//!   must reattach to a running generation, and merges what arrives.
//! - [`core::config`] loads the TOML configuration shared by all of the above.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod cli;
pub mod core;
pub mod mcp;
pub mod utils;
