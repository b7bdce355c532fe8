//! Welcome Bot Library
//!
//! A chat bot that greets groups through an external chat protocol engine
//! reached over JSON-RPC.
//!
//! This crate provides the core functionality for:
//! - Provisioning the bot account from credentials or a provisioning code
//! - Talking to the chat engine subprocess over line-delimited JSON-RPC
//! - Sending a one-time welcome message per group chat
//! - Resending that welcome whenever a new member joins

pub mod bot;
pub mod config;
pub mod engine;
