//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules for better organization:
//! - `message_handler`: Routes incoming text and photo messages through the
//!   per-chat state machine
//! - `callback_handler`: Handles inline accept/decline callback queries
//! - `ui_builder`: Creates keyboards and formats messages
//! - `dialogue_manager`: The per-state workflow handlers

pub mod callback_handler;
pub mod dialogue_manager;
pub mod message_handler;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

// Re-export utility functions that are used elsewhere
pub use message_handler::{dispatch_message, dispatch_text, send_all};
pub use ui_builder::Outgoing;
