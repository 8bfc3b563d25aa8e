//! Per-account reward automation for a chat-platform mini-app.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod launcher;
pub mod runner;
pub mod tasks;
pub mod wheel;
