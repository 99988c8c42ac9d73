//! Core domain + application logic for the ZiVPN account manager.
//!
//! This crate is intentionally framework-agnostic. The HTTP API and Telegram
//! live in adapter crates and reach the account store through ports (traits).

pub mod bot;
pub mod calendar;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod security;
pub mod session;
pub mod store;
pub mod sweeper;
pub mod sync;
pub mod validation;

pub use errors::{AccountError, AccountResult, Error, Result};
