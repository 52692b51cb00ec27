#![deny(unused_must_use)]
#![warn(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![forbid(unsafe_code)]

pub mod config;
pub mod driver;

pub use config::{Config, Limits, LogConfig};
