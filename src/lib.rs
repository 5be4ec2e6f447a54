#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod data;
pub mod network;
pub mod offline;
pub mod picture;
pub mod preferences;
pub mod reader;
pub mod router;
pub mod storage;
pub mod ui;
pub mod view;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
