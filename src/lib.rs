#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod collection;
pub mod config;
pub mod data;
pub mod feed;
pub mod filters;
pub mod gallery;
pub mod grid;
pub mod input;
pub mod logging;
pub mod media;
pub mod pager;
pub mod storage;
pub mod theme;
pub mod ui;
pub mod video;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
