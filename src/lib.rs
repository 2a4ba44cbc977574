#[macro_use]
extern crate log;
#[macro_use]
extern crate derive_builder;
#[macro_use]
extern crate lazy_static;

pub mod archive;
pub mod browser_controller;
pub mod consent;
pub mod content_filter;
pub mod devices;
pub mod render;
pub mod run_log;
pub mod runner;
pub mod session;
pub mod types;
pub mod utils;
