#![forbid(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod ids;
pub mod logging;
pub mod model;
pub mod scrape;
pub mod segment;
pub mod writer;
