#![forbid(unsafe_code)]

pub mod build;
pub mod catalog;
pub mod cli;
pub mod compile;
pub mod config;
pub mod document;
pub mod formats;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod staleness;
pub mod store;
pub mod toc;
