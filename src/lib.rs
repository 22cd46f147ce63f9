pub mod app;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod install;
pub mod matcher;
pub mod orchestrator;
pub mod output;
pub mod progress;
pub mod retry;
pub mod store;
