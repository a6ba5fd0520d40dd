// ABOUTME: Library crate for panekeeper exposing the pane engine and its components

#![allow(missing_docs)]

pub mod agents;
pub mod app;
pub mod cli;
pub mod config;
pub mod git;
pub mod merge;
pub mod models;
pub mod monitor;
pub mod reconcile;
pub mod registry;
pub mod status;
pub mod store;
pub mod tasks;
pub mod testing;
pub mod tmux;
