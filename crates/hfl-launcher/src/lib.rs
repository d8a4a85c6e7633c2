//! Hotfix Launcher command-line front end.

#![allow(missing_docs)]

pub mod app;
pub mod cli;
pub mod logging;
pub mod presenter;
