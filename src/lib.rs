#![deny(clippy::mod_module_files)]
//! Push a local branch to a git remote over the smart-HTTP protocol.
//!
//! The pieces, leaf first: [`storage`] reads local objects, [`pack::walk`]
//! finds what the remote lacks, [`pack::encode`] writes the packfile,
//! [`transport`] talks to the server and [`commands::push`] drives a push.

pub mod commands;
pub mod config;
pub mod error;
pub mod pack;
pub mod repository;
pub mod storage;
pub mod transport;
