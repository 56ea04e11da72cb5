#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

pub mod cli;

pub mod archive;
pub mod compression;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod layout;
pub mod model;
pub mod orchestrator;
pub mod processor;
pub mod repo;
pub mod shell;
pub mod storage;

mod format;
mod logger;

#[cfg(test)]
mod testing;
