//! Buildflow - propagates newly published builds to subscribed repositories
//! via automatically managed dependency update pull requests.
//!
//! This library provides the flow engine: durable in-flight PR tracking,
//! subscription scanning, merge policy evaluation, and reconciliation against
//! the source-control host.

pub mod config;
pub mod history;
pub mod policy;
pub mod reconciler;
pub mod registry;
pub mod remote;
pub mod scanner;
pub mod server;
pub mod service;
pub mod store;
pub mod trigger;
pub mod types;
pub mod updater;

#[cfg(test)]
pub mod test_utils;
