// Copyright 2026 Courier Contributors
// SPDX-License-Identifier: Apache-2.0

//! Courier runtime library — cross-tab study-session relay over CDP.
//!
//! This library crate exposes the core modules for integration testing.

pub mod bus;
pub mod cdp;
pub mod cli;
pub mod config;
pub mod control;
pub mod cycle;
pub mod delivery;
pub mod events;
pub mod extract;
pub mod messages;
pub mod oracle;
pub mod prompt;
pub mod router;
pub mod runtime;
pub mod session;
pub mod site;
pub mod task;
pub mod transport;
pub mod watcher;
