#![doc(hidden)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Core library for org-survey
//!
//! This library consolidates all functionality for the org-survey tool, which walks
//! GitHub organizations and emits structured reports about their repositories, teams,
//! and members.
//!
//! # Module Organization
//!
//! - [`engine`]: Rate governing, retries, the shared cache, and the concurrent pipeline
//! - [`github`]: GitHub REST client and the cached, retrying fetchers built on it
//! - [`reports`]: Output sinks for CSV, JSON, and Excel
//! - [`survey`]: The report types, each a processor/formatter pair driven by the pipeline
//! - [`commands`]: Command-line interface and orchestration

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;

#[cfg(any(debug_assertions, test))]
pub mod commands;
#[cfg(not(any(debug_assertions, test)))]
mod commands;

pub mod engine;

pub mod github;

pub mod reports;

#[cfg(any(debug_assertions, test))]
pub mod survey;
#[cfg(not(any(debug_assertions, test)))]
mod survey;

pub use crate::commands::{Host, run};
