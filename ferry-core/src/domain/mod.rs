//! Core domain types
//!
//! This module contains the core domain structures used across Ferry services.
//! Entities reference their parents by id only; nothing here holds a live
//! reference to another record.

pub mod build;
pub mod deployment;
pub mod failure;
pub mod git_ref;
pub mod log;
pub mod pipeline;
pub mod project;
pub mod trigger;
