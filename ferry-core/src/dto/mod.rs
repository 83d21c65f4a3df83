//! Data Transfer Objects
//!
//! Request and response bodies exchanged between the orchestrator's HTTP
//! surface and its clients, plus the normalized webhook event handed to the
//! dispatcher.

pub mod build;
pub mod deployment;
pub mod pipeline;
pub mod webhook;
