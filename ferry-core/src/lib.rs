//! Ferry Core
//!
//! Core types and abstractions for the Ferry CI/CD control plane.
//!
//! This crate contains:
//! - Domain types: Core business entities (Project, Pipeline, Build, Deployment, etc.)
//! - DTOs: Data transfer objects exchanged between the orchestrator and its clients

pub mod domain;
pub mod dto;
