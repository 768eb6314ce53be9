//! certacl - ACL authorization service for a certificate-management server
//!
//! This library provides the ACL model, the authorization manager and the
//! administrative HTTP API. It exposes all modules for testing purposes.

pub mod audit;
pub mod authz;
pub mod directory;
pub mod errors;
pub mod settings;
pub mod store;
pub mod web;
