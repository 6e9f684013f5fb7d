//! Varlock HTTP server.
//!
//! Wires the core library to PostgreSQL and exposes the JSON API at `/v1/*`:
//! device-code CLI authentication, bearer-token lifecycle, project and
//! environment management, secret CRUD with envelope encryption, and
//! background read-repair key rotation.

pub mod auth;
pub mod authz;
pub mod config;
pub mod error;
pub mod integrity;
pub mod keystore;
pub mod models;
pub mod repository;
pub mod rotation;
pub mod routes;
pub mod state;
