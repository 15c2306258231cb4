//! PostgreSQL storage for usage ingestion.
//!
//! Implements the organization and dedup store contracts against the schema
//! registry's relational database.

pub mod client;
pub mod config;
pub mod dedup;
pub mod health;
pub mod migrations;
pub mod organizations;

pub use client::PostgresClient;
pub use config::PostgresConfig;
pub use dedup::PostgresDedupStore;
pub use organizations::PostgresOrganizationStore;
