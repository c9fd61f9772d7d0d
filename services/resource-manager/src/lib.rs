//! corral resource manager library.
//!
//! The resource manager owns two concerns: a capacity ledger that accounts
//! for job allocations against a fixed pool, and the safety state machine
//! that gates destruction of cluster workers. This crate primarily ships a
//! `resource-manager` binary, but the library surface is exposed for
//! integration testing and reuse.
//!
//! ## Modules
//!
//! - `api`: HTTP routes and problem-details error mapping
//! - `classifier`: permanent/elastic classification from node metadata
//! - `cluster`: cluster API client (HTTP and mock)
//! - `guard`: drain/destroy authorization
//! - `manager`: worker lifecycle orchestration
//! - `provisioner`: VM provisioning client (HTTP and mock)
//! - `sweeper`: background TTL expiry loop

pub mod api;
pub mod classifier;
pub mod cluster;
pub mod config;
pub mod guard;
pub mod manager;
pub mod provisioner;
pub mod state;
pub mod sweeper;
pub mod worker;
