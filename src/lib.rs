//! Analytics and live reconciliation for vacancy requisitions.
//!
//! The pure pipelines ([`filter`], [`rollup`], [`aging`], [`breakdown`],
//! [`drilldown`]) turn a [`models::Snapshot`] into derived views. The
//! [`reconcile::Controller`] keeps those views current against a record
//! store, and [`db`] is the Postgres side of that store.

pub mod aging;
pub mod breakdown;
pub mod config;
pub mod db;
pub mod drilldown;
pub mod error;
pub mod export;
pub mod filter;
pub mod lifecycle;
pub mod models;
pub mod query;
pub mod reconcile;
pub mod report;
pub mod rollup;

#[cfg(test)]
pub(crate) mod testing;
