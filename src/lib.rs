//! Query aggregation over music collections and the lazily loaded browse
//! tree built on top of it.

pub mod collection;
pub mod config;
pub mod config_persistence;
pub mod error;
pub mod filter;
pub mod memory;
pub mod meta;
pub mod protocol;
pub mod query;
pub mod transfer;
pub mod tree;
