//! Collaborator traits the Job Engine and Query Facade depend on.
//!
//! Each one is a narrow interface over an external system the core treats
//! as out of scope: the relational store, the crawling service,
//! and the semantic search service.

pub mod crawler;
pub mod search;
pub mod store;
