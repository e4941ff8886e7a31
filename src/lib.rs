//! Knowledge observatory: semantic ingest, search, concept graphs and
//! collection health over a vector store with a relational metadata mirror.

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod error;
pub mod graph;
pub mod http;
pub mod ingest;
pub mod jobs;
pub mod meta;
pub mod models;
pub mod quality;
pub mod search;
pub mod similarity;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
