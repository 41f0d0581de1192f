//! Database introspection and curated analytics over Postgres and BigQuery.
//!
//! Requests flow through [`dispatch::Dispatcher`]: arguments are validated, the
//! `(operation, backend)` template is looked up in [`template::TemplateRegistry`] and rendered,
//! the statement runs on a [`backend::Connector`], and [`normalize`] turns the raw rows into
//! one [`normalize::CanonicalResult`] shape regardless of backend.

pub mod backend;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod masking;
pub mod migrate;
pub mod normalize;
pub mod operation;
pub mod output;
pub mod rpc;
pub mod template;
pub mod validation;
pub mod verbose;
