//! Core translation routing engine

pub mod backend;
pub mod batch;
pub mod config;
pub mod errors;
pub mod glossary;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod router;
