#![forbid(unsafe_code)]

//! Library side of the YogaTube backend.
//!
//! The binaries only wire things together: `backend` serves the HTTP API and
//! `ingest` runs a single playlist import, typically from a timer.

pub mod api;
pub mod clock;
pub mod config;
pub mod ingest;
pub mod models;
pub mod picker;
pub mod store;
pub mod visitor;
