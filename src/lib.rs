//! parcel -- an upload gateway fronting a resumable transfer engine.
//!
//! The gateway owns the trust layer: what a client may claim about itself in
//! upload metadata, which reverse proxies are believed about the client's
//! network origin, which signed identity claims are honored, and the
//! asynchronous recording of that origin against each upload.

pub mod app;
pub mod claims;
pub mod cli;
pub mod config;
pub mod data;
pub mod engine;
pub mod logging;
pub mod meta;
pub mod provenance;
pub mod state;
pub mod web;
