//! # VE Telemetry Library
//!
//! Decode Victron VE.Direct solar/inverter telemetry and keep a bounded
//! rolling history of it.
//!
//! This library provides the frame decoder, field typing and register
//! resolution, the two-tier streaming summary and the delta codec used for
//! query responses and uploads.

pub mod config;
pub mod delta;
pub mod error;
pub mod fields;
pub mod pipeline;
pub mod record;
pub mod registers;
pub mod serial;
pub mod summary;
pub mod transmit;
pub mod vedirect;
