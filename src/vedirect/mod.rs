//! # VE.Direct Protocol Module
//!
//! Implementation of the Victron VE.Direct serial protocol.
//!
//! This module handles:
//! - Text block framing and modulo-256 checksum validation
//! - VE.HEX register message decoding (interleaved binary sub-protocol)
//! - Encoding of well-formed frames for replay and tests
//! - The decoder worker feeding raw records downstream

pub mod protocol;
pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod reader;
