//! # framecast-publisher
//!
//! Headless publish endpoint for the framecast pipeline: a synthetic
//! camera feeds the capture slot, and the publish loop encodes JPEG at
//! a fixed tick and streams packets over UDP to one destination.

pub mod config;
pub mod service;
