//! # framecast-viewer
//!
//! Headless receive endpoint for the framecast pipeline: packets
//! arriving on a UDP port flow through the receive slot into the
//! render loop, which decodes at a fixed tick and exposes the current
//! image through logs and a watch channel.

pub mod config;
pub mod service;
