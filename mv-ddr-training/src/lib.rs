//! # DDR3/DDR4 training engine for Marvell Dunit memory controllers
//!
//! This crate brings up the Dunit memory controller and its DDR PHY and trains the per-pin
//! delays and reference voltages until the DRAM can be used as general purpose memory.
//!
//! The engine is driven by three inputs:
//!
//! - A [topology::TopologyMap] describing the board memory geometry, either from a static board
//!   table or from a DDR4 SPD image.
//! - A [backend::RegisterBackend] which provides access to the Dunit register space. The PHY
//!   is reached through the Dunit with the indirect access handshake implemented in [access].
//! - A [backend::FrequencyController] which changes the DDR clock divider.
//!
//! [pipeline::Pipeline] runs the training stages in their fixed order and records the outcome of
//! every stage per interface in a [results::ResultMatrix]. All calibrated state lives in the PHY
//! and Dunit registers once training finished.
//!
//! The [a38x] module contains the backend for the Armada 38x SoC family.
#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod a38x;
pub mod access;
pub mod backend;
pub mod calibration;
pub mod context;
pub mod diag;
pub mod error;
pub mod freq;
pub mod ids;
pub mod odpg;
pub mod pattern;
pub mod pipeline;
pub mod results;
pub mod spd;
pub mod speed_bin;
pub mod timing;
pub mod topology;

#[cfg(test)]
pub(crate) mod sim;

pub use error::Error;
pub use pipeline::Pipeline;
pub use results::{Stage, TestResult};
