//! # DDR4 geometric calibration
//!
//! DDR4 has no fixed reference voltage. The receiver duty cycle of the PHY and the VrefDQ of the
//! DRAM are swept in one dimension while the data windows are centralized at every sweep point.
//! The windows found at all points outline the two dimensional eye of a lane and its centre of
//! mass becomes the calibrated operating point.
//!
//! This module holds the arithmetic of the calibration. The stages driving the hardware are
//! part of [crate::pipeline].
pub mod centroid;
pub mod copt;
pub mod dq_map;
pub mod sweep;
