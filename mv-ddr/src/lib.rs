//! # Register definitions for the Marvell Dunit memory controller
//!
//! This crate contains the register map of the Marvell Dunit DDR3/DDR4 memory controller found in
//! the Armada 38x/39x family of SoCs. It covers the controller configuration and timing
//! registers, the on-die pattern generator (ODPG) with its training result latches and the
//! indirectly addressed DDR PHY.
//!
//! The Dunit register file is accessed through a [dunit::DunitWindow] MMIO block. The PHY is not
//! memory mapped. It is reached through a two-phase command handshake on
//! [dunit::PHY_REG_FILE_ACCESS], with the command word layout described by
//! [phy::PhyAccessCommand].
#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod dunit;
pub mod field;
pub mod odpg;
pub mod phy;

pub use field::{Field, ValueTooWide};

/// Base address of the internal register space of the Armada 38x SoC.
pub const INTERNAL_REGS_BASE_ADDR: usize = 0xF100_0000;

/// Value for a masked write that replaces all 32 bits of a register.
pub const MASK_ALL_BITS: u32 = 0xffff_ffff;
