//! # Register access layer
//!
//! Masked read-modify-write access to the Dunit registers of one or all active interfaces, bounded
//! polling, and the indirect PHY register access.
//!
//! A PHY access writes the [PhyAccessCommand] twice to [PHY_REG_FILE_ACCESS], the second time with
//! the go bit set. The access is complete once hardware cleared the go bit again. Read data is
//! returned in the low 16 bits of the same register.
use mv_ddr::dunit::PHY_REG_FILE_ACCESS;
use mv_ddr::phy::{LaneCast, PhyAccessCommand, PhyBank, PhyOperation};
use mv_ddr::{Field, MASK_ALL_BITS};

use crate::backend::RegisterBackend;
use crate::error::Error;
use crate::ids::{InterfaceId, InterfaceMask, LaneId, LaneMask, MAX_INTERFACES, MAX_LANES};

/// Interface addressing of a Dunit access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Unicast(InterfaceId),
    /// All active interfaces.
    Multicast,
}

impl From<InterfaceId> for Access {
    fn from(if_id: InterfaceId) -> Self {
        Access::Unicast(if_id)
    }
}

/// Lane addressing of a PHY access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneAccess {
    Unicast(LaneId),
    /// All lanes of the interface, in a single PHY transaction.
    Multicast,
}

const PHY_ACCESS_BUSY: u32 = 1 << 31;

pub struct RegisterAccess<B> {
    backend: B,
    active: InterfaceMask,
    max_polling: u32,
}

impl<B: RegisterBackend> RegisterAccess<B> {
    pub fn new(backend: B, active: InterfaceMask, max_polling: u32) -> Self {
        Self {
            backend,
            active,
            max_polling,
        }
    }

    #[inline]
    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    #[inline]
    pub fn active(&self) -> InterfaceMask {
        self.active
    }

    #[inline]
    pub fn max_polling(&self) -> u32 {
        self.max_polling
    }

    /// Interfaces addressed by an access.
    pub fn targets(&self, access: Access) -> InterfaceMask {
        match access {
            Access::Unicast(if_id) if self.active.contains(if_id) => {
                InterfaceMask::default().with(if_id)
            }
            Access::Unicast(if_id) => {
                log::warn!("access to inactive interface {} ignored", if_id);
                InterfaceMask::default()
            }
            Access::Multicast => self.active,
        }
    }

    /// Read a register of one interface under a mask.
    pub fn if_read(&mut self, if_id: InterfaceId, offset: u32, mask: u32) -> u32 {
        self.backend.read(if_id, offset) & mask
    }

    /// Read a register of every active interface. Inactive slots read as 0.
    pub fn if_read_all(&mut self, offset: u32, mask: u32) -> [u32; MAX_INTERFACES] {
        let mut values = [0; MAX_INTERFACES];
        for if_id in self.active.iter() {
            values[if_id.index()] = self.if_read(if_id, offset, mask);
        }
        values
    }

    /// Write a register. Only the bits in `mask` change, unless the mask covers all bits.
    pub fn if_write(&mut self, access: Access, offset: u32, value: u32, mask: u32) {
        for if_id in self.targets(access).iter() {
            let new = if mask == MASK_ALL_BITS {
                value
            } else {
                (self.backend.read(if_id, offset) & !mask) | (value & mask)
            };
            log::trace!("if {} write {:#07x} = {:#010x}", if_id, offset, new);
            self.backend.write(if_id, offset, new);
        }
    }

    /// Write a typed register field.
    pub fn write_field(&mut self, access: Access, field: Field, value: u32) -> Result<(), Error> {
        let encoded = field.encode(value)?;
        self.if_write(access, field.offset, encoded, field.mask());
        Ok(())
    }

    pub fn read_field(&mut self, if_id: InterfaceId, field: Field) -> u32 {
        field.extract(self.backend.read(if_id, field.offset))
    }

    /// Poll until `reg & mask == expected` on every addressed interface.
    ///
    /// All addressed interfaces are polled even if one of them times out. The error names the
    /// first interface which timed out.
    pub fn poll(
        &mut self,
        access: Access,
        expected: u32,
        mask: u32,
        offset: u32,
        max_iterations: u32,
    ) -> Result<(), Error> {
        let mut result = Ok(());
        for if_id in self.targets(access).iter() {
            let done = (0..max_iterations).any(|_| self.if_read(if_id, offset, mask) == expected);
            if !done {
                log::error!("if {}: polling {:#x} timed out", if_id, offset);
                if result.is_ok() {
                    result = Err(Error::Timeout {
                        if_id,
                        addr: offset,
                    });
                }
            }
        }
        result
    }

    /// Poll with the default iteration budget.
    pub fn poll_default(
        &mut self,
        access: Access,
        expected: u32,
        mask: u32,
        offset: u32,
    ) -> Result<(), Error> {
        self.poll(access, expected, mask, offset, self.max_polling)
    }

    /// Read a register `count` times to let the PHY settle between two writes.
    pub fn read_n_times(&mut self, if_id: InterfaceId, offset: u32, count: u32) {
        for _ in 0..count {
            let _ = self.backend.read(if_id, offset);
        }
    }

    #[inline]
    pub fn delay_ms(&mut self, ms: u32) {
        self.backend.delay_ms(ms)
    }

    fn phy_access(
        &mut self,
        access: Access,
        lane: LaneAccess,
        bank: PhyBank,
        reg: u8,
        data: u16,
        operation: PhyOperation,
    ) -> Result<(), Error> {
        let (cast, lane_id) = match lane {
            LaneAccess::Unicast(lane) => (LaneCast::Unicast, lane.raw()),
            LaneAccess::Multicast => (LaneCast::Multicast, 0),
        };
        let cmd = PhyAccessCommand::command(operation, bank, cast, lane_id, reg, data);
        self.if_write(access, PHY_REG_FILE_ACCESS, cmd.raw_value(), MASK_ALL_BITS);
        self.if_write(
            access,
            PHY_REG_FILE_ACCESS,
            cmd.with_go(true).raw_value(),
            MASK_ALL_BITS,
        );
        for if_id in self.targets(access).iter() {
            self.poll(
                Access::Unicast(if_id),
                0,
                PHY_ACCESS_BUSY,
                PHY_REG_FILE_ACCESS,
                self.max_polling,
            )?;
        }
        Ok(())
    }

    /// Write a PHY register.
    pub fn bus_write(
        &mut self,
        access: Access,
        lane: LaneAccess,
        bank: PhyBank,
        reg: u8,
        data: u16,
    ) -> Result<(), Error> {
        self.phy_access(access, lane, bank, reg, data, PhyOperation::Write)
    }

    /// Read a PHY register of one lane.
    pub fn bus_read(
        &mut self,
        if_id: InterfaceId,
        lane: LaneId,
        bank: PhyBank,
        reg: u8,
    ) -> Result<u16, Error> {
        self.phy_access(
            Access::Unicast(if_id),
            LaneAccess::Unicast(lane),
            bank,
            reg,
            0,
            PhyOperation::Read,
        )?;
        Ok((self.backend.read(if_id, PHY_REG_FILE_ACCESS) & 0xffff) as u16)
    }

    /// Read a PHY register of every lane in `lanes`. Other slots read as 0.
    pub fn bus_read_all_lanes(
        &mut self,
        if_id: InterfaceId,
        lanes: LaneMask,
        bank: PhyBank,
        reg: u8,
    ) -> Result<[u16; MAX_LANES], Error> {
        let mut values = [0; MAX_LANES];
        for lane in lanes.iter() {
            values[lane.index()] = self.bus_read(if_id, lane, bank, reg)?;
        }
        Ok(values)
    }

    /// Read-modify-write of a PHY register of one lane on one or all interfaces.
    pub fn bus_read_modify_write(
        &mut self,
        access: Access,
        lane: LaneId,
        bank: PhyBank,
        reg: u8,
        value: u16,
        mask: u16,
    ) -> Result<(), Error> {
        for if_id in self.targets(access).iter() {
            let old = self.bus_read(if_id, lane, bank, reg)?;
            let new = (old & !mask) | (value & mask);
            self.bus_write(
                Access::Unicast(if_id),
                LaneAccess::Unicast(lane),
                bank,
                reg,
                new,
            )?;
        }
        Ok(())
    }

    pub fn dram_write(&mut self, if_id: InterfaceId, addr: u32, data: &[u32]) -> Result<(), Error> {
        self.backend.dram_write(if_id, addr, data)
    }

    pub fn dram_read(
        &mut self,
        if_id: InterfaceId,
        addr: u32,
        data: &mut [u32],
    ) -> Result<(), Error> {
        self.backend.dram_read(if_id, addr, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackend;

    fn access() -> RegisterAccess<SimBackend> {
        RegisterAccess::new(SimBackend::new(), InterfaceMask::new(0x1), 1000)
    }

    #[test]
    fn test_masked_write() {
        let mut acc = access();
        acc.if_write(Access::Multicast, 0x1400, 0xffff_ffff, MASK_ALL_BITS);
        acc.if_write(Access::Multicast, 0x1400, 0x0, 0xff00);
        assert_eq!(acc.if_read(InterfaceId::IF0, 0x1400, MASK_ALL_BITS), 0xffff_00ff);
        acc.write_field(Access::Multicast, mv_ddr::dunit::DFS_CL, 0x5).unwrap();
        assert_eq!(acc.read_field(InterfaceId::IF0, mv_ddr::dunit::DFS_CL), 0x5);
        assert!(acc.write_field(Access::Multicast, mv_ddr::dunit::DFS_CL, 0x10).is_err());
    }

    #[test]
    fn test_inactive_interface_untouched() {
        let mut acc = access();
        let if1 = InterfaceId::new(1).unwrap();
        acc.if_write(Access::Unicast(if1), 0x1400, 0x1234, MASK_ALL_BITS);
        assert_eq!(acc.backend().reg(if1, 0x1400), 0);
    }

    #[test]
    fn test_poll_timeout() {
        let mut acc = access();
        acc.if_write(Access::Multicast, 0x1500, 0x1, MASK_ALL_BITS);
        assert!(acc.poll(Access::Multicast, 0x1, 0x1, 0x1500, 10).is_ok());
        assert_eq!(
            acc.poll(Access::Multicast, 0x0, 0x1, 0x1500, 10),
            Err(Error::Timeout {
                if_id: InterfaceId::IF0,
                addr: 0x1500
            })
        );
    }

    #[test]
    fn test_phy_round_trip() {
        let mut acc = access();
        let lane = LaneId::new(2).unwrap();
        acc.bus_write(
            Access::Multicast,
            LaneAccess::Unicast(lane),
            PhyBank::Data,
            0xdb,
            0x3f,
        )
        .unwrap();
        assert_eq!(acc.bus_read(InterfaceId::IF0, lane, PhyBank::Data, 0xdb), Ok(0x3f));
        acc.bus_read_modify_write(Access::Multicast, lane, PhyBank::Data, 0xdb, 0x100, 0x100)
            .unwrap();
        assert_eq!(acc.bus_read(InterfaceId::IF0, lane, PhyBank::Data, 0xdb), Ok(0x13f));
        acc.bus_write(
            Access::Multicast,
            LaneAccess::Multicast,
            PhyBank::Control,
            0x90,
            0xc0,
        )
        .unwrap();
        let all = acc
            .bus_read_all_lanes(InterfaceId::IF0, LaneMask::new(0xf), PhyBank::Control, 0x90)
            .unwrap();
        assert_eq!(all, [0xc0, 0xc0, 0xc0, 0xc0, 0]);
    }

    #[test]
    fn test_phy_stuck_busy_times_out() {
        let mut acc = access();
        acc.backend().set_phy_stuck(true);
        let err = acc.bus_read(InterfaceId::IF0, LaneId::ECC, PhyBank::Data, 0x0);
        assert_eq!(
            err,
            Err(Error::Timeout {
                if_id: InterfaceId::IF0,
                addr: PHY_REG_FILE_ACCESS
            })
        );
    }
}
