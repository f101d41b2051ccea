// sif.rs — Sub-CPU interface between the EE and the IOP.
// Six shared control registers plus the two word FIFOs that SIF0/SIF1 DMA
// drain and fill. The register block is visible from both CPUs: the EE maps
// it at 0x1000F200, the IOP at 0x1D000000.

use std::collections::VecDeque;

/// Which CPU performed the access; the CTRL register reacts differently.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SifSide {
    Iop,
    Ee,
}

#[derive(Default)]
pub struct Sif {
    pub mscom: u32,
    pub smcom: u32,
    pub msflg: u32,
    pub smflg: u32,
    pub ctrl: u32,
    pub bd6: u32,

    /// IOP -> EE packets, drained by the EE SIF0 DMA channel.
    pub sif0_fifo: VecDeque<u32>,
    /// EE -> IOP packets, filled by the EE SIF1 DMA channel.
    pub sif1_fifo: VecDeque<u32>,
}

impl Sif {
    fn side_of(addr: u32) -> SifSide {
        if (addr >> 9) & 1 != 0 {
            SifSide::Ee
        } else {
            SifSide::Iop
        }
    }

    pub fn read(&self, addr: u32) -> u32 {
        let offset = (addr >> 4) & 0xf;
        let value = match offset {
            0 => self.mscom,
            1 => self.smcom,
            2 => self.msflg,
            3 => self.smflg,
            4 => self.ctrl,
            _ => self.bd6,
        };
        log::trace!("[SIF][{:?}] read {:#x} from register {}", Self::side_of(addr), value, offset);
        value
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        let side = Self::side_of(addr);
        let offset = (addr >> 4) & 0xf;
        log::trace!("[SIF][{:?}] write {:#x} to register {}", side, data, offset);

        /* SIF_CTRL is not an ordinary register: each side manipulates a
        different group of bits, and the IOP protocol below matches what
        the BIOS expects to read back. */
        if offset == 4 {
            match side {
                SifSide::Iop => {
                    let temp = data & 0xf0;
                    if data & 0xa0 != 0 {
                        self.ctrl &= !0xf000;
                        self.ctrl |= 0x2000;
                    }
                    if self.ctrl & temp != 0 {
                        self.ctrl &= !temp;
                    } else {
                        self.ctrl |= temp;
                    }
                }
                SifSide::Ee => {
                    // Bit 8 works as an "EE ready" flag.
                    if data & 0x100 == 0 {
                        self.ctrl &= !0x100;
                    } else {
                        self.ctrl |= 0x100;
                    }
                }
            }
            return;
        }

        match offset {
            0 => self.mscom = data,
            1 => self.smcom = data,
            2 => self.msflg = data,
            3 => self.smflg = data,
            5 => {}
            _ => self.bd6 = data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EE_CTRL: u32 = 0x1000f240;
    const IOP_CTRL: u32 = 0x1d000040;

    #[test]
    fn ee_ready_bit() {
        let mut sif = Sif::default();
        sif.write(EE_CTRL, 0x100);
        assert_eq!(sif.ctrl & 0x100, 0x100);
        sif.write(EE_CTRL, 0);
        assert_eq!(sif.ctrl & 0x100, 0);
    }

    #[test]
    fn iop_ctrl_toggle_protocol() {
        let mut sif = Sif::default();
        // 0xA0 write forces bit 13 and toggles the 0xF0 group in.
        sif.write(IOP_CTRL, 0xa0);
        assert_eq!(sif.ctrl & 0x2000, 0x2000);
        assert_eq!(sif.ctrl & 0xa0, 0xa0);
        // Second write with the same group toggles it back off.
        sif.write(IOP_CTRL, 0xa0);
        assert_eq!(sif.ctrl & 0xf0, 0);
    }

    #[test]
    fn mailbox_registers_plain() {
        let mut sif = Sif::default();
        sif.write(0x1000f200, 0x1234_5678);
        assert_eq!(sif.read(0x1d000000), 0x1234_5678);
    }
}
