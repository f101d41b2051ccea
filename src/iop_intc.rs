// iop_intc.rs — IOP interrupt controller (I_STAT / I_MASK / I_CTRL).
// Latched sources feed bit 2 of the IOP COP0 cause IP field; delivery is
// additionally gated by the status-register IEc and Im bits in the CPU.

/// IOP interrupt sources.
#[derive(Clone, Copy, Debug)]
pub enum IopInterrupt {
    VblankStart = 0,
    Gpu = 1,
    Cdvd = 2,
    Dma = 3,
    Timer0 = 4,
    Timer1 = 5,
    Timer2 = 6,
    Sio0 = 7,
    Sio1 = 8,
    Spu2 = 9,
    Pio = 10,
    VblankEnd = 11,
    Pcmcia = 13,
    Timer3 = 14,
    Timer4 = 15,
    Timer5 = 16,
    Sio2 = 17,
}

/// Register block at 0x1F801070..0x1F801078.
#[derive(Default)]
pub struct IopIntc {
    pub i_stat: u32,
    pub i_mask: u32,
    pub i_ctrl: u32,
}

impl IopIntc {
    pub fn read(&mut self, addr: u32) -> u32 {
        match (addr & 0xf) >> 2 {
            0 => self.i_stat,
            1 => self.i_mask,
            _ => {
                // Reading I_CTRL returns and clears it.
                let value = self.i_ctrl;
                self.i_ctrl = 0;
                value
            }
        }
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        match (addr & 0xf) >> 2 {
            // I_STAT writes acknowledge: only bits written as 1 survive.
            0 => self.i_stat &= data,
            1 => self.i_mask = data,
            _ => self.i_ctrl = data,
        }
    }

    pub fn trigger(&mut self, intr: IopInterrupt) {
        log::trace!("[IOP INTC] triggering {:?}", intr);
        self.i_stat |= 1 << intr as u32;
    }

    /// Raw pending level feeding cause.IP bit 2.
    pub fn pending(&self) -> bool {
        self.i_ctrl == 0 && (self.i_stat & self.i_mask) != 0
    }
}
