// intc.rs — EE interrupt controller.
// INTC_STAT latches edge-triggered interrupt sources; INTC_MASK gates which
// of them assert the INT0 line into the EE COP0 cause register.

/// EE INTC interrupt sources.
#[derive(Clone, Copy, Debug)]
pub enum IntSource {
    Gs = 0,
    Sbus = 1,
    VblankStart = 2,
    VblankEnd = 3,
    Vif0 = 4,
    Vif1 = 5,
    Vu0 = 6,
    Vu1 = 7,
    Ipu = 8,
    Timer0 = 9,
    Timer1 = 10,
    Timer2 = 11,
    Timer3 = 12,
    Sfifo = 13,
    Vu0Watchdog = 14,
}

/// INTC_STAT / INTC_MASK pair at 0x1000F000 / 0x1000F010.
#[derive(Default)]
pub struct Intc {
    pub stat: u32,
    pub mask: u32,
}

impl Intc {
    pub fn read(&self, addr: u32) -> u32 {
        match (addr >> 4) & 0xf {
            0 => self.stat,
            _ => self.mask,
        }
    }

    /// Writing 1 to an INTC_STAT bit clears it; writing 1 to an INTC_MASK
    /// bit reverses it.
    pub fn write(&mut self, addr: u32, data: u32) {
        match (addr >> 4) & 0xf {
            0 => self.stat &= !data,
            _ => self.mask ^= data,
        }
        log::trace!("[INTC] write {:#x} -> {}", data, if addr & 0x10 == 0 { "STAT" } else { "MASK" });
    }

    pub fn trigger(&mut self, source: IntSource) {
        log::trace!("[INTC] triggering interrupt {:?}", source);
        self.stat |= 1 << source as u32;
    }

    /// Level of the INT0 line: any unmasked source latched.
    pub fn pending(&self) -> bool {
        self.stat & self.mask != 0
    }
}
