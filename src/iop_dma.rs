// iop_dma.rs — IOP DMA controller register file.
// Two groups of seven channels plus the DPCR/DICR control pairs. Channels
// accept programming from the IOP kernel; actual transfers are carried by
// the SIF paths on the EE side, so no data moves here.

const DICR_FORCE: u32 = 1 << 15;
const DICR_MASTER_ENABLE: u32 = 1 << 23;
const DICR_MASTER_FLAG: u32 = 1 << 31;

#[derive(Default, Clone, Copy)]
struct IopDmaChannel {
    madr: u32,
    bcr: u32,
    chcr: u32,
    tadr: u32,
}

#[derive(Default)]
pub struct IopDma {
    channels: [IopDmaChannel; 14],
    dpcr: u32,
    dpcr2: u32,
    dicr: u32,
    dicr2: u32,
}

impl IopDma {
    fn decode(addr: u32) -> (usize, u32, bool) {
        let group = (addr & 0x100) != 0;
        let channel = ((addr & 0x70) >> 4) as usize;
        let offset = (addr & 0xf) >> 2;
        (channel, offset, group)
    }

    pub fn read(&self, addr: u32) -> u32 {
        let (channel, offset, group) = Self::decode(addr);
        if channel < 7 {
            let ch = &self.channels[channel + 7 * group as usize];
            match offset {
                0 => ch.madr,
                1 => ch.bcr,
                2 => ch.chcr,
                _ => ch.tadr,
            }
        } else {
            match (offset, group) {
                (0, false) => self.dpcr,
                (0, true) => self.dpcr2,
                (1, false) => self.dicr,
                (1, true) => self.dicr2,
                _ => 0,
            }
        }
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        let (channel, offset, group) = Self::decode(addr);
        log::trace!("[IOP DMA] write {:#x} to channel {} offset {}", data, channel, offset);
        if channel < 7 {
            let ch = &mut self.channels[channel + 7 * group as usize];
            match offset {
                0 => ch.madr = data,
                1 => ch.bcr = data,
                2 => ch.chcr = data,
                _ => ch.tadr = data,
            }
        } else {
            match (offset, group) {
                (0, false) => self.dpcr = data,
                (0, true) => self.dpcr2 = data,
                (1, false) => {
                    self.dicr = data;
                    self.update_master_flag();
                }
                (1, true) => self.dicr2 = data,
                _ => {}
            }
        }
    }

    /// DICR bit 31 reflects force-interrupt or any enabled+flagged channel.
    fn update_master_flag(&mut self) {
        let enable = (self.dicr >> 16) & 0x7f;
        let flags = (self.dicr >> 24) & 0x7f;
        let master = self.dicr & DICR_FORCE != 0
            || (self.dicr & DICR_MASTER_ENABLE != 0 && (enable & flags) != 0);
        if master {
            self.dicr |= DICR_MASTER_FLAG;
        } else {
            self.dicr &= !DICR_MASTER_FLAG;
        }
    }
}
