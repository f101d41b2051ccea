// bus.rs — physical memory fabric shared by the EE and the IOP.
// Fast regions (RAM, ROM, scratchpad, VU memory) are plain byte buffers hit
// directly; everything else goes through a page-indexed table of peripheral
// slots. Handlers self-decode the low address bits, so one slot entry per
// 128-byte page is enough.

use crate::dmac::Dmac;
use crate::gif::Gif;
use crate::gs::GraphicsSynthesizer;
use crate::intc::Intc;
use crate::iop_dma::IopDma;
use crate::iop_intc::IopIntc;
use crate::iop_timers::IopTimers;
use crate::sif::Sif;
use crate::sio2::Sio2;
use crate::timers::Timers;
use crate::vif::Vif;
use crate::vu::VectorUnit;

pub const RAM_SIZE: usize = 32 * 1024 * 1024;
pub const IOP_RAM_SIZE: usize = 2 * 1024 * 1024;
pub const BIOS_SIZE: usize = 4 * 1024 * 1024;
pub const SCRATCHPAD_SIZE: usize = 16 * 1024;

/// 512 MiB segment masks: KSEG0 strips the MSB, KSEG1 strips the top three,
/// KUSEG and KSEG2 pass through. The TLB is not modeled.
pub const KUSEG_MASKS: [u32; 8] = [
    0xffff_ffff,
    0xffff_ffff,
    0xffff_ffff,
    0xffff_ffff,
    0x7fff_ffff,
    0x1fff_ffff,
    0xffff_ffff,
    0xffff_ffff,
];

/// Which CPU issued the access, for diagnostics only.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusMaster {
    Ee,
    Iop,
}

/// Access widths supported by the fabric.
pub trait BusValue: bytemuck::Pod {
    const WIDTH: usize;
    fn from_qword(value: u128) -> Self;
    fn to_qword(self) -> u128;
}

macro_rules! bus_value {
    ($($ty:ty),*) => {
        $(impl BusValue for $ty {
            const WIDTH: usize = std::mem::size_of::<$ty>();
            #[inline]
            fn from_qword(value: u128) -> Self {
                value as $ty
            }
            #[inline]
            fn to_qword(self) -> u128 {
                self as u128
            }
        })*
    };
}

bus_value!(u8, u16, u32, u64, u128);

/// Peripheral identity owning a page of the MMIO window.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Slot {
    EeTimers,
    EeIntc,
    DmacChannel,
    DmacGlobal,
    DmacEnableRead,
    DmacEnableWrite,
    GifRegs,
    GifFifo,
    Vif0Regs,
    Vif1Regs,
    Vif0Fifo,
    Vif1Fifo,
    GsPriv,
    Sif,
    IopIntc,
    IopTimers,
    IopDma,
    Sio2,
    Spu,
}

const SLOT_COUNT: usize = 0x20000;
const PAGE_SIZE: usize = 128;

#[inline]
fn page_of(addr: u32) -> usize {
    let folded = ((addr & 0x0ff0_0000) >> 4) | (addr & 0x000f_ffff);
    folded as usize / PAGE_SIZE
}

#[inline]
fn read_mem<T: BusValue>(buf: &[u8], offset: usize) -> T {
    // Accesses straddling the end of a region clamp rather than fault.
    let offset = offset.min(buf.len() - T::WIDTH);
    bytemuck::pod_read_unaligned(&buf[offset..offset + T::WIDTH])
}

#[inline]
fn write_mem<T: BusValue>(buf: &mut [u8], offset: usize, value: T) {
    let offset = offset.min(buf.len() - T::WIDTH);
    buf[offset..offset + T::WIDTH].copy_from_slice(bytemuck::bytes_of(&value));
}

/// The motherboard: memories plus every peripheral both CPUs can reach.
pub struct Bus {
    pub ram: Box<[u8]>,
    pub iop_ram: Box<[u8]>,
    pub bios: Box<[u8]>,
    pub scratchpad: Box<[u8]>,

    pub dmac: Dmac,
    pub gif: Gif,
    pub gs: GraphicsSynthesizer,
    pub vif0: Vif,
    pub vif1: Vif,
    pub vu0: VectorUnit,
    pub vu1: VectorUnit,
    pub sif: Sif,
    pub sio2: Sio2,
    pub ee_intc: Intc,
    pub ee_timers: Timers,
    pub iop_intc: IopIntc,
    pub iop_timers: IopTimers,
    pub iop_dma: IopDma,

    /* RDRAM controller handshake state. */
    mch_ricm: u32,
    mch_drd: u32,
    rdram_sdevid: u8,

    /* SPU2 register backing; audio synthesis lives outside the core. */
    spu_regs: Box<[u8]>,

    /// Bytes written to the BIOS "KPutChar" port at 0x1000F180.
    pub console: Vec<u8>,

    slots: Box<[Option<Slot>]>,
}

impl Bus {
    pub fn new(bios: Box<[u8]>) -> Self {
        assert_eq!(bios.len(), BIOS_SIZE);
        let mut bus = Bus {
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
            iop_ram: vec![0; IOP_RAM_SIZE].into_boxed_slice(),
            bios,
            scratchpad: vec![0; SCRATCHPAD_SIZE].into_boxed_slice(),
            dmac: Dmac::new(),
            gif: Gif::new(),
            gs: GraphicsSynthesizer::new(),
            vif0: Vif::new(0),
            vif1: Vif::new(1),
            vu0: VectorUnit::new(),
            vu1: VectorUnit::new(),
            sif: Sif::default(),
            sio2: Sio2::default(),
            ee_intc: Intc::default(),
            ee_timers: Timers::default(),
            iop_intc: IopIntc::default(),
            iop_timers: IopTimers::default(),
            iop_dma: IopDma::default(),
            mch_ricm: 0,
            mch_drd: 0,
            rdram_sdevid: 0,
            spu_regs: vec![0; 0x800].into_boxed_slice(),
            console: Vec::new(),
            slots: vec![None; SLOT_COUNT].into_boxed_slice(),
        };
        bus.register_handlers();
        bus
    }

    /// Handlers are installed once at construction and never removed.
    fn register_handlers(&mut self) {
        let mut add = |addr: u32, slot: Slot| {
            self.slots[page_of(addr)] = Some(slot);
        };

        for addr in [0x1000_0000u32, 0x1000_0800, 0x1000_1000, 0x1000_1800] {
            add(addr, Slot::EeTimers);
        }
        add(0x1000_f000, Slot::EeIntc);

        // Each DMA channel bank spills into a second page for Dn_SADR.
        for addr in [
            0x1000_8000u32,
            0x1000_9000,
            0x1000_a000,
            0x1000_b000,
            0x1000_b400,
            0x1000_c000,
            0x1000_c400,
            0x1000_c800,
            0x1000_d000,
            0x1000_d400,
        ] {
            add(addr, Slot::DmacChannel);
            add(addr + 0x80, Slot::DmacChannel);
        }
        add(0x1000_e000, Slot::DmacGlobal);
        add(0x1000_f520, Slot::DmacEnableRead);
        add(0x1000_f590, Slot::DmacEnableWrite);

        add(0x1000_3000, Slot::GifRegs);
        add(0x1000_3080, Slot::GifRegs);
        add(0x1000_6000, Slot::GifFifo);

        add(0x1000_3800, Slot::Vif0Regs);
        add(0x1000_3880, Slot::Vif0Regs);
        add(0x1000_3c00, Slot::Vif1Regs);
        add(0x1000_3c80, Slot::Vif1Regs);
        add(0x1000_4000, Slot::Vif0Fifo);
        add(0x1000_5000, Slot::Vif1Fifo);

        for addr in [0x1200_0000u32, 0x1200_0080, 0x1200_1000] {
            add(addr, Slot::GsPriv);
        }

        add(0x1000_f200, Slot::Sif);
        add(0x1d00_0000, Slot::Sif);

        add(0x1f80_1070, Slot::IopIntc);
        add(0x1f80_1100, Slot::IopTimers);
        add(0x1f80_1480, Slot::IopTimers);
        add(0x1f80_1080, Slot::IopDma);
        add(0x1f80_1500, Slot::IopDma);
        add(0x1f80_8200, Slot::Sio2);

        // SPU2 core registers, 2 KiB worth of pages.
        let mut addr = 0x1f90_0000;
        while addr < 0x1f90_0800 {
            add(addr, Slot::Spu);
            addr += PAGE_SIZE as u32;
        }
    }

    /* ---- Scheduler entry points (field-split borrows) ---- */

    pub fn tick_dmac(&mut self, cycles: u32) {
        self.dmac.tick(cycles, &mut self.ram, &mut self.vif1, &mut self.gif, &mut self.sif);
    }

    pub fn tick_vif(&mut self, cycles: u32) {
        self.vif0.tick(cycles, &mut self.vu0, &mut self.gif);
        self.vif1.tick(cycles, &mut self.vu1, &mut self.gif);
    }

    pub fn tick_gif(&mut self, cycles: u32) {
        self.gif.tick(cycles, &mut self.gs);
    }

    pub fn tick_timers(&mut self, bus_cycles: u32, iop_cycles: u32) {
        self.ee_timers.tick(bus_cycles, &mut self.ee_intc);
        self.iop_timers.tick(iop_cycles, &mut self.iop_intc);
    }

    /* ---- Access paths ---- */

    pub fn read<T: BusValue>(&mut self, addr: u32, master: BusMaster) -> T {
        let paddr = addr & KUSEG_MASKS[(addr >> 29) as usize];

        // Fast regions first.
        match paddr {
            0x0000_0000..=0x01ff_ffff if master == BusMaster::Ee => {
                return read_mem(&self.ram, paddr as usize);
            }
            0x0000_0000..=0x001f_ffff if master == BusMaster::Iop => {
                return read_mem(&self.iop_ram, paddr as usize);
            }
            0x1c00_0000..=0x1c1f_ffff => {
                return read_mem(&self.iop_ram, (paddr - 0x1c00_0000) as usize);
            }
            0x1fc0_0000..=0x1fff_ffff => {
                return read_mem(&self.bios, (paddr - 0x1fc0_0000) as usize);
            }
            0x7000_0000..=0x7000_3fff => {
                return read_mem(&self.scratchpad, (paddr & 0x3fff) as usize);
            }
            0x1100_0000..=0x1100_ffff => {
                let (mem, offset) = self.vu_region(paddr);
                return read_mem(mem, offset);
            }
            _ => {}
        }

        // One-shot decodes that short-circuit the handler table.
        match paddr {
            0x1000_f130 | 0x1000_f400 | 0x1000_f410 => return T::from_qword(0),
            0x1000_f430 => return T::from_qword(0),
            0x1000_f440 => return T::from_qword(self.read_mch_ricm() as u128),
            0x1f80_1450 | 0x1f80_1578 | 0xfffe_0130 => return T::from_qword(0),
            _ => {}
        }

        match self.slots[page_of(paddr)] {
            Some(slot) => T::from_qword(self.slot_read(slot, paddr)),
            None => {
                log::warn!(
                    "[{:?}] {}bit read from unknown address {:#010x}",
                    master,
                    T::WIDTH * 8,
                    paddr
                );
                T::from_qword(0)
            }
        }
    }

    pub fn write<T: BusValue>(&mut self, addr: u32, value: T, master: BusMaster) {
        let paddr = addr & KUSEG_MASKS[(addr >> 29) as usize];

        match paddr {
            0x0000_0000..=0x01ff_ffff if master == BusMaster::Ee => {
                return write_mem(&mut self.ram, paddr as usize, value);
            }
            0x0000_0000..=0x001f_ffff if master == BusMaster::Iop => {
                return write_mem(&mut self.iop_ram, paddr as usize, value);
            }
            0x1c00_0000..=0x1c1f_ffff => {
                return write_mem(&mut self.iop_ram, (paddr - 0x1c00_0000) as usize, value);
            }
            0x1fc0_0000..=0x1fff_ffff => {
                log::warn!("[{:?}] write to boot ROM at {:#010x} dropped", master, paddr);
                return;
            }
            0x7000_0000..=0x7000_3fff => {
                return write_mem(&mut self.scratchpad, (paddr & 0x3fff) as usize, value);
            }
            0x1100_0000..=0x1100_ffff => {
                let (mem, offset) = self.vu_region_mut(paddr);
                return write_mem(mem, offset, value);
            }
            _ => {}
        }

        let qword = value.to_qword();
        match paddr {
            0x1000_f180 => {
                // Host console: the BIOS prints one byte at a time.
                self.console.push(qword as u8);
                return;
            }
            0x1000_f430 => {
                self.write_mch_ricm(qword as u32);
                return;
            }
            0x1000_f440 => {
                self.mch_drd = qword as u32;
                return;
            }
            // Known-noisy addresses with no modeled function.
            0x1000_f100 | 0x1000_f140 | 0x1000_f150 | 0x1000_f400 | 0x1000_f410
            | 0x1000_f420 | 0x1000_f450 | 0x1000_f460 | 0x1000_f480 | 0x1000_f490
            | 0x1000_f500 | 0x1000_f510 | 0x1f80_1578 | 0xfffe_0130 => return,
            _ => {}
        }

        match self.slots[page_of(paddr)] {
            Some(slot) => self.slot_write::<T>(slot, paddr, qword),
            None => {
                log::warn!(
                    "[{:?}] {}bit write {:#x} to unknown address {:#010x}",
                    master,
                    T::WIDTH * 8,
                    qword,
                    paddr
                );
            }
        }
    }

    /// VU memory window: code then data for VU0, then VU1, 16 KiB each.
    fn vu_region(&self, paddr: u32) -> (&[u8], usize) {
        let offset = (paddr & 0x3fff) as usize;
        match (paddr >> 14) & 0x3 {
            0 => (&self.vu0.code[..], offset),
            1 => (&self.vu0.data[..], offset),
            2 => (&self.vu1.code[..], offset),
            _ => (&self.vu1.data[..], offset),
        }
    }

    fn vu_region_mut(&mut self, paddr: u32) -> (&mut [u8], usize) {
        let offset = (paddr & 0x3fff) as usize;
        match (paddr >> 14) & 0x3 {
            0 => (&mut self.vu0.code[..], offset),
            1 => (&mut self.vu0.data[..], offset),
            2 => (&mut self.vu1.code[..], offset),
            _ => (&mut self.vu1.data[..], offset),
        }
    }

    /// RDRAM initialization handshake: the BIOS polls for device ids.
    fn read_mch_ricm(&mut self) -> u32 {
        let sop = (self.mch_ricm >> 6) & 0xf;
        let sa = (self.mch_ricm >> 16) & 0xfff;
        if sop != 0 {
            return 0;
        }
        match sa {
            0x21 => {
                if self.rdram_sdevid < 2 {
                    self.rdram_sdevid += 1;
                    0x1f
                } else {
                    0
                }
            }
            0x23 => 0x0d0d,
            0x24 => 0x0090,
            0x40 => self.mch_ricm & 0x1f,
            _ => 0,
        }
    }

    fn write_mch_ricm(&mut self, data: u32) {
        let sa = (data >> 16) & 0xfff;
        let sbc = (data >> 6) & 0xf;
        if sa == 0x21 && sbc == 0x1 && (self.mch_drd >> 7) & 1 == 0 {
            self.rdram_sdevid = 0;
        }
        self.mch_ricm = data & !0x8000_0000;
    }

    fn slot_read(&mut self, slot: Slot, addr: u32) -> u128 {
        match slot {
            Slot::EeTimers => self.ee_timers.read(addr) as u128,
            Slot::EeIntc => self.ee_intc.read(addr) as u128,
            Slot::DmacChannel => self.dmac.read_channel(addr) as u128,
            Slot::DmacGlobal => self.dmac.read_global(addr) as u128,
            Slot::DmacEnableRead | Slot::DmacEnableWrite => self.dmac.read_enable() as u128,
            Slot::GifRegs => self.gif.read(addr) as u128,
            Slot::Vif0Regs => self.vif0.read(addr) as u128,
            Slot::Vif1Regs => self.vif1.read(addr) as u128,
            Slot::GsPriv => self.gs.read_priv(addr) as u128,
            Slot::Sif => self.sif.read(addr) as u128,
            Slot::IopIntc if addr & 0xf0 == 0x70 => self.iop_intc.read(addr) as u128,
            Slot::IopTimers => self.iop_timers.read(addr) as u128,
            Slot::IopDma => self.iop_dma.read(addr) as u128,
            Slot::Sio2 => self.sio2.read(addr) as u128,
            Slot::Spu => {
                read_mem::<u16>(&self.spu_regs, (addr & 0x7fe) as usize) as u128
            }
            Slot::GifFifo | Slot::Vif0Fifo | Slot::Vif1Fifo | Slot::IopIntc => {
                log::warn!("[BUS] unsupported read from {:?} at {:#010x}", slot, addr);
                0
            }
        }
    }

    fn slot_write<T: BusValue>(&mut self, slot: Slot, addr: u32, qword: u128) {
        let word = qword as u32;
        match slot {
            Slot::EeTimers => self.ee_timers.write(addr, word),
            Slot::EeIntc => self.ee_intc.write(addr, word),
            Slot::DmacChannel => self.dmac.write_channel(addr, word),
            Slot::DmacGlobal => self.dmac.write_global(addr, word),
            Slot::DmacEnableWrite | Slot::DmacEnableRead => self.dmac.write_enable(word),
            Slot::GifRegs => self.gif.write(addr, word),
            Slot::GifFifo => {
                if !self.gif.push_qword(qword) {
                    log::warn!("[GIF] FIFO overrun on direct write");
                }
            }
            Slot::Vif0Regs => self.vif0.write(addr, word),
            Slot::Vif1Regs => self.vif1.write(addr, word),
            Slot::Vif0Fifo | Slot::Vif1Fifo => {
                let vif = if slot == Slot::Vif0Fifo { &mut self.vif0 } else { &mut self.vif1 };
                let accepted = match T::WIDTH {
                    16 => vif.write_fifo_qword(qword),
                    8 => vif.write_fifo_dword(qword as u64),
                    _ => vif.fifo.push_word(word),
                };
                if !accepted {
                    log::warn!("[VIF] FIFO overrun on direct write");
                }
            }
            Slot::GsPriv => self.gs.write_priv(addr, qword as u64),
            Slot::Sif => self.sif.write(addr, word),
            Slot::IopIntc if addr & 0xf0 == 0x70 => self.iop_intc.write(addr, word),
            Slot::IopTimers => self.iop_timers.write(addr, word),
            Slot::IopDma => self.iop_dma.write(addr, word),
            Slot::Sio2 => {
                // SIO2 control can raise the completion interrupt.
                let Bus { sio2, iop_intc, .. } = self;
                sio2.write(addr, word, iop_intc);
            }
            Slot::Spu => {
                write_mem::<u16>(&mut self.spu_regs, (addr & 0x7fe) as usize, qword as u16);
            }
            Slot::IopIntc => {
                log::warn!("[BUS] stray write {:#x} near IOP INTC at {:#010x}", qword, addr);
            }
        }
    }

    /// Drain the captured BIOS console output.
    pub fn take_console(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.console)
    }
}
