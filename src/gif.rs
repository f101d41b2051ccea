// gif.rs — Graphics Interface: GIFtag decode and GS register dispatch.
// Qwords arrive through PATH3 (DMA channel 2) or PATH2 (VIF DIRECT); the
// GIF peels a GIFtag off the stream and translates the payload into GS
// register writes according to the tag's data format.

use crate::gs::GraphicsSynthesizer;
use std::collections::VecDeque;

/// Input FIFO depth in qwords.
const FIFO_DEPTH: usize = 64;

/// GIFtag data formats.
const FLG_PACKED: u32 = 0;
const FLG_REGLIST: u32 = 1;
const FLG_IMAGE: u32 = 2;
const FLG_DISABLE: u32 = 3;

/// PACKED register descriptors.
const DESC_PRIM: u64 = 0x0;
const DESC_RGBAQ: u64 = 0x1;
const DESC_ST: u64 = 0x2;
const DESC_UV: u64 = 0x3;
const DESC_XYZF2: u64 = 0x4;
const DESC_XYZ2: u64 = 0x5;
const DESC_FOG: u64 = 0xa;
const DESC_XYZF3: u64 = 0xc;
const DESC_XYZ3: u64 = 0xd;
const DESC_A_D: u64 = 0xe;
const DESC_NOP: u64 = 0xf;

const CTRL_RESET: u32 = 1 << 0;

/// The decoded header of the primitive currently streaming through.
#[derive(Default, Clone, Copy)]
struct GifTag {
    nloop: u32,
    eop: bool,
    pre: bool,
    prim: u16,
    flg: u32,
    nreg: u32,
    regs: u64,
}

impl GifTag {
    fn decode(qword: u128) -> Self {
        let nreg = ((qword >> 60) & 0xf) as u32;
        GifTag {
            nloop: (qword & 0x7fff) as u32,
            eop: qword & (1 << 15) != 0,
            pre: qword & (1 << 46) != 0,
            prim: ((qword >> 47) & 0x7ff) as u16,
            flg: ((qword >> 58) & 0x3) as u32,
            nreg: if nreg == 0 { 16 } else { nreg },
            regs: (qword >> 64) as u64,
        }
    }

    /// Descriptor nibble for the `index`th register of a loop iteration.
    fn descriptor(&self, index: u32) -> u64 {
        (self.regs >> (4 * index)) & 0xf
    }
}

pub struct Gif {
    control: u32,
    mode: u32,
    fifo: VecDeque<u128>,

    tag: GifTag,
    /// Loop iterations left for the current tag.
    data_count: u32,
    /// Registers left in the current loop iteration.
    reg_count: u32,
    /// Q value latched by the last ST write, consumed by RGBAQ packing.
    internal_q: u32,
}

impl Gif {
    pub fn new() -> Self {
        Gif {
            control: 0,
            mode: 0,
            fifo: VecDeque::with_capacity(FIFO_DEPTH),
            tag: GifTag::default(),
            data_count: 0,
            reg_count: 0,
            internal_q: 0,
        }
    }

    pub fn reset(&mut self) {
        self.control = 0;
        self.mode = 0;
        self.fifo.clear();
        self.tag = GifTag::default();
        self.data_count = 0;
        self.reg_count = 0;
        self.internal_q = 0;
    }

    /// MMIO register read at 0x10003000.
    pub fn read(&self, addr: u32) -> u32 {
        match (addr & 0xf0) >> 4 {
            // GIF_STAT: report FIFO occupancy in bits 24..28.
            2 => (self.fifo.len() as u32) << 24,
            offset => {
                log::warn!("[GIF] read from unknown register {}", offset);
                0
            }
        }
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        match (addr & 0xf0) >> 4 {
            0 => {
                self.control = data;
                if data & CTRL_RESET != 0 {
                    self.reset();
                }
            }
            1 => self.mode = data,
            offset => log::warn!("[GIF] write {:#x} to unknown register {}", data, offset),
        }
    }

    /// Qword entry from PATH3 (DMA) or PATH2 (VIF DIRECT). `false` = full.
    #[must_use]
    pub fn push_qword(&mut self, qword: u128) -> bool {
        if self.fifo.len() >= FIFO_DEPTH {
            return false;
        }
        self.fifo.push_back(qword);
        true
    }

    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    /// Drain up to `cycles` qwords into the GS.
    pub fn tick(&mut self, mut cycles: u32, gs: &mut GraphicsSynthesizer) {
        while !self.fifo.is_empty() && cycles > 0 {
            cycles -= 1;
            if self.data_count == 0 {
                self.process_tag(gs);
            } else {
                self.execute_command(gs);
            }
        }
    }

    fn process_tag(&mut self, gs: &mut GraphicsSynthesizer) {
        let qword = self.fifo.pop_front().unwrap();
        self.tag = GifTag::decode(qword);
        self.data_count = self.tag.nloop;
        self.reg_count = self.tag.nreg;

        log::trace!(
            "[GIF] tag nloop={} flg={} nreg={} eop={}",
            self.tag.nloop,
            self.tag.flg,
            self.tag.nreg,
            self.tag.eop
        );
        // TODO: eop is decoded but not enforced; qwords following an eop=1
        // primitive are treated as the next tag either way.

        // PRE loads the PRIM field ahead of the payload.
        if self.tag.pre {
            gs.write(0x0, (self.tag.prim & 0x7ff) as u64);
        }

        // Q resets to 1.0 on every tag.
        self.internal_q = 1.0f32.to_bits();
        gs.regs.rgbaq =
            (gs.regs.rgbaq & 0xffff_ffff) | ((self.internal_q as u64) << 32);
    }

    fn execute_command(&mut self, gs: &mut GraphicsSynthesizer) {
        let qword = self.fifo.pop_front().unwrap();
        match self.tag.flg {
            FLG_PACKED => {
                self.process_packed(qword, gs);
                if self.reg_count == 0 {
                    self.data_count -= 1;
                    self.reg_count = self.tag.nreg;
                }
            }
            FLG_REGLIST => {
                // Two register writes per qword; an odd trailing half is
                // discarded when the loop ends mid-qword.
                for half in 0..2 {
                    if self.data_count == 0 {
                        break;
                    }
                    let data = (qword >> (64 * half)) as u64;
                    let desc = self.tag.descriptor(self.tag.nreg - self.reg_count);
                    if desc < DESC_A_D {
                        gs.write(desc as u16, data);
                    }
                    self.reg_count -= 1;
                    if self.reg_count == 0 {
                        self.data_count -= 1;
                        self.reg_count = self.tag.nreg;
                    }
                }
            }
            FLG_IMAGE => {
                gs.write_hwreg(qword as u64);
                gs.write_hwreg((qword >> 64) as u64);
                self.data_count -= 1;
            }
            FLG_DISABLE => {
                self.data_count -= 1;
            }
            _ => unreachable!(),
        }
    }

    /// One PACKED-mode qword: expand the descriptor format into a GS write.
    fn process_packed(&mut self, qword: u128, gs: &mut GraphicsSynthesizer) {
        let desc = self.tag.descriptor(self.tag.nreg - self.reg_count);
        match desc {
            DESC_PRIM => {
                gs.write(0x0, (qword & 0x7ff) as u64);
            }
            DESC_RGBAQ => {
                let r = qword & 0xff;
                let g = (qword >> 32) & 0xff;
                let b = (qword >> 64) & 0xff;
                let a = (qword >> 96) & 0xff;
                let value = (r | g << 8 | b << 16 | a << 24) as u64
                    | ((self.internal_q as u64) << 32);
                gs.write(0x1, value);
            }
            DESC_ST => {
                gs.write(0x2, qword as u64);
                self.internal_q = (qword >> 64) as u32;
            }
            DESC_UV => {
                let u = qword & 0x3fff;
                let v = (qword >> 32) & 0x3fff;
                gs.write(0x3, (u | v << 16) as u64);
            }
            DESC_XYZF2 | DESC_XYZF3 => {
                let disable_draw = (qword >> 111) & 1 != 0;
                let addr = if desc == DESC_XYZF3 || disable_draw { 0xc } else { 0x4 };

                let x = qword & 0xffff;
                let y = (qword >> 32) & 0xffff;
                let z = (qword >> 68) & 0xff_ffff;
                let f = (qword >> 100) & 0xff;
                let value = (x | y << 16) as u64 | ((z as u64) << 32) | ((f as u64) << 56);
                gs.write(addr, value);
            }
            DESC_XYZ2 | DESC_XYZ3 => {
                let disable_draw = (qword >> 111) & 1 != 0;
                let addr = if desc == DESC_XYZ3 || disable_draw { 0xd } else { 0x5 };

                let x = qword & 0xffff;
                let y = (qword >> 32) & 0xffff;
                let z = (qword >> 64) & 0xffff_ffff;
                let value = (x | y << 16) as u64 | ((z as u64) << 32);
                gs.write(addr, value);
            }
            DESC_FOG => {
                let f = (qword >> 100) & 0xff;
                gs.write(0xa, (f as u64) << 56);
            }
            DESC_A_D => {
                let addr = ((qword >> 64) & 0xff) as u16;
                gs.write(addr, qword as u64);
            }
            DESC_NOP => {}
            // TEX0/CLAMP descriptors carry the register value verbatim.
            0x6..=0x9 => {
                gs.write(desc as u16, qword as u64);
            }
            _ => panic!("[GIF] unknown register descriptor {:#x}", desc),
        }

        self.reg_count -= 1;
    }
}
