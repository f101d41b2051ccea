// vif.rs — VIF0/VIF1 command stream decoder.
// Consumes VIFcodes from the FIFO one 32-bit word at a time, unpacks data
// formats into VU memory and forwards DIRECT qwords to the GIF (PATH2).
// The two VIFs share nearly all behavior, so a single type carries both and
// the VIF1-only registers simply stay zero on VIF0.

use crate::fifo::WordFifo;
use crate::gif::Gif;
use crate::vu::VectorUnit;

/// FIFO capacity in words (64 qwords).
const FIFO_WORDS: usize = 256;

/// VIFcode command values.
const CMD_NOP: u32 = 0x00;
const CMD_STCYCL: u32 = 0x01;
const CMD_OFFSET: u32 = 0x02;
const CMD_BASE: u32 = 0x03;
const CMD_ITOP: u32 = 0x04;
const CMD_STMOD: u32 = 0x05;
const CMD_MSKPATH3: u32 = 0x06;
const CMD_MARK: u32 = 0x07;
const CMD_FLUSHE: u32 = 0x10;
const CMD_FLUSH: u32 = 0x11;
const CMD_FLUSHA: u32 = 0x13;
const CMD_MSCAL: u32 = 0x14;
const CMD_MSCALF: u32 = 0x15;
const CMD_MSCNT: u32 = 0x17;
const CMD_STMASK: u32 = 0x20;
const CMD_STROW: u32 = 0x30;
const CMD_STCOL: u32 = 0x31;
const CMD_MPG: u32 = 0x4a;
const CMD_DIRECT: u32 = 0x50;
const CMD_DIRECTHL: u32 = 0x51;
const CMD_UNPACK_FIRST: u32 = 0x60;
const CMD_UNPACK_LAST: u32 = 0x7f;

/// Address writes advance in Skipping mode (CL >= WL) or Filling (CL < WL).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WriteMode {
    Skipping,
    Filling,
}

/// The VIFcode whose payload is currently being consumed.
#[derive(Default, Clone, Copy)]
struct VifCommand {
    cmd: u32,
    num: u32,
    imm: u16,
}

impl VifCommand {
    fn decode(word: u32) -> Self {
        VifCommand {
            // Bit 7 of the command byte is the interrupt request flag.
            cmd: (word >> 24) & 0x7f,
            num: (word >> 16) & 0xff,
            imm: word as u16,
        }
    }

    fn is_unpack(&self) -> bool {
        (CMD_UNPACK_FIRST..=CMD_UNPACK_LAST).contains(&self.cmd)
    }

    /// UNPACK element width selector (VL) and element count - 1 (VN).
    fn vl(&self) -> u32 {
        self.cmd & 0x3
    }

    fn vn(&self) -> u32 {
        (self.cmd >> 2) & 0x3
    }

    fn mask_enabled(&self) -> bool {
        self.cmd & 0x10 != 0
    }

    /// UNPACK address in qwords (imm bits 0..9), usn flag, tops flag.
    fn unpack_addr(&self) -> u32 {
        (self.imm & 0x3ff) as u32
    }

    fn unsigned_mode(&self) -> bool {
        self.imm & (1 << 14) != 0
    }

    fn tops_relative(&self) -> bool {
        self.imm & (1 << 15) != 0
    }
}

pub struct Vif {
    id: usize,
    pub fifo: WordFifo,

    /* Register block. */
    fbrst: u32,
    err: u32,
    mark: u32,
    cl: u32,
    wl: u32,
    mode: u32,
    mask: u32,
    /* VIF1 only. */
    base: u32,
    ofst: u32,
    tops: u32,
    itop: u32,
    top: u32,
    dbf: bool,
    row: [u32; 4],
    col: [u32; 4],

    /* Payload consumption state. */
    command: VifCommand,
    subpacket_count: u32,
    address: u32,
    write_mode: WriteMode,
    /// Outputs still owed by the active UNPACK.
    unpack_remaining: u32,
    /// Input bytes per output qword for the active UNPACK.
    unpack_stride: usize,
    unpack_buf: Vec<u8>,
    /// Position within the current CL/WL write cycle.
    cycle_pos: u32,
    word_budget: u32,
}

impl Vif {
    pub fn new(id: usize) -> Self {
        Vif {
            id,
            fifo: WordFifo::with_capacity(FIFO_WORDS),
            fbrst: 0,
            err: 0,
            mark: 0,
            cl: 0,
            wl: 0,
            mode: 0,
            mask: 0,
            base: 0,
            ofst: 0,
            tops: 0,
            itop: 0,
            top: 0,
            dbf: false,
            row: [0; 4],
            col: [0; 4],
            command: VifCommand::default(),
            subpacket_count: 0,
            address: 0,
            write_mode: WriteMode::Skipping,
            unpack_remaining: 0,
            unpack_stride: 0,
            unpack_buf: Vec::with_capacity(16),
            cycle_pos: 0,
            word_budget: 0,
        }
    }

    pub fn reset(&mut self) {
        let id = self.id;
        *self = Vif::new(id);
    }

    /// MMIO register read at 0x10003800 (VIF0) / 0x10003C00 (VIF1).
    pub fn read(&self, addr: u32) -> u32 {
        match (addr >> 4) & 0xf {
            0 => (self.fifo.qword_len() as u32) << 24, // VIFn_STAT
            1 => self.fbrst,
            2 => self.err,
            3 => self.mark,
            4 => self.wl << 8 | self.cl,
            5 => self.mode,
            6 => self.unpack_remaining,
            7 => self.mask,
            offset => {
                log::warn!("[VIF{}] read from unknown register {}", self.id, offset);
                0
            }
        }
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        match (addr >> 4) & 0xf {
            0 => {} // only the FDR bit of STAT is writable; unused here
            1 => {
                self.fbrst = data;
                if data & 0x1 != 0 {
                    log::debug!("[VIF{}] reset via FBRST", self.id);
                    self.reset();
                }
            }
            2 => self.err = data,
            3 => self.mark = data,
            offset => {
                log::warn!("[VIF{}] write {:#x} to unknown register {}", self.id, data, offset);
            }
        }
    }

    #[must_use]
    pub fn write_fifo_qword(&mut self, qword: u128) -> bool {
        self.fifo.push_qword(qword)
    }

    #[must_use]
    pub fn write_fifo_dword(&mut self, dword: u64) -> bool {
        self.fifo.push_dword(dword)
    }

    /// ITOP latched for the VU on MSCAL.
    pub fn itop(&self) -> u32 {
        self.itop
    }

    pub fn top(&self) -> u32 {
        self.top
    }

    /// Advance the stream: up to `cycles * 4` words per scheduler tick.
    pub fn tick(&mut self, cycles: u32, vu: &mut VectorUnit, gif: &mut Gif) {
        self.word_budget = cycles.saturating_mul(4);
        while !self.fifo.is_empty() && self.word_budget > 0 {
            self.word_budget -= 1;
            if self.subpacket_count == 0 {
                self.process_command(vu);
            } else if !self.execute_command(vu, gif) {
                break; // stalled on PATH2 back-pressure
            }
        }
    }

    /// Decode one VIFcode from the stream.
    fn process_command(&mut self, vu: &mut VectorUnit) {
        let word = self.fifo.pop_word().unwrap();
        let command = VifCommand::decode(word);
        let imm = command.imm as u32;

        if command.is_unpack() {
            self.command = command;
            self.process_unpack();
            return;
        }

        match command.cmd {
            CMD_NOP => {}
            CMD_STCYCL => {
                self.cl = imm & 0xff;
                self.wl = (imm >> 8) & 0xff;
                log::trace!("[VIF{}] STCYCL CL={} WL={}", self.id, self.cl, self.wl);
            }
            CMD_OFFSET => {
                self.ofst = imm & 0x3ff;
                self.dbf = false;
                self.tops = self.base;
            }
            CMD_BASE => self.base = imm & 0x3ff,
            CMD_ITOP => self.itop = imm & 0x3ff,
            CMD_STMOD => self.mode = imm & 0x3,
            CMD_MSKPATH3 => {
                log::trace!("[VIF{}] MSKPATH3 {:#x}", self.id, imm);
            }
            CMD_MARK => {
                self.mark = imm;
            }
            CMD_FLUSHE | CMD_FLUSH | CMD_FLUSHA => {
                // The core runs the units synchronously; nothing to wait on.
            }
            CMD_MSCAL | CMD_MSCALF => {
                vu.mscal_request = Some(imm * 8);
                self.rotate_double_buffer();
            }
            CMD_MSCNT => {
                vu.mscal_request = Some(vu.mscal_request.unwrap_or(0));
                self.rotate_double_buffer();
            }
            CMD_STMASK => self.subpacket_count = 1,
            CMD_STROW | CMD_STCOL => self.subpacket_count = 4,
            CMD_MPG => {
                // NUM counts 64-bit VU instructions; zero means 256.
                let num = if command.num != 0 { command.num } else { 256 };
                self.subpacket_count = num * 2;
                self.address = imm * 8;
                self.command = command;
                log::trace!("[VIF{}] MPG {} words to {:#x}", self.id, self.subpacket_count, self.address);
            }
            CMD_DIRECT | CMD_DIRECTHL => {
                // Immediate counts qwords; zero means 65536.
                let qwords = if imm != 0 { imm } else { 0x10000 };
                self.subpacket_count = qwords * 4;
                self.command = command;
            }
            cmd => panic!("[VIF{}] unknown VIF command {:#x}", self.id, cmd),
        }

        if self.subpacket_count > 0 {
            self.command = command;
        }
    }

    /// MSCAL swaps the double-buffer bases for the next batch.
    fn rotate_double_buffer(&mut self) {
        self.top = self.tops;
        self.tops = self.base + if self.dbf { self.ofst } else { 0 };
        self.dbf = !self.dbf;
    }

    /// Consume one payload word (or a DIRECT qword). Returns false on stall.
    fn execute_command(&mut self, vu: &mut VectorUnit, gif: &mut Gif) -> bool {
        if self.command.cmd == CMD_DIRECT || self.command.cmd == CMD_DIRECTHL {
            // PATH2 moves whole qwords; respect GIF back-pressure.
            let Some(qword) = self.fifo.peek_qword() else {
                return false;
            };
            if !gif.push_qword(qword) {
                return false;
            }
            let _ = self.fifo.pop_qword();
            self.subpacket_count -= 4;
            self.word_budget = self.word_budget.saturating_sub(3);
            return true;
        }

        if self.command.is_unpack() {
            self.unpack_word(vu);
            return true;
        }

        let word = self.fifo.pop_word().unwrap();
        match self.command.cmd {
            CMD_STMASK => {
                self.mask = word;
            }
            CMD_STROW => {
                self.row[(4 - self.subpacket_count) as usize] = word;
            }
            CMD_STCOL => {
                self.col[(4 - self.subpacket_count) as usize] = word;
            }
            CMD_MPG => {
                vu.write_code_word(self.address, word);
                self.address += 4;
            }
            cmd => panic!("[VIF{}] payload for unexpected command {:#x}", self.id, cmd),
        }
        self.subpacket_count -= 1;
        true
    }

    /// Set up an UNPACK transfer from the decoded command.
    fn process_unpack(&mut self) {
        let command = self.command;
        let num = if command.num != 0 { command.num } else { 256 };

        // Input bytes consumed per output qword. V4-5 packs four elements
        // into one 16-bit read; everything else is byte-aligned.
        let stride = if command.cmd & 0xf == 0xf {
            2
        } else {
            let elem_bytes = (4 >> command.vl()) as usize;
            (command.vn() as usize + 1) * elem_bytes
        };

        self.unpack_stride = stride;
        self.unpack_remaining = num;
        self.unpack_buf.clear();
        self.cycle_pos = 0;
        // Payload is padded to a word boundary.
        self.subpacket_count = ((num as usize * stride + 3) / 4) as u32;

        self.address = command.unpack_addr() * 16;
        if command.tops_relative() {
            self.address += self.tops * 16;
        }
        self.write_mode =
            if self.cl >= self.wl { WriteMode::Skipping } else { WriteMode::Filling };

        log::trace!(
            "[VIF{}] UNPACK cmd={:#x} num={} stride={} addr={:#x}",
            self.id,
            command.cmd,
            num,
            stride,
            self.address
        );
    }

    /// Feed one input word into the active UNPACK.
    fn unpack_word(&mut self, vu: &mut VectorUnit) {
        let word = self.fifo.pop_word().unwrap();
        self.unpack_buf.extend_from_slice(&word.to_le_bytes());
        self.subpacket_count -= 1;

        while self.unpack_remaining > 0 && self.unpack_buf.len() >= self.unpack_stride {
            let elements = self.decode_elements();
            self.unpack_buf.drain(..self.unpack_stride);
            self.write_unpacked(elements, vu);
            self.unpack_remaining -= 1;

            if self.unpack_remaining == 0 {
                // Anything left in subpacket_count is word-alignment padding.
                self.unpack_buf.clear();
            }
        }
    }

    /// Pull one output's worth of elements from the input buffer.
    fn decode_elements(&self) -> [u32; 4] {
        let command = self.command;
        let buf = &self.unpack_buf;

        // V4-5: RGB5A1 expansion of a single halfword.
        if command.cmd & 0xf == 0xf {
            let v = u16::from_le_bytes([buf[0], buf[1]]) as u32;
            return [
                (v & 0x1f) << 3,
                ((v >> 5) & 0x1f) << 3,
                ((v >> 10) & 0x1f) << 3,
                ((v >> 15) & 0x1) << 7,
            ];
        }

        let count = command.vn() as usize + 1;
        let elem_bytes = (4 >> command.vl()) as usize;
        let unsigned = command.unsigned_mode();

        let mut elements = [0u32; 4];
        for (i, element) in elements.iter_mut().take(count).enumerate() {
            let off = i * elem_bytes;
            *element = match elem_bytes {
                4 => u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()),
                2 => {
                    let v = u16::from_le_bytes(buf[off..off + 2].try_into().unwrap());
                    if unsigned {
                        v as u32
                    } else {
                        v as i16 as i32 as u32
                    }
                }
                _ => {
                    let v = buf[off];
                    if unsigned {
                        v as u32
                    } else {
                        v as i8 as i32 as u32
                    }
                }
            };
        }

        // S formats replicate the scalar into every lane.
        if count == 1 {
            elements = [elements[0]; 4];
        }
        elements
    }

    /// Apply STMASK/STMOD and store one qword into VU data memory.
    fn write_unpacked(&mut self, elements: [u32; 4], vu: &mut VectorUnit) {
        let masked = self.command.mask_enabled();
        let mask_row = self.cycle_pos.min(3);

        let mut lanes = [0u32; 4];
        let existing = vu.read_data_qword(self.address);
        for i in 0..4 {
            let code = if masked { (self.mask >> (i as u32 * 2 + mask_row * 8)) & 0x3 } else { 0 };
            lanes[i] = match code {
                0 => self.apply_mode(i, elements[i]),
                1 => self.row[i],
                2 => self.col[mask_row as usize],
                // Write-protected lane keeps the memory contents.
                _ => (existing >> (32 * i)) as u32,
            };
        }

        let qword = (lanes[0] as u128)
            | (lanes[1] as u128) << 32
            | (lanes[2] as u128) << 64
            | (lanes[3] as u128) << 96;
        vu.write_data_qword(self.address, qword);
        self.address += 16;
        self.advance_cycle(vu);
    }

    /// STMOD offset/difference modes add the row register to data lanes.
    fn apply_mode(&mut self, lane: usize, value: u32) -> u32 {
        match self.mode {
            1 => value.wrapping_add(self.row[lane]),
            2 => {
                let result = value.wrapping_add(self.row[lane]);
                self.row[lane] = result;
                result
            }
            _ => value,
        }
    }

    /// CL/WL cycle bookkeeping after each written qword.
    fn advance_cycle(&mut self, vu: &mut VectorUnit) {
        self.cycle_pos += 1;
        match self.write_mode {
            WriteMode::Skipping => {
                if self.wl > 0 && self.cycle_pos >= self.wl {
                    self.address += (self.cl - self.wl) * 16;
                    self.cycle_pos = 0;
                }
            }
            WriteMode::Filling => {
                if self.cycle_pos >= self.cl {
                    // Fill the rest of the write cycle from the row register.
                    for _ in self.cl..self.wl {
                        let qword = (self.row[0] as u128)
                            | (self.row[1] as u128) << 32
                            | (self.row[2] as u128) << 64
                            | (self.row[3] as u128) << 96;
                        vu.write_data_qword(self.address, qword);
                        self.address += 16;
                    }
                    self.cycle_pos = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vifcode(cmd: u32, num: u32, imm: u16) -> u32 {
        (cmd << 24) | ((num & 0xff) << 16) | imm as u32
    }

    fn feed(vif: &mut Vif, words: &[u32]) {
        for w in words {
            assert!(vif.fifo.push_word(*w));
        }
    }

    fn run(vif: &mut Vif, vu: &mut VectorUnit) {
        let mut gif = Gif::new();
        vif.tick(256, vu, &mut gif);
    }

    #[test]
    fn stcycl_then_unpack_v4_32() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();

        // STCYCL(CL=1, WL=1); UNPACK V4-32 num=2 addr=0x10.
        feed(&mut vif, &[vifcode(CMD_STCYCL, 0, 0x0101), vifcode(0x6c, 2, 0x10)]);
        let data: [u32; 8] = [1, 2, 3, 4, 5, 6, 7, 8];
        feed(&mut vif, &data);
        run(&mut vif, &mut vu);

        assert_eq!(vu.read_data_qword(0x100), 0x00000004_00000003_00000002_00000001);
        assert_eq!(vu.read_data_qword(0x110), 0x00000008_00000007_00000006_00000005);
    }

    #[test]
    fn unpack_v3_16_sign_extends() {
        let mut vif = Vif::new(0);
        let mut vu = VectorUnit::new();

        feed(&mut vif, &[vifcode(CMD_STCYCL, 0, 0x0101), vifcode(0x69, 1, 0)]);
        // Three halfwords: 1, -2, 3 (plus one pad halfword to the word edge).
        feed(&mut vif, &[0xfffe_0001, 0x0000_0003]);
        run(&mut vif, &mut vu);

        assert_eq!(vu.read_data_qword(0), 0x00000000_00000003_fffffffe_00000001);
    }

    #[test]
    fn unpack_s32_broadcasts() {
        let mut vif = Vif::new(0);
        let mut vu = VectorUnit::new();
        feed(&mut vif, &[vifcode(CMD_STCYCL, 0, 0x0101), vifcode(0x60, 1, 0), 0xabcd_1234]);
        run(&mut vif, &mut vu);
        let lane = 0xabcd_1234u128;
        assert_eq!(vu.read_data_qword(0), lane | lane << 32 | lane << 64 | lane << 96);
    }

    #[test]
    fn unpack_skipping_mode_strides() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();

        // CL=2, WL=1: after every write, skip one qword slot.
        feed(&mut vif, &[vifcode(CMD_STCYCL, 0, 0x0102), vifcode(0x6c, 2, 0)]);
        feed(&mut vif, &[1, 2, 3, 4, 5, 6, 7, 8]);
        run(&mut vif, &mut vu);

        assert_eq!(vu.read_data_qword(0x00) as u32, 1);
        assert_eq!(vu.read_data_qword(0x20) as u32, 5);
        assert_eq!(vu.read_data_qword(0x10), 0);
    }

    #[test]
    fn stmask_write_protects_lanes() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();
        vu.write_data_qword(0, 0x44444444_33333333_22222222_11111111);

        // Mask: lane0 data, lane1 row, lane2 col, lane3 protected.
        let mask = 0b11_10_01_00;
        feed(
            &mut vif,
            &[
                vifcode(CMD_STCYCL, 0, 0x0101),
                vifcode(CMD_STMASK, 0, 0),
                mask,
                vifcode(CMD_STROW, 0, 0),
                0xaa,
                0xbb,
                0xcc,
                0xdd,
                vifcode(CMD_STCOL, 0, 0),
                0x10,
                0x20,
                0x30,
                0x40,
                // UNPACK V4-32 with the m bit set (0x7c).
                vifcode(0x7c, 1, 0),
                1,
                2,
                3,
                4,
            ],
        );
        run(&mut vif, &mut vu);

        assert_eq!(
            vu.read_data_qword(0),
            0x44444444_00000010_000000bb_00000001,
        );
    }

    #[test]
    fn stmod_offset_adds_row() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();
        feed(
            &mut vif,
            &[
                vifcode(CMD_STCYCL, 0, 0x0101),
                vifcode(CMD_STROW, 0, 0),
                100,
                200,
                300,
                400,
                vifcode(CMD_STMOD, 0, 1),
                vifcode(0x6c, 1, 0),
                1,
                2,
                3,
                4,
            ],
        );
        run(&mut vif, &mut vu);
        assert_eq!(vu.read_data_qword(0), 0x00000194_0000012f_000000ca_00000065);
    }

    #[test]
    fn mpg_uploads_microcode() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();
        feed(&mut vif, &[vifcode(CMD_MPG, 2, 0x4), 0x11, 0x22, 0x33, 0x44]);
        run(&mut vif, &mut vu);
        // imm=4 -> byte address 0x20; four words follow.
        assert_eq!(u32::from_le_bytes(vu.code[0x20..0x24].try_into().unwrap()), 0x11);
        assert_eq!(u32::from_le_bytes(vu.code[0x2c..0x30].try_into().unwrap()), 0x44);
    }

    #[test]
    fn mscal_latches_request_and_rotates_tops() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();
        feed(
            &mut vif,
            &[vifcode(CMD_BASE, 0, 0x40), vifcode(CMD_OFFSET, 0, 0x20), vifcode(CMD_MSCAL, 0, 0x8)],
        );
        run(&mut vif, &mut vu);
        assert_eq!(vu.mscal_request, Some(0x40));
        assert_eq!(vif.top(), 0x40); // TOPS took BASE at OFFSET time
    }

    #[test]
    fn direct_forwards_qwords_to_gif() {
        let mut vif = Vif::new(1);
        let mut vu = VectorUnit::new();
        let mut gif = Gif::new();

        feed(&mut vif, &[vifcode(CMD_DIRECT, 0, 1), 0x1, 0x2, 0x3, 0x4]);
        vif.tick(8, &mut vu, &mut gif);
        assert_eq!(gif.fifo_len(), 1);
    }

    #[test]
    fn unpack_v4_5_expands_rgb5a1() {
        let mut vif = Vif::new(0);
        let mut vu = VectorUnit::new();
        // 0x801f: r=0x1f, g=0, b=0, a=1.
        feed(&mut vif, &[vifcode(CMD_STCYCL, 0, 0x0101), vifcode(0x6f, 1, 0), 0x0000_801f]);
        run(&mut vif, &mut vu);
        assert_eq!(vu.read_data_qword(0), 0x00000080_00000000_00000000_000000f8);
    }
}
