// sio2.rs — SIO2 serial interface and the DualShock pad behind it.
// The IOP talks to controllers and memory cards through SEND parameter
// files and a byte FIFO; replies come back through SIO2_FIFO with a fixed
// length per command taken from SEND3.

use crate::iop_intc::{IopInterrupt, IopIntc};
use std::collections::VecDeque;

/// Peripheral selected by the first command byte.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Sio2Peripheral {
    None,
    Controller,
    MemCard,
}

/// DualShock button bits, active low on the wire.
#[derive(Clone, Copy, Debug)]
pub enum PadButton {
    Select = 0,
    L3 = 1,
    R3 = 2,
    Start = 3,
    Up = 4,
    Right = 5,
    Down = 6,
    Left = 7,
    L2 = 8,
    R2 = 9,
    L1 = 10,
    R1 = 11,
    Triangle = 12,
    Circle = 13,
    Cross = 14,
    Square = 15,
}

/// Deferred per-byte reply handlers for multi-byte commands.
#[derive(Clone, Copy, PartialEq, Eq)]
enum PadResponse {
    None,
    Buttons,
    Config,
    SwitchMode,
    QueryAct,
}

const PAD_DIGITAL: u8 = 0;
const PAD_ANALOG: u8 = 1;

/// The pad state machine: one byte in, one byte out, with per-command reply
/// buffers that commands may patch before they are streamed back.
pub struct Gamepad {
    buttons: u16,
    mode: u8,
    config_mode: bool,
    written: u16,
    command: u8,
    custom_response: Option<u16>,
    response: PadResponse,
    responses: [[u8; 18]; 16],
}

impl Default for Gamepad {
    fn default() -> Self {
        let mut responses = [[0u8; 18]; 16];
        // QUERY_MODEL (0x45): DualShock 2 model data; byte 2 patched to the
        // current mode on each query.
        responses[0x5][..6].copy_from_slice(&[0x03, 0x02, 0x00, 0x02, 0x01, 0x00]);
        // QUERY_COMB (0x47).
        responses[0x7][..6].copy_from_slice(&[0x00, 0x00, 0x02, 0x00, 0x01, 0x00]);
        // VIBRATION_MAP (0x4D): unmapped actuators read back 0xFF.
        responses[0xd] = [0xff; 18];
        Gamepad {
            buttons: 0xffff,
            mode: PAD_DIGITAL,
            config_mode: false,
            written: 0,
            command: 0,
            custom_response: None,
            response: PadResponse::None,
            responses,
        }
    }
}

impl Gamepad {
    pub fn press_button(&mut self, button: PadButton) {
        self.buttons &= !(1 << button as u16);
    }

    pub fn release_button(&mut self, button: PadButton) {
        self.buttons |= 1 << button as u16;
    }

    pub fn analog_mode(&self) -> bool {
        self.mode == PAD_ANALOG
    }

    fn set_response(&mut self, byte_id: u16, response: PadResponse) {
        self.custom_response = Some(byte_id + 1);
        self.response = response;
    }

    fn reply_slot(&mut self) -> &mut [u8; 18] {
        &mut self.responses[(self.command & 0xf) as usize]
    }

    fn read_buttons(&mut self) {
        let offset = (self.written - 4) as usize;
        let byte = (self.buttons >> (8 * offset)) as u8;
        self.reply_slot()[offset] = byte;
        // Two button bytes; analog replies continue with centered sticks.
        if offset == 0 {
            self.set_response(4, PadResponse::Buttons);
        } else if self.mode == PAD_ANALOG {
            let slot = self.reply_slot();
            slot[2..6].copy_from_slice(&[0x80; 4]);
        }
    }

    fn set_config(&mut self, value: u8) {
        if !self.config_mode {
            self.read_buttons();
        } else {
            let slot = self.reply_slot();
            slot[0] = 0;
            slot[1] = 0;
        }
        log::debug!("[PAD] config mode = {}", value & 1);
        self.config_mode = value & 1 != 0;
    }

    fn switch_mode(&mut self, value: u8) {
        log::debug!("[PAD] switching to {} mode", if value & 1 != 0 { "analog" } else { "digital" });
        self.mode = value & 1;
    }

    fn query_act(&mut self, half: u8) {
        const CONSTANTS: [[u8; 6]; 2] =
            [[0x00, 0x00, 0x00, 0x02, 0x00, 0x0a], [0x00, 0x00, 0x00, 0x00, 0x00, 0x14]];
        let row = CONSTANTS[(half & 1) as usize];
        self.reply_slot()[..6].copy_from_slice(&row);
    }

    fn process_command(&mut self, cmd: u8) -> u8 {
        self.command = cmd;
        let ack = if self.mode == PAD_DIGITAL { 0x41 } else { 0x73 };
        match cmd {
            0x42 => {
                // READ_DATA
                self.set_response(3, PadResponse::Buttons);
                ack
            }
            0x43 => {
                // CONFIG_MODE enter/exit; outside config it polls like 0x42.
                self.set_response(3, PadResponse::Config);
                ack
            }
            0x44 => {
                // SET_MAIN_MODE, config only.
                self.set_response(3, PadResponse::SwitchMode);
                0xf3
            }
            0x45 => {
                // QUERY_MODEL
                let mode = self.mode;
                self.reply_slot()[2] = mode;
                0xf3
            }
            0x46 => {
                // QUERY_ACT
                self.set_response(3, PadResponse::QueryAct);
                0xf3
            }
            0x47 | 0x4c => 0xf3, // constant replies
            0x4d => 0xf3,        // VIBRATION_MAP: stored map streams back
            _ => {
                log::warn!("[PAD] unknown command {:#x}", cmd);
                0xf3
            }
        }
    }

    /// Push one command byte, get the wire reply byte.
    pub fn write_byte(&mut self, byte: u8) -> u8 {
        self.written += 1;

        if self.custom_response == Some(self.written) {
            self.custom_response = None;
            match self.response {
                PadResponse::Buttons => self.read_buttons(),
                PadResponse::Config => self.set_config(byte),
                PadResponse::SwitchMode => self.switch_mode(byte),
                PadResponse::QueryAct => self.query_act(byte),
                PadResponse::None => {}
            }
        } else {
            match self.written {
                1 => return 0xff,
                2 => return self.process_command(byte),
                3 => return 0x5a,
                _ => {}
            }
        }

        let offset = (self.written - 4) as usize;
        self.responses[(self.command & 0xf) as usize][offset]
    }

    fn begin_transfer(&mut self) {
        self.written = 0;
        self.custom_response = None;
    }
}

#[derive(Default, Clone, Copy)]
struct CommandState {
    index: usize,
    size: u32,
}

/// SIO2 register block at 0x1F808200.
pub struct Sio2 {
    send3: [u32; 16],
    send1_2: [u32; 8],
    ctrl: u32,
    fifo: VecDeque<u8>,
    command: CommandState,
    current_device: Sio2Peripheral,
    pub pad: Gamepad,
}

impl Default for Sio2 {
    fn default() -> Self {
        Sio2 {
            send3: [0; 16],
            send1_2: [0; 8],
            ctrl: 0,
            fifo: VecDeque::new(),
            command: CommandState::default(),
            current_device: Sio2Peripheral::None,
            pad: Gamepad::default(),
        }
    }
}

impl Sio2 {
    pub fn read(&mut self, addr: u32) -> u32 {
        match addr & 0xff {
            0x64 => self.fifo.pop_front().unwrap_or(0) as u32,
            0x68 => self.ctrl,
            0x6c => 0x0d102, // peripheral connected
            0x70 => 0xf,
            0x74 => 0,
            offset => {
                log::warn!("[SIO2] read from unknown register {:#x}", offset);
                0
            }
        }
    }

    pub fn write(&mut self, addr: u32, data: u32, intc: &mut IopIntc) {
        match addr & 0xff {
            offset @ 0x00..=0x3f => {
                self.send3[(offset as usize & 0x3f) / 4] = data;
            }
            offset @ 0x40..=0x5f => {
                // Bit 2 of the address selects SEND2 over SEND1.
                let send2 = (offset & 0x4 != 0) as usize;
                let slot = (offset as usize & 0x1f) / 8;
                self.send1_2[slot + send2 * 4] = data;
            }
            0x60 => self.upload_command(data as u8),
            0x68 => {
                self.ctrl = data;
                if data & 0x1 != 0 {
                    // Transfer kick; completion is immediate at this level.
                    intc.trigger(IopInterrupt::Sio2);
                    self.ctrl &= !0x1;
                }
                if data & 0xc != 0 {
                    self.command = CommandState::default();
                    self.current_device = Sio2Peripheral::None;
                }
            }
            offset => {
                log::warn!("[SIO2] write {:#x} to unknown register {:#x}", data, offset);
            }
        }
    }

    /// One byte of command stream through SIO2_FIFOIN.
    fn upload_command(&mut self, cmd: u8) {
        let mut just_started = false;
        if self.command.size == 0 {
            let params = self.send3[self.command.index & 0xf];
            if params == 0 {
                log::warn!("[SIO2] SEND3 parameter empty, dropping byte {:#x}", cmd);
                return;
            }
            self.command.size = (params >> 8) & 0x1ff;
            self.command.index = (self.command.index + 1) & 0xf;

            self.current_device = match cmd {
                0x01 => Sio2Peripheral::Controller,
                0x81 => Sio2Peripheral::MemCard,
                _ => Sio2Peripheral::None,
            };
            just_started = true;
        }

        self.command.size -= 1;

        // The peripheral-select byte is part of the transfer too.
        match self.current_device {
            Sio2Peripheral::Controller => {
                if just_started {
                    self.pad.begin_transfer();
                }
                let reply = self.pad.write_byte(cmd);
                self.fifo.push_back(reply);
            }
            Sio2Peripheral::MemCard => {
                // No card present.
                self.fifo.push_back(0xff);
            }
            Sio2Peripheral::None => {
                self.fifo.push_back(0xff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_command(sio2: &mut Sio2, intc: &mut IopIntc, bytes: &[u8]) -> Vec<u8> {
        sio2.send3 = [0; 16];
        sio2.command = CommandState::default();
        sio2.write(0x1f808200, (bytes.len() as u32) << 8, intc);
        for b in bytes {
            sio2.write(0x1f808260, *b as u32, intc);
        }
        (0..bytes.len()).map(|_| sio2.read(0x1f808264) as u8).collect()
    }

    #[test]
    fn digital_poll_reports_buttons() {
        let mut sio2 = Sio2::default();
        let mut intc = IopIntc::default();
        sio2.pad.press_button(PadButton::Cross);

        let reply = run_command(&mut sio2, &mut intc, &[0x01, 0x42, 0x00, 0x00, 0x00]);
        assert_eq!(reply[1], 0x41); // digital id
        assert_eq!(reply[2], 0x5a);
        assert_eq!(reply[3], 0xff); // low button byte untouched
        assert_eq!(reply[4], !(1 << 6)); // Cross is bit 14 -> high byte bit 6
    }

    #[test]
    fn analog_switch_changes_id() {
        let mut sio2 = Sio2::default();
        let mut intc = IopIntc::default();

        // Enter config, set analog, leave config.
        run_command(&mut sio2, &mut intc, &[0x01, 0x43, 0x00, 0x01, 0x00]);
        run_command(&mut sio2, &mut intc, &[0x01, 0x44, 0x00, 0x01, 0x00]);
        run_command(&mut sio2, &mut intc, &[0x01, 0x43, 0x00, 0x00, 0x00]);
        assert!(sio2.pad.analog_mode());

        let reply = run_command(
            &mut sio2,
            &mut intc,
            &[0x01, 0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        );
        assert_eq!(reply[1], 0x73); // analog id
        assert_eq!(&reply[5..9], &[0x80; 4]); // centered sticks
    }

    #[test]
    fn ctrl_kick_raises_interrupt() {
        let mut sio2 = Sio2::default();
        let mut intc = IopIntc::default();
        intc.i_mask = 1 << IopInterrupt::Sio2 as u32;
        sio2.write(0x1f808268, 0x1, &mut intc);
        assert!(intc.pending());
        assert_eq!(sio2.read(0x1f808268) & 1, 0);
    }
}
