// iop_timers.rs — IOP timer register file.
// Two groups of three timers (0x1F801100.., 0x1F801480..). The scheduler
// clocks timer 5, which the IOP kernel uses for its alarm heartbeat; the
// others accept programming.

use crate::iop_intc::{IopInterrupt, IopIntc};

const MODE_RESET_ON_INTR: u32 = 1 << 3;
const MODE_COMPARE_INTR: u32 = 1 << 4;
const MODE_OVERFLOW_INTR: u32 = 1 << 5;
const MODE_INTR_ENABLED: u32 = 1 << 10;
const MODE_COMPARE_RAISED: u32 = 1 << 11;
const MODE_OVERFLOW_RAISED: u32 = 1 << 12;

#[derive(Default, Clone, Copy)]
struct IopTimer {
    count: u64,
    mode: u32,
    target: u32,
}

#[derive(Default)]
pub struct IopTimers {
    timers: [IopTimer; 6],
}

impl IopTimers {
    fn decode(addr: u32) -> (usize, u32) {
        let group = ((addr & 0x400) != 0) as usize;
        let timer = ((addr & 0x30) >> 4) as usize;
        let offset = (addr & 0xf) >> 2;
        (timer + 3 * group, offset)
    }

    pub fn read(&mut self, addr: u32) -> u32 {
        let (num, offset) = Self::decode(addr);
        let timer = &mut self.timers[num];
        match offset {
            0 => timer.count as u32,
            1 => {
                // Mode reads clear the raised-interrupt latches.
                let mode = timer.mode;
                timer.mode &= !(MODE_COMPARE_RAISED | MODE_OVERFLOW_RAISED);
                mode
            }
            _ => timer.target,
        }
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        let (num, offset) = Self::decode(addr);
        log::trace!("[IOP TIMERS] write {:#x} to timer {} offset {}", data, num, offset);
        let timer = &mut self.timers[num];
        match offset {
            0 => timer.count = data as u64,
            1 => {
                // Mode writes restart the counter and re-arm the interrupt.
                timer.mode = data | MODE_INTR_ENABLED;
                timer.count = 0;
            }
            _ => timer.target = data,
        }
    }

    /// Advance the clocked timer (timer 5) by IOP cycles.
    pub fn tick(&mut self, cycles: u32, intc: &mut IopIntc) {
        let timer = &mut self.timers[5];
        let old_count = timer.count;
        timer.count += cycles as u64;

        let target = timer.target as u64;
        if target > 0 && old_count < target && timer.count >= target {
            timer.mode |= MODE_COMPARE_RAISED;
            if timer.mode & MODE_COMPARE_INTR != 0 {
                intc.trigger(IopInterrupt::Timer5);
            }
            if timer.mode & MODE_RESET_ON_INTR != 0 {
                timer.count = 0;
            }
        }

        if timer.count > 0xffff_ffff {
            timer.mode |= MODE_OVERFLOW_RAISED;
            if timer.mode & MODE_OVERFLOW_INTR != 0 {
                intc.trigger(IopInterrupt::Timer5);
            }
            timer.count &= 0xffff_ffff;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer5_target_interrupt() {
        let mut timers = IopTimers::default();
        let mut intc = IopIntc::default();
        intc.i_mask = 1 << IopInterrupt::Timer5 as u32;

        // Timer 5 lives in the second group: 0x1F801480 + 2*0x10.
        timers.write(0x1f8014a8, 500); // target
        timers.write(0x1f8014a4, MODE_COMPARE_INTR | MODE_RESET_ON_INTR);
        timers.tick(600, &mut intc);
        assert!(intc.pending());
        assert_eq!(timers.read(0x1f8014a0), 0); // reset on target

        // Raised latch is visible once, then clears on read.
        assert!(timers.read(0x1f8014a4) & MODE_COMPARE_RAISED != 0);
        assert!(timers.read(0x1f8014a4) & MODE_COMPARE_RAISED == 0);
    }
}
