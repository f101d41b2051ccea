// timers.rs — the four EE timers at 0x10000000/0800/1000/1800.
// Each timer counts on a selectable clock (BUSCLK, /16, /256 or HBLANK) and
// raises edge-triggered compare/overflow interrupts through the INTC.

use crate::intc::{IntSource, Intc};

/* Clock constants from ps2sdk. */
pub const EE_CLOCK: u32 = 294_912_000;
pub const BUS_CLOCK: u32 = EE_CLOCK / 2;
pub const HBLANK_NTSC: u32 = 15_734;

const MODE_CLEAR_WHEN_CMP: u32 = 1 << 6;
const MODE_ENABLE: u32 = 1 << 7;
const MODE_CMP_INTR: u32 = 1 << 8;
const MODE_OVF_INTR: u32 = 1 << 9;
const MODE_CMP_FLAG: u32 = 1 << 10;
const MODE_OVF_FLAG: u32 = 1 << 11;

#[derive(Default, Clone, Copy)]
struct Timer {
    counter: u32,
    mode: u32,
    compare: u32,
    hold: u32,
    /// Bus cycles per counter increment, derived from the clock select.
    ratio: u32,
    /// Residue of bus cycles not yet converted into counter increments.
    accum: u32,
}

pub struct Timers {
    timers: [Timer; 4],
}

impl Default for Timers {
    fn default() -> Self {
        let timer = Timer { ratio: 1, ..Timer::default() };
        Timers { timers: [timer; 4] }
    }
}

impl Timers {
    fn decode(addr: u32) -> (usize, u32) {
        let num = ((addr & 0xff00) >> 11) as usize;
        let offset = (addr & 0xf0) >> 4;
        (num, offset)
    }

    pub fn read(&self, addr: u32) -> u32 {
        let (num, offset) = Self::decode(addr);
        let timer = &self.timers[num];
        match offset {
            0 => timer.counter,
            1 => timer.mode,
            2 => timer.compare,
            _ => timer.hold,
        }
    }

    pub fn write(&mut self, addr: u32, data: u32) {
        let (num, offset) = Self::decode(addr);
        let timer = &mut self.timers[num];
        match offset {
            0 => timer.counter = data & 0xffff,
            1 => {
                // One counter step per `ratio` bus cycles:
                //   0 = BUSCLK, 1 = BUSCLK/16, 2 = BUSCLK/256, 3 = HBLANK.
                timer.ratio = match data & 0x3 {
                    0 => 1,
                    1 => 16,
                    2 => 256,
                    _ => BUS_CLOCK / HBLANK_NTSC, // NTSC line rate
                };
                timer.accum = 0;
                // Writes clear the latched interrupt flags.
                timer.mode = data & 0x3ff;
                log::trace!("[TIMERS] timer {} mode {:#x} ratio {}", num, data, timer.ratio);
            }
            2 => timer.compare = data & 0xffff,
            _ => timer.hold = data & 0xffff,
        }
    }

    /// Advance all timers by `cycles` bus-clock cycles.
    pub fn tick(&mut self, cycles: u32, intc: &mut Intc) {
        const TIMER_INTS: [IntSource; 4] =
            [IntSource::Timer0, IntSource::Timer1, IntSource::Timer2, IntSource::Timer3];

        for (i, timer) in self.timers.iter_mut().enumerate() {
            if timer.mode & MODE_ENABLE == 0 {
                continue;
            }

            timer.accum += cycles;
            let increment = timer.accum / timer.ratio;
            timer.accum %= timer.ratio;

            let old_count = timer.counter;
            timer.counter += increment;

            /* Target reached. Interrupts are edge-triggered: a new one is
            only sent when the corresponding flag goes 0 -> 1. */
            if timer.counter >= timer.compare && old_count < timer.compare {
                if timer.mode & MODE_CMP_INTR != 0 && timer.mode & MODE_CMP_FLAG == 0 {
                    intc.trigger(TIMER_INTS[i]);
                    timer.mode |= MODE_CMP_FLAG;
                }
                if timer.mode & MODE_CLEAR_WHEN_CMP != 0 {
                    timer.counter = 0;
                }
            }

            if timer.counter > 0xffff {
                if timer.mode & MODE_OVF_INTR != 0 && timer.mode & MODE_OVF_FLAG == 0 {
                    intc.trigger(TIMER_INTS[i]);
                    timer.mode |= MODE_OVF_FLAG;
                }
                timer.counter -= 0xffff;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_edge_fires_once() {
        let mut timers = Timers::default();
        let mut intc = Intc::default();
        intc.mask = 1 << IntSource::Timer0 as u32;

        // enable + compare interrupt + clear-on-compare, BUSCLK
        timers.write(0x10000010, 0x1c0);
        timers.write(0x10000020, 100); // compare
        timers.tick(150, &mut intc);
        assert!(intc.pending());
        assert_eq!(timers.read(0x10000000), 0); // cleared on match

        // Acknowledge INTC; the latched flag suppresses the next crossing.
        intc.stat = 0;
        timers.tick(150, &mut intc);
        assert!(!intc.pending());
    }

    #[test]
    fn hblank_ratio_divides() {
        let mut timers = Timers::default();
        let mut intc = Intc::default();
        timers.write(0x10000010, 0x83); // enable, HBLANK clock
        let ratio = BUS_CLOCK / HBLANK_NTSC;
        timers.tick(ratio * 3 + 1, &mut intc);
        assert_eq!(timers.read(0x10000000), 3);
    }

    #[test]
    fn overflow_wraps_and_latches() {
        let mut timers = Timers::default();
        let mut intc = Intc::default();
        intc.mask = 1 << IntSource::Timer1 as u32;
        timers.write(0x10000810, 0x280); // enable + overflow interrupt
        timers.tick(0x10000, &mut intc);
        assert!(intc.pending());
        assert!(timers.read(0x10000810) & MODE_OVF_FLAG != 0);
        assert!(timers.read(0x10000800) <= 0xffff);
    }
}
