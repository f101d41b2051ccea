// emotion-core — component-level PlayStation 2 emulation core.
// Heterogeneous multiprocessor substrate: EE (R5900) and IOP (R3000A)
// interpreters, the shared physical memory fabric, the EE DMA controller,
// the VIF/GIF stream decoders, a partial GS, SIF, and both interrupt/timer
// networks, driven by a single cooperative cycle-counted scheduler.

mod bus;
mod dmac;
mod ee;
mod ee_cop0;
mod ee_cop1;
mod elf;
mod fifo;
mod gif;
mod gs;
mod gs_vram;
mod instruction;
mod intc;
mod iop;
mod iop_dma;
mod iop_intc;
mod iop_timers;
mod renderer;
mod sif;
mod sio2;
mod timers;
mod vif;
mod vu;

pub use bus::{Bus, BusMaster, BIOS_SIZE, RAM_SIZE};
pub use ee::EmotionEngine;
pub use gs::GraphicsSynthesizer;
pub use intc::IntSource;
pub use iop::IoProcessor;
pub use iop_intc::IopInterrupt;
pub use renderer::{CaptureRenderer, NullRenderer, RendererSink, Vertex};
pub use sio2::PadButton;
pub use timers::{BUS_CLOCK, EE_CLOCK};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("BIOS image must be exactly 4 MiB, got {0} bytes")]
    BiosSize(usize),
    #[error("failed to read BIOS image: {0}")]
    BiosIo(#[from] std::io::Error),
    #[error("invalid ELF: {0}")]
    BadElf(&'static str),
    #[error("ELF segment at {vaddr:#010x} ({size:#x} bytes) outside EE RAM")]
    ElfSegmentBounds { vaddr: u32, size: usize },
}

/// EE cycles advanced per scheduler pass; the IOP runs at 1/8 of that and
/// the bus clock at 1/2.
pub const EE_CYCLES_PER_TICK: u32 = 32;

/// NTSC vertical blanking cadence in EE cycles.
const VBLANK_OFF_CYCLES: u64 = 4_900_000;
const VBLANK_ON_CYCLES: u64 = 500_000;

/// The whole console: both CPUs plus the bus that owns every peripheral.
///
/// `tick()` is the public heartbeat; an external driver loops on it until
/// `request_stop` flips the exit flag.
pub struct EmulatorCore {
    pub ee: EmotionEngine,
    pub iop: IoProcessor,
    pub bus: Bus,

    stop: bool,
    ticks: u64,
    in_vblank: bool,
    vblank_countdown: u64,
}

impl EmulatorCore {
    /// Build a core around an in-memory BIOS image (exactly 4 MiB).
    pub fn from_bios_image(bios: Vec<u8>) -> Result<Self, CoreError> {
        if bios.len() != BIOS_SIZE {
            return Err(CoreError::BiosSize(bios.len()));
        }
        let mut bus = Bus::new(bios.into_boxed_slice());
        let ee = EmotionEngine::new(&mut bus);
        let iop = IoProcessor::new(&mut bus);
        Ok(EmulatorCore {
            ee,
            iop,
            bus,
            stop: false,
            ticks: 0,
            in_vblank: false,
            vblank_countdown: VBLANK_OFF_CYCLES,
        })
    }

    /// Load the BIOS from disk. The file must hold the full 4 MiB ROM.
    pub fn from_bios_file(path: impl AsRef<std::path::Path>) -> Result<Self, CoreError> {
        let bios = std::fs::read(path)?;
        Self::from_bios_image(bios)
    }

    /// Install the renderer backend; a `NullRenderer` is used until then.
    pub fn set_renderer(&mut self, renderer: Box<dyn RendererSink>) {
        self.bus.gs.set_renderer(renderer);
    }

    /// One scheduler pass: EE, IOP at 1/8, DMA, VIF0/VIF1, GIF, timers,
    /// then vblank pacing. Interrupts latched during the pass are delivered
    /// at the next batch boundary of the owning CPU.
    pub fn tick(&mut self) {
        let cycles = EE_CYCLES_PER_TICK;

        self.ee.tick(cycles, &mut self.bus);
        self.iop.tick(cycles / 8, &mut self.bus);

        self.bus.tick_dmac(cycles);
        self.bus.tick_vif(cycles);
        self.bus.tick_gif(cycles);

        self.bus.tick_timers(cycles / 2, cycles / 8);

        self.advance_vblank(cycles as u64);
        self.ticks += 1;
    }

    /// Run `count` scheduler passes or until a stop is requested.
    pub fn run(&mut self, count: u64) {
        for _ in 0..count {
            if self.stop {
                break;
            }
            self.tick();
        }
    }

    /// Ask the run loop to exit at the next iteration boundary.
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    pub fn stopped(&self) -> bool {
        self.stop
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Copy a MIPS ELF into EE RAM and redirect the EE to its entry point.
    /// Meant to be invoked by the driver once the BIOS reaches its first
    /// ERET, standing in for disc boot.
    pub fn load_elf(&mut self, image: &[u8]) -> Result<(), CoreError> {
        let entry = elf::load(&mut self.bus.ram, image)?;
        self.ee.jump_to(&mut self.bus, entry);
        Ok(())
    }

    /// Drain the BIOS debug console output captured at 0x1000F180.
    pub fn console_output(&mut self) -> Vec<u8> {
        self.bus.take_console()
    }

    /// NTSC vertical-retrace pacing: edges feed both INTCs and the GS CSR.
    fn advance_vblank(&mut self, cycles: u64) {
        if self.vblank_countdown > cycles {
            self.vblank_countdown -= cycles;
            return;
        }

        if !self.in_vblank {
            self.in_vblank = true;
            self.vblank_countdown = VBLANK_ON_CYCLES;
            self.bus.ee_intc.trigger(IntSource::VblankStart);
            self.bus.iop_intc.trigger(IopInterrupt::VblankStart);
            self.bus.gs.vblank(true);
        } else {
            self.in_vblank = false;
            self.vblank_countdown = VBLANK_OFF_CYCLES;
            self.bus.ee_intc.trigger(IntSource::VblankEnd);
            self.bus.iop_intc.trigger(IopInterrupt::VblankEnd);
            self.bus.gs.vblank(false);
        }
    }
}
