// renderer.rs — the primitive sink the GS draws into.
// The backend (Vulkan, GL, software, ...) lives outside the core; anything
// implementing this trait can receive the decoded primitive stream. Data
// crosses the boundary as owned copies, never shared memory.

use bytemuck::{Pod, Zeroable};

/// One finished vertex: clip-space position and normalized color.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Minimal interface the core calls while decoding GS primitives.
pub trait RendererSink {
    /// New depth-test function from a TEST register write (2-bit ZTST).
    fn set_depth_function(&mut self, _bits: u8) {}

    /// One triangle vertex; arrives in groups of three.
    fn submit_vertex(&mut self, _vertex: Vertex) {}

    /// A two-vertex sprite (axis-aligned rectangle).
    fn submit_sprite(&mut self, _v1: Vertex, _v2: Vertex) {}

    /// Fresh copy of VRAM after an upload completes, for texture sampling.
    fn upload_vram(&mut self, _bytes: &[u8]) {}
}

/// Discards everything; the core is fully functional against it.
pub struct NullRenderer;

impl RendererSink for NullRenderer {}

/// Test/debug sink that records what the core submitted.
#[derive(Default)]
pub struct CaptureRenderer {
    pub vertices: Vec<Vertex>,
    pub sprites: Vec<(Vertex, Vertex)>,
    pub depth_functions: Vec<u8>,
    pub vram_uploads: usize,
}

impl RendererSink for CaptureRenderer {
    fn set_depth_function(&mut self, bits: u8) {
        self.depth_functions.push(bits);
    }

    fn submit_vertex(&mut self, vertex: Vertex) {
        self.vertices.push(vertex);
    }

    fn submit_sprite(&mut self, v1: Vertex, v2: Vertex) {
        self.sprites.push((v1, v2));
    }

    fn upload_vram(&mut self, _bytes: &[u8]) {
        self.vram_uploads += 1;
    }
}

/// Shared handle so a test can keep inspecting the capture after handing the
/// sink to the core.
impl RendererSink for std::rc::Rc<std::cell::RefCell<CaptureRenderer>> {
    fn set_depth_function(&mut self, bits: u8) {
        self.borrow_mut().set_depth_function(bits);
    }

    fn submit_vertex(&mut self, vertex: Vertex) {
        self.borrow_mut().submit_vertex(vertex);
    }

    fn submit_sprite(&mut self, v1: Vertex, v2: Vertex) {
        self.borrow_mut().submit_sprite(v1, v2);
    }

    fn upload_vram(&mut self, bytes: &[u8]) {
        self.borrow_mut().upload_vram(bytes);
    }
}
