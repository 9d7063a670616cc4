// Backend module - GPU API abstraction layer
//
// Design: the frame pipeline is generic over `Backend`. Direct3D 12 drives
// real hardware on Windows; the headless backend simulates a GPU timeline
// with a validation layer so the pipeline can run (and be tested) anywhere.

#[cfg(windows)]
pub mod d3d12;
pub mod headless;

#[cfg(windows)]
pub use d3d12::D3d12Backend;
pub use headless::HeadlessBackend;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use raw_window_handle::RawWindowHandle;
use thiserror::Error;

/// Errors reported by a backend API call
#[derive(Debug, Error)]
pub enum BackendError {
    /// Object creation rejected by the API
    #[error("failed to create {what}: {reason}")]
    Creation { what: &'static str, reason: String },

    /// Device creation rejected at this feature level
    #[error("feature level {0} is not supported by the adapter")]
    FeatureLevelUnsupported(FeatureLevel),

    /// The device was removed (driver reset, hang detected by the OS)
    #[error("device removed: {0}")]
    DeviceRemoved(String),

    /// A fence wait on a value nothing will ever signal
    #[error("fence value {value} is never signaled (completed value {completed})")]
    NeverSignaled { value: u64, completed: u64 },

    /// Any other failing API call
    #[error("{call} failed: {reason}")]
    Api { call: &'static str, reason: String },
}

impl BackendError {
    pub fn creation(what: &'static str, reason: impl fmt::Display) -> Self {
        Self::Creation { what, reason: reason.to_string() }
    }

    pub fn api(call: &'static str, reason: impl fmt::Display) -> Self {
        Self::Api { call, reason: reason.to_string() }
    }
}

/// Direct3D feature levels, ordered oldest to newest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureLevel {
    Level11_0,
    Level11_1,
    Level12_0,
    Level12_1,
    Level12_2,
}

impl FeatureLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Level11_0 => "11.0",
            Self::Level11_1 => "11.1",
            Self::Level12_0 => "12.0",
            Self::Level12_1 => "12.1",
            Self::Level12_2 => "12.2",
        }
    }
}

impl fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "11.0" | "11_0" => Ok(Self::Level11_0),
            "11.1" | "11_1" => Ok(Self::Level11_1),
            "12.0" | "12_0" => Ok(Self::Level12_0),
            "12.1" | "12_1" => Ok(Self::Level12_1),
            "12.2" | "12_2" => Ok(Self::Level12_2),
            other => Err(format!("unknown feature level '{}'", other)),
        }
    }
}

/// Logical usage state of a GPU resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Owned by the presentation engine (same bits as COMMON)
    Present,
    RenderTarget,
    /// Upload heap resources live here for their whole lifetime
    GenericRead,
    CopyDest,
    CopySource,
    PixelShaderResource,
}

/// Stable identity of a GPU resource, used for state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba32Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => f.write_str("vertex"),
            Self::Pixel => f.write_str("pixel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Pixel,
}

/// A root constant-buffer view bound at `b{shader_register}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootParameter {
    pub shader_register: u32,
    pub register_space: u32,
    pub visibility: ShaderVisibility,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub allow_input_assembler_layout: bool,
}

/// One vertex attribute; `None` offset means appended after the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputElement {
    pub semantic: &'static str,
    pub semantic_index: u32,
    pub format: TextureFormat,
    pub aligned_byte_offset: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterizerDesc {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendDesc {
    pub blend_enable: bool,
    pub write_all_channels: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    TriangleList,
}

pub struct PipelineStateDesc<'a, B: Backend> {
    pub root_signature: &'a B::RootSignature,
    pub input_layout: &'a [InputElement],
    pub vertex_shader: &'a [u8],
    pub pixel_shader: &'a [u8],
    pub blend: BlendDesc,
    pub rasterizer: RasterizerDesc,
    pub render_target_format: TextureFormat,
    pub sample_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self { left: 0, top: 0, right: width as i32, bottom: height as i32 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    pub gpu_address: u64,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub buffer_count: u32,
    pub sample_count: u32,
}

/// Where the swap chain presents to
#[derive(Debug, Clone, Copy)]
pub enum Surface {
    Window(RawWindowHandle),
    Offscreen,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub description: String,
    pub software: bool,
    pub dedicated_video_memory: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Reached,
    TimedOut,
}

/// Set of object types making up one GPU API
pub trait Backend: Sized + 'static {
    const NAME: &'static str;

    type Factory: Factory<Self>;
    type Adapter: Adapter<Self>;
    type Device: Device<Self>;
    type CommandQueue: CommandQueue<Self>;
    type CommandAllocator: CommandAllocator;
    type CommandList: CommandList<Self>;
    type Fence: Fence;
    type SwapChain: SwapChain<Self>;
    type Resource: GpuResource;
    type DescriptorHeap;
    type RenderTargetView: Clone + fmt::Debug;
    type RootSignature;
    type PipelineState;
    type UploadBuffer: UploadBuffer;
}

pub trait Factory<B: Backend> {
    /// Adapter `index` in descending performance preference, `None` past the end
    fn enum_adapter_by_preference(&self, index: u32) -> Result<Option<B::Adapter>, BackendError>;

    fn create_swap_chain(
        &self,
        queue: &B::CommandQueue,
        surface: &Surface,
        desc: &SwapChainDesc,
    ) -> Result<B::SwapChain, BackendError>;
}

pub trait Adapter<B: Backend> {
    fn info(&self) -> Result<AdapterInfo, BackendError>;

    fn create_device(&self, level: FeatureLevel) -> Result<B::Device, BackendError>;
}

pub trait Device<B: Backend> {
    fn create_command_queue(&self) -> Result<B::CommandQueue, BackendError>;

    fn create_command_allocator(&self) -> Result<B::CommandAllocator, BackendError>;

    /// The new list is open for recording against `allocator`
    fn create_command_list(
        &self,
        allocator: &B::CommandAllocator,
    ) -> Result<B::CommandList, BackendError>;

    fn create_fence(&self, initial_value: u64) -> Result<B::Fence, BackendError>;

    fn create_rtv_heap(&self, capacity: u32) -> Result<B::DescriptorHeap, BackendError>;

    fn create_render_target_view(
        &self,
        heap: &B::DescriptorHeap,
        slot: u32,
        resource: &B::Resource,
        format: TextureFormat,
    ) -> Result<B::RenderTargetView, BackendError>;

    fn create_root_signature(&self, desc: &RootSignatureDesc)
        -> Result<B::RootSignature, BackendError>;

    fn create_pipeline_state(
        &self,
        desc: &PipelineStateDesc<'_, B>,
    ) -> Result<B::PipelineState, BackendError>;

    /// CPU-writable, GPU-readable buffer, permanently in `GenericRead`
    fn create_upload_buffer(&self, size: u64) -> Result<B::UploadBuffer, BackendError>;

    /// Why the device went away; `None` while it is still alive
    fn removed_reason(&self) -> Option<String>;
}

pub trait CommandQueue<B: Backend> {
    /// Lists execute in slice order, one after another
    fn execute_command_lists(&self, lists: &[&B::CommandList]);

    fn signal(&self, fence: &B::Fence, value: u64) -> Result<(), BackendError>;
}

pub trait CommandAllocator {
    fn reset(&self) -> Result<(), BackendError>;
}

pub trait CommandList<B: Backend> {
    fn close(&self) -> Result<(), BackendError>;
    fn reset(&self, allocator: &B::CommandAllocator) -> Result<(), BackendError>;

    fn resource_barrier(&self, resource: &B::Resource, before: ResourceState, after: ResourceState);
    fn set_render_target(&self, rtv: &B::RenderTargetView);
    fn clear_render_target(&self, rtv: &B::RenderTargetView, color: [f32; 4]);
    fn set_viewport(&self, viewport: &Viewport);
    fn set_scissor_rect(&self, rect: &ScissorRect);
    fn set_graphics_root_signature(&self, root_signature: &B::RootSignature);
    fn set_pipeline_state(&self, pipeline: &B::PipelineState);
    fn set_vertex_buffer(&self, slot: u32, view: &VertexBufferView);
    fn set_primitive_topology(&self, topology: PrimitiveTopology);
    fn set_graphics_root_constant_buffer(&self, parameter: u32, gpu_address: u64);
    fn draw_instanced(
        &self,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    );
}

pub trait Fence {
    /// Last value the GPU wrote back; `u64::MAX` once the device is removed
    fn completed_value(&self) -> u64;

    /// Block on the OS wait primitive until the fence reaches `value`.
    /// `None` waits without a bound.
    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<WaitStatus, BackendError>;
}

pub trait SwapChain<B: Backend> {
    fn current_back_buffer_index(&self) -> u32;
    fn buffer(&self, index: u32) -> Result<B::Resource, BackendError>;
    fn present(&self, sync_interval: u32) -> Result<(), BackendError>;
}

pub trait GpuResource: Clone + fmt::Debug {
    fn id(&self) -> ResourceId;
}

pub trait UploadBuffer {
    fn size(&self) -> u64;
    fn gpu_address(&self) -> u64;
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_levels_order_newest_last() {
        assert!(FeatureLevel::Level12_2 > FeatureLevel::Level12_1);
        assert!(FeatureLevel::Level12_0 > FeatureLevel::Level11_1);
    }

    #[test]
    fn feature_level_parses_both_spellings() {
        assert_eq!("12.0".parse::<FeatureLevel>(), Ok(FeatureLevel::Level12_0));
        assert_eq!("12_1".parse::<FeatureLevel>(), Ok(FeatureLevel::Level12_1));
        assert!("13.0".parse::<FeatureLevel>().is_err());
        assert_eq!(FeatureLevel::Level12_2.to_string(), "12.2");
    }
}
