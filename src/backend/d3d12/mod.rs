// Direct3D 12 backend
//
// Responsibilities:
// - DXGI factory and adapter enumeration (high-performance preference)
// - Best-effort debug layer, GPU-based validation, info-queue filter and breaks
// - Thin ownership wrappers around the COM objects the frame pipeline uses
//
// Every wrapper owns its COM interface, so release happens on drop along
// every exit path, including half-finished startup.

mod buffer;
mod command;
mod device;
mod pipeline;
mod swapchain;
mod sync;

pub use buffer::{D3d12DescriptorHeap, D3d12RenderTargetView, D3d12Resource, D3d12UploadBuffer};
pub use command::{D3d12CommandAllocator, D3d12CommandList, D3d12CommandQueue};
pub use device::D3d12Device;
pub use pipeline::{D3d12PipelineState, D3d12RootSignature};
pub use swapchain::D3d12SwapChain;
pub use sync::D3d12Fence;

use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::{
    Adapter, AdapterInfo, Backend, BackendError, Factory, FeatureLevel, ResourceState, Surface,
    SwapChainDesc, TextureFormat,
};

pub struct D3d12Backend;

impl Backend for D3d12Backend {
    const NAME: &'static str = "d3d12";

    type Factory = D3d12Factory;
    type Adapter = D3d12Adapter;
    type Device = D3d12Device;
    type CommandQueue = D3d12CommandQueue;
    type CommandAllocator = D3d12CommandAllocator;
    type CommandList = D3d12CommandList;
    type Fence = D3d12Fence;
    type SwapChain = D3d12SwapChain;
    type Resource = D3d12Resource;
    type DescriptorHeap = D3d12DescriptorHeap;
    type RenderTargetView = D3d12RenderTargetView;
    type RootSignature = D3d12RootSignature;
    type PipelineState = D3d12PipelineState;
    type UploadBuffer = D3d12UploadBuffer;
}

/// Debug layer settings, applied before any device exists
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugLayer {
    pub enabled: bool,
    pub gpu_based_validation: bool,
    /// Break into the debugger on corruption, error and warning messages
    pub break_on_error: bool,
}

pub struct D3d12Factory {
    factory: IDXGIFactory6,
    debug: DebugLayer,
}

impl D3d12Factory {
    pub fn new(debug: DebugLayer) -> Result<Self, BackendError> {
        let active = debug.enabled && enable_debug_layer(debug.gpu_based_validation);
        let (debug, flags) = resolve_debug_layer(debug, active);

        let factory: IDXGIFactory6 = unsafe { CreateDXGIFactory2(flags) }
            .map_err(|e| BackendError::creation("DXGI factory", e))?;

        Ok(Self { factory, debug })
    }
}

/// Returns whether the layer came up. Without the Graphics Tools feature
/// there is no debug interface and the run carries on without validation.
fn enable_debug_layer(gpu_based_validation: bool) -> bool {
    let mut debug: Option<ID3D12Debug1> = None;
    if let Err(e) = unsafe { D3D12GetDebugInterface(&mut debug) } {
        log::warn!("D3D12 debug layer unavailable, continuing without it: {}", e);
        return false;
    }
    let Some(debug) = debug else {
        log::warn!("D3D12 debug layer unavailable, continuing without it: null interface");
        return false;
    };

    unsafe {
        debug.EnableDebugLayer();
        if gpu_based_validation {
            debug.SetEnableGPUBasedValidation(true);
        }
    }

    log::warn!(
        "D3D12 debug layer enabled (GPU-based validation: {})",
        gpu_based_validation
    );
    true
}

/// Settings and factory flags once it is known whether the layer is on
fn resolve_debug_layer(requested: DebugLayer, active: bool) -> (DebugLayer, DXGI_CREATE_FACTORY_FLAGS) {
    if active {
        (requested, DXGI_CREATE_FACTORY_DEBUG)
    } else {
        (DebugLayer { enabled: false, ..requested }, DXGI_CREATE_FACTORY_FLAGS(0))
    }
}

impl Factory<D3d12Backend> for D3d12Factory {
    fn enum_adapter_by_preference(&self, index: u32) -> Result<Option<D3d12Adapter>, BackendError> {
        let adapter = unsafe {
            self.factory
                .EnumAdapterByGpuPreference::<IDXGIAdapter1>(index, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
        };

        match adapter {
            Ok(adapter) => Ok(Some(D3d12Adapter { adapter, debug: self.debug })),
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => Ok(None),
            Err(e) => Err(BackendError::api("EnumAdapterByGpuPreference", e)),
        }
    }

    fn create_swap_chain(
        &self,
        queue: &D3d12CommandQueue,
        surface: &Surface,
        desc: &SwapChainDesc,
    ) -> Result<D3d12SwapChain, BackendError> {
        D3d12SwapChain::new(&self.factory, queue, surface, desc)
    }
}

pub struct D3d12Adapter {
    adapter: IDXGIAdapter1,
    debug: DebugLayer,
}

impl Adapter<D3d12Backend> for D3d12Adapter {
    fn info(&self) -> Result<AdapterInfo, BackendError> {
        let desc = unsafe { self.adapter.GetDesc1() }.map_err(|e| BackendError::api("GetDesc1", e))?;

        let len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        Ok(AdapterInfo {
            description: String::from_utf16_lossy(&desc.Description[..len]),
            software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
            dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        })
    }

    fn create_device(&self, level: FeatureLevel) -> Result<D3d12Device, BackendError> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&self.adapter, d3d_feature_level(level), &mut device) }.map_err(|e| {
            if rejects_feature_level(e.code()) {
                BackendError::FeatureLevelUnsupported(level)
            } else {
                api_error("D3D12CreateDevice")(e)
            }
        })?;
        let device = device.ok_or(BackendError::FeatureLevelUnsupported(level))?;

        if self.debug.enabled && self.debug.break_on_error {
            break_on_validation_errors(&device)?;
        }

        Ok(D3d12Device::new(device))
    }
}

/// Only these mean "try the next level down"; anything else is a real failure
fn rejects_feature_level(code: HRESULT) -> bool {
    code == E_INVALIDARG || code == DXGI_ERROR_UNSUPPORTED
}

/// Messages dropped from the info queue before they are stored
const DENIED_MESSAGE_IDS: [D3D12_MESSAGE_ID; 1] =
    [D3D12_MESSAGE_ID_RESOURCE_BARRIER_MISMATCHING_COMMAND_LIST_TYPE];
const DENIED_SEVERITIES: [D3D12_MESSAGE_SEVERITY; 1] = [D3D12_MESSAGE_SEVERITY_INFO];

fn break_on_validation_errors(device: &ID3D12Device) -> Result<(), BackendError> {
    // The info queue only exists while the debug layer is active
    let Ok(info_queue) = device.cast::<ID3D12InfoQueue>() else {
        log::warn!("Debug layer active but ID3D12InfoQueue is unavailable");
        return Ok(());
    };

    let mut ids = DENIED_MESSAGE_IDS;
    let mut severities = DENIED_SEVERITIES;
    let filter = D3D12_INFO_QUEUE_FILTER {
        DenyList: D3D12_INFO_QUEUE_FILTER_DESC {
            NumIDs: ids.len() as u32,
            pIDList: ids.as_mut_ptr(),
            NumSeverities: severities.len() as u32,
            pSeverityList: severities.as_mut_ptr(),
            ..Default::default()
        },
        ..Default::default()
    };

    unsafe {
        // The queue copies the lists, so the arrays only need to outlive the call
        info_queue
            .PushStorageFilter(&filter)
            .map_err(|e| BackendError::api("PushStorageFilter", e))?;

        for severity in [
            D3D12_MESSAGE_SEVERITY_CORRUPTION,
            D3D12_MESSAGE_SEVERITY_ERROR,
            D3D12_MESSAGE_SEVERITY_WARNING,
        ] {
            info_queue
                .SetBreakOnSeverity(severity, true)
                .map_err(|e| BackendError::api("SetBreakOnSeverity", e))?;
        }
    }
    Ok(())
}

// ============================================================================
// Conversions
// ============================================================================

fn d3d_feature_level(level: FeatureLevel) -> D3D_FEATURE_LEVEL {
    match level {
        FeatureLevel::Level11_0 => D3D_FEATURE_LEVEL_11_0,
        FeatureLevel::Level11_1 => D3D_FEATURE_LEVEL_11_1,
        FeatureLevel::Level12_0 => D3D_FEATURE_LEVEL_12_0,
        FeatureLevel::Level12_1 => D3D_FEATURE_LEVEL_12_1,
        FeatureLevel::Level12_2 => D3D_FEATURE_LEVEL_12_2,
    }
}

fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        TextureFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
    }
}

fn resource_states(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
    }
}

/// Map a failed call, reporting a lost device separately
fn api_error(call: &'static str) -> impl FnOnce(windows::core::Error) -> BackendError {
    move |e| {
        let code = e.code();
        if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == DXGI_ERROR_DEVICE_HUNG {
            BackendError::DeviceRemoved(format!("{}: {}", call, e))
        } else {
            BackendError::api(call, e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_debug_layer_runs_without_debug_flags() {
        let requested = DebugLayer { enabled: true, gpu_based_validation: true, break_on_error: true };

        let (debug, flags) = resolve_debug_layer(requested, false);
        assert!(!debug.enabled);
        assert_eq!(flags, DXGI_CREATE_FACTORY_FLAGS(0));

        let (debug, flags) = resolve_debug_layer(requested, true);
        assert!(debug.enabled);
        assert_eq!(flags, DXGI_CREATE_FACTORY_DEBUG);
    }

    #[test]
    fn only_unsupported_levels_fall_through_the_ladder() {
        assert!(rejects_feature_level(E_INVALIDARG));
        assert!(rejects_feature_level(DXGI_ERROR_UNSUPPORTED));
        assert!(!rejects_feature_level(E_OUTOFMEMORY));
        assert!(!rejects_feature_level(DXGI_ERROR_DEVICE_REMOVED));
    }

    #[test]
    fn storage_filter_denies_info_but_keeps_errors() {
        assert!(DENIED_SEVERITIES.contains(&D3D12_MESSAGE_SEVERITY_INFO));
        for kept in [
            D3D12_MESSAGE_SEVERITY_CORRUPTION,
            D3D12_MESSAGE_SEVERITY_ERROR,
            D3D12_MESSAGE_SEVERITY_WARNING,
        ] {
            assert!(!DENIED_SEVERITIES.contains(&kept));
        }
        assert_eq!(DENIED_MESSAGE_IDS, [D3D12_MESSAGE_ID_RESOURCE_BARRIER_MISMATCHING_COMMAND_LIST_TYPE]);
    }
}
