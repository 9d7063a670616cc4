// D3D12 device - creates every GPU object the frame pipeline uses

use windows::Win32::Graphics::Direct3D12::*;

use super::buffer::{D3d12DescriptorHeap, D3d12RenderTargetView, D3d12Resource, D3d12UploadBuffer};
use super::command::{D3d12CommandAllocator, D3d12CommandList, D3d12CommandQueue};
use super::pipeline::{self, D3d12PipelineState, D3d12RootSignature};
use super::sync::D3d12Fence;
use super::{dxgi_format, D3d12Backend};
use crate::backend::{BackendError, Device, PipelineStateDesc, RootSignatureDesc, TextureFormat};

pub struct D3d12Device {
    pub(crate) device: ID3D12Device,
}

impl D3d12Device {
    pub(crate) fn new(device: ID3D12Device) -> Self {
        Self { device }
    }
}

impl Device<D3d12Backend> for D3d12Device {
    fn create_command_queue(&self) -> Result<D3d12CommandQueue, BackendError> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .map_err(|e| BackendError::creation("command queue", e))?;

        Ok(D3d12CommandQueue { queue })
    }

    fn create_command_allocator(&self) -> Result<D3d12CommandAllocator, BackendError> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(|e| BackendError::creation("command allocator", e))?;

        Ok(D3d12CommandAllocator { allocator })
    }

    fn create_command_list(
        &self,
        allocator: &D3d12CommandAllocator,
    ) -> Result<D3d12CommandList, BackendError> {
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator.allocator, None)
        }
        .map_err(|e| BackendError::creation("command list", e))?;

        D3d12CommandList::new(list)
    }

    fn create_fence(&self, initial_value: u64) -> Result<D3d12Fence, BackendError> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| BackendError::creation("fence", e))?;

        D3d12Fence::new(fence)
    }

    fn create_rtv_heap(&self, capacity: u32) -> Result<D3d12DescriptorHeap, BackendError> {
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                NumDescriptors: capacity,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            })
        }
        .map_err(|e| BackendError::creation("RTV descriptor heap", e))?;

        let increment =
            unsafe { self.device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) };

        Ok(D3d12DescriptorHeap { heap, increment, capacity })
    }

    fn create_render_target_view(
        &self,
        heap: &D3d12DescriptorHeap,
        slot: u32,
        resource: &D3d12Resource,
        format: TextureFormat,
    ) -> Result<D3d12RenderTargetView, BackendError> {
        let handle = heap.cpu_handle(slot).ok_or_else(|| {
            BackendError::creation(
                "render target view",
                format!("slot {} outside heap of {} descriptors", slot, heap.capacity),
            )
        })?;

        let desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: dxgi_format(format),
            ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
            ..Default::default()
        };
        unsafe { self.device.CreateRenderTargetView(&resource.resource, Some(&desc), handle) };

        Ok(D3d12RenderTargetView { handle })
    }

    fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> Result<D3d12RootSignature, BackendError> {
        pipeline::create_root_signature(&self.device, desc)
    }

    fn create_pipeline_state(
        &self,
        desc: &PipelineStateDesc<'_, D3d12Backend>,
    ) -> Result<D3d12PipelineState, BackendError> {
        pipeline::create_pipeline_state(&self.device, desc)
    }

    fn create_upload_buffer(&self, size: u64) -> Result<D3d12UploadBuffer, BackendError> {
        D3d12UploadBuffer::new(&self.device, size).map_err(|e| match e {
            BackendError::Api { reason, .. } => BackendError::creation("upload buffer", reason),
            other => other,
        })
    }

    fn removed_reason(&self) -> Option<String> {
        unsafe { self.device.GetDeviceRemovedReason() }.err().map(|e| e.to_string())
    }
}
