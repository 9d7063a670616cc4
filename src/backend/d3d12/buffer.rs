// Resources, descriptor heaps and upload buffers
//
// Upload buffers are committed resources on the upload heap, mapped once at
// creation and kept mapped until release (upload heaps allow this).

use std::ffi::c_void;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::backend::{BackendError, GpuResource, ResourceId, UploadBuffer};

#[derive(Clone, Debug)]
pub struct D3d12Resource {
    pub(crate) resource: ID3D12Resource,
}

impl GpuResource for D3d12Resource {
    fn id(&self) -> ResourceId {
        ResourceId(self.resource.as_raw() as u64)
    }
}

pub struct D3d12DescriptorHeap {
    pub(crate) heap: ID3D12DescriptorHeap,
    pub(crate) increment: u32,
    pub(crate) capacity: u32,
}

impl D3d12DescriptorHeap {
    pub(crate) fn cpu_handle(&self, slot: u32) -> Option<D3D12_CPU_DESCRIPTOR_HANDLE> {
        if slot >= self.capacity {
            return None;
        }
        let start = unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() };
        Some(D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + (slot * self.increment) as usize,
        })
    }
}

#[derive(Clone, Copy)]
pub struct D3d12RenderTargetView {
    pub(crate) handle: D3D12_CPU_DESCRIPTOR_HANDLE,
}

impl std::fmt::Debug for D3d12RenderTargetView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "D3d12RenderTargetView({:#x})", self.handle.ptr)
    }
}

pub struct D3d12UploadBuffer {
    resource: ID3D12Resource,
    mapped: *mut u8,
    size: u64,
    gpu_address: u64,
}

impl D3d12UploadBuffer {
    pub(crate) fn new(device: &ID3D12Device, size: u64) -> Result<Self, BackendError> {
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_UPLOAD,
                    ..Default::default()
                },
                D3D12_HEAP_FLAG_NONE,
                &D3D12_RESOURCE_DESC {
                    Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
                    Width: size,
                    Height: 1,
                    DepthOrArraySize: 1,
                    MipLevels: 1,
                    SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                    Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                    ..Default::default()
                },
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )
        }
        .map_err(|e| BackendError::api("CreateCommittedResource", e))?;
        let resource = resource.ok_or_else(|| BackendError::api("CreateCommittedResource", "null resource"))?;

        let mut mapped: *mut c_void = std::ptr::null_mut();
        unsafe { resource.Map(0, None, Some(&mut mapped)) }.map_err(|e| BackendError::api("Map", e))?;
        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };

        Ok(Self { resource, mapped: mapped as *mut u8, size, gpu_address })
    }
}

impl UploadBuffer for D3d12UploadBuffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), BackendError> {
        if offset + data.len() as u64 > self.size {
            return Err(BackendError::api(
                "Map",
                format!("write of {} bytes at {} exceeds buffer of {}", data.len(), offset, self.size),
            ));
        }

        // Safety: the range was checked against the mapped size above
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.add(offset as usize), data.len());
        }
        Ok(())
    }
}

impl Drop for D3d12UploadBuffer {
    fn drop(&mut self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}
