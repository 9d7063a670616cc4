// DXGI flip-model swap chain
//
// Fixed configuration: R8G8B8A8_UNORM, no multisampling, flip-discard.
// Alt+Enter fullscreen switching is disabled on the window.

use std::ffi::c_void;

use raw_window_handle::RawWindowHandle;
use windows::core::Interface;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::buffer::D3d12Resource;
use super::command::D3d12CommandQueue;
use super::{api_error, dxgi_format, D3d12Backend};
use crate::backend::{BackendError, Surface, SwapChain, SwapChainDesc};

pub struct D3d12SwapChain {
    swap_chain: IDXGISwapChain3,
}

impl D3d12SwapChain {
    pub(crate) fn new(
        factory: &IDXGIFactory6,
        queue: &D3d12CommandQueue,
        surface: &Surface,
        desc: &SwapChainDesc,
    ) -> Result<Self, BackendError> {
        let hwnd = match surface {
            Surface::Window(RawWindowHandle::Win32(handle)) => HWND(handle.hwnd.get() as *mut c_void),
            Surface::Window(other) => {
                return Err(BackendError::creation(
                    "swap chain",
                    format!("unsupported window handle {:?}", other),
                ))
            }
            Surface::Offscreen => {
                return Err(BackendError::creation("swap chain", "DXGI needs a window to present to"))
            }
        };

        log::info!(
            "Creating swap chain: {}x{}, {} buffers, {:?}",
            desc.width,
            desc.height,
            desc.buffer_count,
            desc.format
        );

        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC { Count: desc.sample_count, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: desc.buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let swap_chain: IDXGISwapChain1 = unsafe {
            factory.CreateSwapChainForHwnd(&queue.queue, hwnd, &swap_chain_desc, None, None)
        }
        .map_err(|e| BackendError::creation("swap chain", e))?;

        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) }
            .map_err(|e| BackendError::api("MakeWindowAssociation", e))?;

        // GetCurrentBackBufferIndex lives on IDXGISwapChain3
        let swap_chain: IDXGISwapChain3 =
            swap_chain.cast().map_err(|e| BackendError::creation("swap chain", e))?;

        Ok(Self { swap_chain })
    }
}

impl SwapChain<D3d12Backend> for D3d12SwapChain {
    fn current_back_buffer_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn buffer(&self, index: u32) -> Result<D3d12Resource, BackendError> {
        let resource = unsafe { self.swap_chain.GetBuffer(index) }.map_err(api_error("GetBuffer"))?;
        Ok(D3d12Resource { resource })
    }

    fn present(&self, sync_interval: u32) -> Result<(), BackendError> {
        unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }
            .ok()
            .map_err(api_error("Present"))
    }
}
