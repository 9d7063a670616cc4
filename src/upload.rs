// Per-frame upload memory
//
// A small ring of persistently mapped upload buffers. Each frame bump-
// allocates its vertices and constants out of one slot; the slot is tagged
// with the fence value that retires it and is only handed out again once
// the GPU has passed that value. Buffers are created once at startup, so
// the number of live upload allocations never grows with the frame count.

use bytemuck::Pod;

use crate::backend::{Backend, Device, UploadBuffer};
use crate::error::{RenderError, RenderResult};

/// Constant buffer views must start on 256-byte boundaries
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

pub const DEFAULT_SLOT_COUNT: usize = 2;
pub const DEFAULT_SLOT_SIZE: u64 = 64 * 1024;

/// Where a push landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadAllocation {
    pub gpu_address: u64,
    pub offset: u64,
    pub size: u64,
}

struct UploadSlot<B: Backend> {
    buffer: B::UploadBuffer,
    cursor: u64,
    /// Fence value that must complete before the slot is rewritten; 0 = never used
    retire_value: u64,
}

pub struct UploadRing<B: Backend> {
    slots: Vec<UploadSlot<B>>,
    current: usize,
    in_frame: bool,
}

impl<B: Backend> UploadRing<B> {
    pub fn new(device: &B::Device, slot_count: usize, slot_size: u64) -> RenderResult<Self> {
        let slot_count = slot_count.max(1);
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            let buffer = device
                .create_upload_buffer(slot_size)
                .map_err(RenderError::startup("upload buffer"))?;
            slots.push(UploadSlot { buffer, cursor: 0, retire_value: 0 });
        }

        log::debug!("Upload ring: {} slot(s) of {} bytes", slot_count, slot_size);

        // Start one before slot 0 so the first begin_frame lands on it
        Ok(Self { current: slot_count - 1, slots, in_frame: false })
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Move to the next slot. `completed` is the fence's completed value;
    /// the slot must have been retired by it.
    pub fn begin_frame(&mut self, completed: u64) -> RenderResult<()> {
        let next = (self.current + 1) % self.slots.len();
        let slot = &mut self.slots[next];
        if slot.retire_value > completed {
            return Err(RenderError::UploadSlotBusy {
                slot: next,
                retire: slot.retire_value,
                completed,
            });
        }

        slot.cursor = 0;
        self.current = next;
        self.in_frame = true;
        Ok(())
    }

    /// Copy `bytes` into the current slot at the next `align`-ed offset
    pub fn push(&mut self, bytes: &[u8], align: u64) -> RenderResult<UploadAllocation> {
        let index = self.current;
        let slot = &mut self.slots[index];
        let capacity = slot.buffer.size();
        let offset = slot.cursor.next_multiple_of(align.max(1));
        let size = bytes.len() as u64;

        if offset + size > capacity {
            return Err(RenderError::UploadExhausted {
                slot: index,
                requested: size,
                available: capacity.saturating_sub(offset),
            });
        }

        slot.buffer.write(offset, bytes)?;
        slot.cursor = offset + size;

        Ok(UploadAllocation { gpu_address: slot.buffer.gpu_address() + offset, offset, size })
    }

    pub fn push_slice<T: Pod>(&mut self, items: &[T]) -> RenderResult<UploadAllocation> {
        self.push(bytemuck::cast_slice(items), std::mem::align_of::<T>() as u64)
    }

    /// Constant-buffer data, placed on a CBV boundary
    pub fn push_constants<T: Pod>(&mut self, value: &T) -> RenderResult<UploadAllocation> {
        self.push(bytemuck::bytes_of(value), CONSTANT_BUFFER_ALIGNMENT)
    }

    /// Tag the current slot with the fence value signaled behind its reads
    pub fn end_frame(&mut self, retire_value: u64) {
        if self.in_frame {
            self.slots[self.current].retire_value = retire_value;
            self.in_frame = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig, HeadlessDevice, HeadlessFactory};
    use crate::backend::{Adapter, Factory, FeatureLevel};
    use rstest::rstest;

    fn device() -> (HeadlessFactory, HeadlessDevice) {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        (factory, device)
    }

    #[test]
    fn constants_start_on_cbv_boundary() {
        let (_factory, device) = device();
        let mut ring = UploadRing::<HeadlessBackend>::new(&device, 2, 4096).unwrap();
        ring.begin_frame(0).unwrap();

        let vertices = ring.push_slice(&[[0.0f32; 4]; 3]).unwrap();
        let constants = ring.push_constants(&[1.0f32; 4]).unwrap();

        assert_eq!(vertices.offset, 0);
        assert_eq!(vertices.size, 48);
        assert_eq!(constants.offset, 256);
        assert_eq!(constants.gpu_address % CONSTANT_BUFFER_ALIGNMENT, 0);
    }

    #[test]
    fn overflow_is_an_error() {
        let (_factory, device) = device();
        let mut ring = UploadRing::<HeadlessBackend>::new(&device, 1, 256).unwrap();
        ring.begin_frame(0).unwrap();
        ring.push(&[0; 200], 1).unwrap();

        let err = ring.push(&[0; 100], 1).unwrap_err();
        assert!(matches!(err, RenderError::UploadExhausted { slot: 0, requested: 100, available: 56 }));
    }

    #[rstest]
    #[case(0, true)]
    #[case(1, false)]
    #[case(5, false)]
    fn slot_reuse_waits_for_retire_value(#[case] completed: u64, #[case] busy: bool) {
        let (_factory, device) = device();
        let mut ring = UploadRing::<HeadlessBackend>::new(&device, 1, 256).unwrap();
        ring.begin_frame(0).unwrap();
        ring.end_frame(1);

        let result = ring.begin_frame(completed);
        assert_eq!(result.is_err(), busy);
    }

    #[test]
    fn slots_rotate_without_new_buffers() {
        let (factory, device) = device();
        let mut ring = UploadRing::<HeadlessBackend>::new(&device, 2, 1024).unwrap();

        for frame in 1..=10u64 {
            ring.begin_frame(frame - 1).unwrap();
            assert_eq!(ring.current_slot(), ((frame - 1) % 2) as usize);
            ring.push(&[7; 64], 16).unwrap();
            ring.end_frame(frame);
        }

        assert_eq!(factory.gpu_handle().stats().upload_buffers_created, 2);
    }
}
