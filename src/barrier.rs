// Resource state tracking and the back-buffer render pass
//
// The tracker holds the last-known state of every registered resource and
// refuses transitions whose "before" does not match it. `RenderPass` is the
// only way to bind and draw into a back buffer: it opens with
// Present -> RenderTarget and closes with RenderTarget -> Present, either in
// `finish` or on drop, so no frame can skip a half of the bracket.

use std::collections::HashMap;

use crate::backend::{Backend, CommandList, GpuResource, ResourceId, ResourceState};
use crate::command::Recorder;
use crate::error::{RenderError, RenderResult};
use crate::swapchain::BackBuffer;

#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    states: HashMap<ResourceId, ResourceState>,
    barriers_emitted: u64,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: ResourceId, state: ResourceState) {
        self.states.insert(resource, state);
    }

    pub fn state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.states.get(&resource).copied()
    }

    pub fn barriers_emitted(&self) -> u64 {
        self.barriers_emitted
    }

    /// Record a transition barrier into `list`.
    ///
    /// Returns `Ok(false)` without emitting anything when `before == after`.
    /// A `before` that disagrees with the tracked state is an error and
    /// leaves the tracked state untouched.
    pub fn transition<B: Backend>(
        &mut self,
        list: &B::CommandList,
        resource: &B::Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> RenderResult<bool> {
        let id = resource.id();
        let actual = self.state(id).ok_or(RenderError::UntrackedResource(id))?;

        if actual != before {
            return Err(RenderError::InvalidTransition { resource: id, expected: before, actual });
        }
        if before == after {
            return Ok(false);
        }

        list.resource_barrier(resource, before, after);
        self.states.insert(id, after);
        self.barriers_emitted += 1;
        Ok(true)
    }
}

/// Proof that a back buffer was returned to `Present` this frame.
/// Only `RenderPass::finish` creates one; presenting consumes it.
#[derive(Debug)]
pub struct PresentReady {
    pub(crate) back_buffer: u32,
    pub(crate) resource: ResourceId,
}

impl PresentReady {
    pub fn back_buffer(&self) -> u32 {
        self.back_buffer
    }
}

pub struct RenderPass<'a, B: Backend> {
    recorder: Recorder<'a, B>,
    tracker: &'a mut ResourceStateTracker,
    back_buffer: &'a BackBuffer<B>,
    finished: bool,
}

impl<'a, B: Backend> RenderPass<'a, B> {
    /// Transition the back buffer to `RenderTarget` and bind its view
    pub fn begin(
        recorder: Recorder<'a, B>,
        tracker: &'a mut ResourceStateTracker,
        back_buffer: &'a BackBuffer<B>,
    ) -> RenderResult<Self> {
        tracker.transition::<B>(
            recorder.list(),
            &back_buffer.resource,
            ResourceState::Present,
            ResourceState::RenderTarget,
        )?;
        recorder.list().set_render_target(&back_buffer.rtv);

        Ok(Self { recorder, tracker, back_buffer, finished: false })
    }

    pub fn clear(&self, color: [f32; 4]) {
        self.recorder.list().clear_render_target(&self.back_buffer.rtv, color);
    }

    /// State setters for the draw
    pub fn recorder(&self) -> &Recorder<'a, B> {
        &self.recorder
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        self.recorder.list().draw_instanced(vertex_count, instance_count, 0, 0);
    }

    /// Close the bracket: RenderTarget -> Present
    pub fn finish(mut self) -> RenderResult<PresentReady> {
        self.finished = true;
        self.tracker.transition::<B>(
            self.recorder.list(),
            &self.back_buffer.resource,
            ResourceState::RenderTarget,
            ResourceState::Present,
        )?;

        Ok(PresentReady { back_buffer: self.back_buffer.index, resource: self.back_buffer.resource.id() })
    }
}

impl<'a, B: Backend> Drop for RenderPass<'a, B> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        // Abandoned pass (an error unwound past it): still hand the buffer back
        if let Err(e) = self.tracker.transition::<B>(
            self.recorder.list(),
            &self.back_buffer.resource,
            ResourceState::RenderTarget,
            ResourceState::Present,
        ) {
            log::error!("Failed to close render pass on back buffer {}: {}", self.back_buffer.index, e);
        }
    }
}
