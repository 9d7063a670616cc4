// Simulated GPU timeline
//
// Queue operations are appended in submission order and retired one by one,
// either inline (Immediate), lazily from a fence wait (OnWait), by a worker
// thread with a fixed latency per operation (Threaded), or never (Hung).
//
// While retiring operations the timeline validates what the D3D12 debug
// layer would complain about: wrong barrier "before" states, rendering into
// a buffer that is not a render target, presenting a buffer that is not in
// the present state. CPU-side hazards (allocator resets and upload buffer
// writes/releases while the GPU still references them) are checked against
// the operations that are still pending.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::backend::{
    BackendError, PrimitiveTopology, ResourceId, ResourceState, ScissorRect, VertexBufferView,
    Viewport, WaitStatus,
};

/// How the simulated GPU retires submitted work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTiming {
    /// Work completes inside the submitting call
    Immediate,
    /// Work completes only when the CPU waits on a fence
    OnWait,
    /// A worker thread completes one operation per `latency`
    Threaded { latency: Duration },
    /// Nothing ever completes
    Hung,
}

/// A command as recorded into a command list
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Barrier {
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTarget {
        resource: ResourceId,
        slot: u32,
    },
    ClearRenderTarget {
        resource: ResourceId,
        color: [f32; 4],
    },
    SetViewport(Viewport),
    SetScissorRect(ScissorRect),
    SetRootSignature,
    SetPipelineState,
    SetVertexBuffer {
        slot: u32,
        view: VertexBufferView,
    },
    SetPrimitiveTopology(PrimitiveTopology),
    SetRootConstantBuffer {
        parameter: u32,
        gpu_address: u64,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
}

impl RecordedCommand {
    /// GPU virtual address read by this command, if any
    fn gpu_address(&self) -> Option<u64> {
        match self {
            Self::SetVertexBuffer { view, .. } => Some(view.gpu_address),
            Self::SetRootConstantBuffer { gpu_address, .. } => Some(*gpu_address),
            _ => None,
        }
    }
}

/// What the GPU did, in execution order
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEvent {
    Command { list: u64, command: RecordedCommand },
    Signal { fence: u64, value: u64 },
    Present { resource: ResourceId, back_buffer: u32 },
}

/// Object creation and usage counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub devices: usize,
    pub command_queues: usize,
    pub command_allocators: usize,
    pub command_lists: usize,
    pub fences: usize,
    pub swap_chains: usize,
    pub render_target_views: usize,
    pub root_signatures: usize,
    pub pipeline_states: usize,
    pub upload_buffers_created: usize,
    pub upload_buffers_released: usize,
    pub batches_executed: usize,
    pub presents: usize,
    pub allocator_resets: usize,
    pub list_resets: usize,
}

#[derive(Debug)]
pub(crate) struct Batch {
    pub list: u64,
    pub allocator: u64,
    pub commands: Vec<RecordedCommand>,
}

#[derive(Debug)]
pub(crate) enum QueueOp {
    Execute(Batch),
    Signal { fence: u64, value: u64 },
    Present { resource: ResourceId, back_buffer: u32 },
}

impl QueueOp {
    fn references(&self, start: u64, end: u64) -> bool {
        match self {
            Self::Execute(batch) => batch
                .commands
                .iter()
                .filter_map(RecordedCommand::gpu_address)
                .any(|address| address >= start && address < end),
            _ => false,
        }
    }
}

// Upload heap addresses start here and are handed out on 64 KiB boundaries
const GPU_VA_BASE: u64 = 0x0000_0001_0000_0000;
const GPU_VA_ALIGNMENT: u64 = 64 * 1024;

pub(crate) struct GpuState {
    pending: VecDeque<QueueOp>,
    fences: HashMap<u64, u64>,
    resource_states: HashMap<ResourceId, ResourceState>,
    in_flight_allocators: HashMap<u64, usize>,
    upload_ranges: HashMap<u64, (u64, u64)>,
    validation: Vec<String>,
    timeline: Vec<TimelineEvent>,
    record_timeline: bool,
    pub stats: HeadlessStats,
    removed: bool,
    next_id: u64,
    next_gpu_address: u64,
}

impl GpuState {
    fn new(record_timeline: bool) -> Self {
        Self {
            pending: VecDeque::new(),
            fences: HashMap::new(),
            resource_states: HashMap::new(),
            in_flight_allocators: HashMap::new(),
            upload_ranges: HashMap::new(),
            validation: Vec::new(),
            timeline: Vec::new(),
            record_timeline,
            stats: HeadlessStats::default(),
            removed: false,
            next_id: 1,
            next_gpu_address: GPU_VA_BASE,
        }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn report(&mut self, message: String) {
        log::error!("[headless validation] {}", message);
        self.validation.push(message);
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn register_resource(&mut self, state: ResourceState) -> ResourceId {
        let id = ResourceId(self.next_id());
        self.resource_states.insert(id, state);
        id
    }

    pub fn register_fence(&mut self, initial_value: u64) -> u64 {
        let id = self.next_id();
        self.fences.insert(id, initial_value);
        self.stats.fences += 1;
        id
    }

    pub fn fence_value(&self, fence: u64) -> u64 {
        if self.removed {
            return u64::MAX;
        }
        self.fences.get(&fence).copied().unwrap_or(0)
    }

    pub fn register_upload_range(&mut self, size: u64) -> (u64, u64) {
        let id = self.next_id();
        let address = self.next_gpu_address;
        let span = size.div_ceil(GPU_VA_ALIGNMENT).max(1) * GPU_VA_ALIGNMENT;
        self.next_gpu_address += span;
        self.upload_ranges.insert(id, (address, size));
        self.stats.upload_buffers_created += 1;
        (id, address)
    }

    pub fn release_upload_range(&mut self, id: u64) {
        if let Some((address, size)) = self.upload_ranges.remove(&id) {
            if self.pending_reference(address, address + size) {
                self.report(format!(
                    "upload buffer at {:#x} released while pending GPU work still reads it",
                    address
                ));
            }
        }
        self.stats.upload_buffers_released += 1;
    }

    pub fn pending_reference(&self, start: u64, end: u64) -> bool {
        self.pending.iter().any(|op| op.references(start, end))
    }

    pub fn allocator_in_flight(&self, allocator: u64) -> bool {
        self.in_flight_allocators.get(&allocator).copied().unwrap_or(0) > 0
    }

    /// `true` if a pending signal will bring `fence` to at least `value`
    fn signal_pending(&self, fence: u64, value: u64) -> bool {
        self.pending.iter().any(|op| {
            matches!(op, QueueOp::Signal { fence: f, value: v } if *f == fence && *v >= value)
        })
    }

    fn enqueue(&mut self, op: QueueOp) {
        if let QueueOp::Execute(batch) = &op {
            *self.in_flight_allocators.entry(batch.allocator).or_insert(0) += 1;
            self.stats.batches_executed += 1;
        }
        self.pending.push_back(op);
    }

    fn retire_front(&mut self) -> bool {
        match self.pending.pop_front() {
            Some(op) => {
                self.apply(op);
                true
            }
            None => false,
        }
    }

    fn record(&mut self, event: TimelineEvent) {
        if self.record_timeline {
            self.timeline.push(event);
        }
    }

    fn apply(&mut self, op: QueueOp) {
        match op {
            QueueOp::Execute(batch) => {
                self.apply_batch(&batch);
                if let Some(count) = self.in_flight_allocators.get_mut(&batch.allocator) {
                    *count = count.saturating_sub(1);
                }
            }
            QueueOp::Signal { fence, value } => {
                let current = self.fences.entry(fence).or_insert(0);
                let previous = *current;
                *current = value;
                if value < previous {
                    self.report(format!(
                        "fence {} signaled to {} after already reaching {}",
                        fence, value, previous
                    ));
                }
                self.record(TimelineEvent::Signal { fence, value });
            }
            QueueOp::Present { resource, back_buffer } => {
                let state = self.resource_states.get(&resource).copied();
                if state != Some(ResourceState::Present) {
                    self.report(format!(
                        "back buffer {} ({}) presented in state {:?}, expected Present",
                        back_buffer, resource, state
                    ));
                }
                self.record(TimelineEvent::Present { resource, back_buffer });
            }
        }
    }

    fn apply_batch(&mut self, batch: &Batch) {
        let mut render_target = None;
        for command in &batch.commands {
            match command {
                RecordedCommand::Barrier { resource, before, after } => {
                    match self.resource_states.get(resource).copied() {
                        Some(actual) if actual == *before => {
                            self.resource_states.insert(*resource, *after);
                        }
                        Some(actual) => {
                            self.report(format!(
                                "barrier on {} declares before state {:?} but resource is in {:?}",
                                resource, before, actual
                            ));
                            self.resource_states.insert(*resource, *after);
                        }
                        None => self.report(format!("barrier on unknown resource {}", resource)),
                    }
                }
                RecordedCommand::SetRenderTarget { resource, .. } => {
                    render_target = Some(*resource);
                }
                RecordedCommand::ClearRenderTarget { resource, .. } => {
                    self.expect_render_target(*resource, "clear");
                }
                RecordedCommand::Draw { .. } => match render_target {
                    Some(resource) => self.expect_render_target(resource, "draw"),
                    None => self.report("draw with no render target bound".to_string()),
                },
                _ => {}
            }
            self.record(TimelineEvent::Command { list: batch.list, command: command.clone() });
        }
    }

    fn expect_render_target(&mut self, resource: ResourceId, what: &str) {
        let state = self.resource_states.get(&resource).copied();
        if state != Some(ResourceState::RenderTarget) {
            self.report(format!(
                "{} into {} while it is in state {:?}, expected RenderTarget",
                what, resource, state
            ));
        }
    }
}

pub(crate) struct Gpu {
    state: Mutex<GpuState>,
    progress: Condvar,
    timing: GpuTiming,
}

impl Gpu {
    pub fn new(timing: GpuTiming, record_timeline: bool) -> Arc<Self> {
        let gpu = Arc::new(Self {
            state: Mutex::new(GpuState::new(record_timeline)),
            progress: Condvar::new(),
            timing,
        });

        if let GpuTiming::Threaded { latency } = timing {
            let weak = Arc::downgrade(&gpu);
            let spawned = thread::Builder::new()
                .name("headless-gpu".into())
                .spawn(move || run_worker(weak, latency));
            if let Err(e) = spawned {
                log::error!("Failed to spawn headless GPU thread: {}", e);
            }
        }

        gpu
    }

    pub fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock()
    }

    pub fn submit(&self, op: QueueOp) {
        let mut state = self.state.lock();
        state.enqueue(op);
        if self.timing == GpuTiming::Immediate {
            while state.retire_front() {}
        }
        self.progress.notify_all();
    }

    /// Block until `fence` reaches `value`, the timeout passes, or it is
    /// clear that the value will never arrive.
    pub fn wait(
        &self,
        fence: u64,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<WaitStatus, BackendError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        loop {
            if state.fence_value(fence) >= value {
                return Ok(WaitStatus::Reached);
            }

            if self.timing == GpuTiming::OnWait && state.retire_front() {
                continue;
            }

            let can_progress = match self.timing {
                GpuTiming::Threaded { .. } => state.signal_pending(fence, value),
                _ => false,
            };

            match deadline {
                None if !can_progress => {
                    return Err(BackendError::NeverSignaled {
                        value,
                        completed: state.fence_value(fence),
                    });
                }
                None => self.progress.wait(&mut state),
                Some(deadline) => {
                    if self.progress.wait_until(&mut state, deadline).timed_out()
                        && state.fence_value(fence) < value
                    {
                        return Ok(WaitStatus::TimedOut);
                    }
                }
            }
        }
    }

    pub fn remove_device(&self) {
        let mut state = self.state.lock();
        state.removed = true;
        self.progress.notify_all();
    }

    pub fn rewind_fences(&self, value: u64) {
        let mut state = self.state.lock();
        for current in state.fences.values_mut() {
            *current = (*current).min(value);
        }
    }

    pub fn validation_messages(&self) -> Vec<String> {
        self.state.lock().validation.clone()
    }

    pub fn timeline(&self) -> Vec<TimelineEvent> {
        self.state.lock().timeline.clone()
    }

    pub fn clear_timeline(&self) {
        self.state.lock().timeline.clear();
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats.clone()
    }

    pub fn pending_operations(&self) -> usize {
        self.state.lock().pending.len()
    }
}

fn run_worker(gpu: Weak<Gpu>, latency: Duration) {
    log::debug!("Headless GPU thread started ({:?} per operation)", latency);

    while let Some(gpu) = gpu.upgrade() {
        {
            let mut state = gpu.state.lock();
            if state.pending.is_empty() {
                gpu.progress.wait_for(&mut state, Duration::from_millis(10));
                continue;
            }
        }

        // The operation stays queued while it "executes"
        thread::sleep(latency);

        let mut state = gpu.state.lock();
        state.retire_front();
        gpu.progress.notify_all();
    }

    log::debug!("Headless GPU thread stopped");
}

/// Read-only window onto the simulated GPU, for diagnostics and tests
#[derive(Clone)]
pub struct GpuHandle(pub(crate) Arc<Gpu>);

impl GpuHandle {
    pub fn stats(&self) -> HeadlessStats {
        self.0.stats()
    }

    pub fn validation_messages(&self) -> Vec<String> {
        self.0.validation_messages()
    }

    pub fn timeline(&self) -> Vec<TimelineEvent> {
        self.0.timeline()
    }

    pub fn clear_timeline(&self) {
        self.0.clear_timeline()
    }

    pub fn pending_operations(&self) -> usize {
        self.0.pending_operations()
    }

    /// Simulate a driver reset: every fence reads `u64::MAX` from now on
    pub fn remove_device(&self) {
        self.0.remove_device()
    }

    /// Simulate a stale driver read: every fence reports at most `value`
    /// until it is next signaled
    pub fn rewind_fences(&self, value: u64) {
        self.0.rewind_fences(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(allocator: u64, commands: Vec<RecordedCommand>) -> QueueOp {
        QueueOp::Execute(Batch { list: 1, allocator, commands })
    }

    #[test]
    fn immediate_timing_retires_on_submit() {
        let gpu = Gpu::new(GpuTiming::Immediate, true);
        let fence = gpu.lock().register_fence(0);

        gpu.submit(QueueOp::Signal { fence, value: 1 });

        assert_eq!(gpu.lock().fence_value(fence), 1);
        assert_eq!(gpu.pending_operations(), 0);
    }

    #[test]
    fn on_wait_timing_retires_lazily() {
        let gpu = Gpu::new(GpuTiming::OnWait, true);
        let fence = gpu.lock().register_fence(0);

        gpu.submit(QueueOp::Signal { fence, value: 1 });
        assert_eq!(gpu.lock().fence_value(fence), 0);

        assert_eq!(gpu.wait(fence, 1, None).unwrap(), WaitStatus::Reached);
        assert_eq!(gpu.lock().fence_value(fence), 1);
    }

    #[test]
    fn unbounded_wait_on_unsignaled_value_errors() {
        let gpu = Gpu::new(GpuTiming::Immediate, true);
        let fence = gpu.lock().register_fence(0);

        let err = gpu.wait(fence, 5, None).unwrap_err();
        assert!(matches!(err, BackendError::NeverSignaled { value: 5, completed: 0 }));
    }

    #[test]
    fn hung_gpu_times_out() {
        let gpu = Gpu::new(GpuTiming::Hung, true);
        let fence = gpu.lock().register_fence(0);
        gpu.submit(QueueOp::Signal { fence, value: 1 });

        let status = gpu.wait(fence, 1, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(status, WaitStatus::TimedOut);
    }

    #[test]
    fn threaded_gpu_completes_in_background() {
        let gpu = Gpu::new(GpuTiming::Threaded { latency: Duration::from_millis(2) }, true);
        let fence = gpu.lock().register_fence(0);
        gpu.submit(QueueOp::Signal { fence, value: 1 });

        assert_eq!(gpu.wait(fence, 1, None).unwrap(), WaitStatus::Reached);
    }

    #[test]
    fn wrong_barrier_before_state_is_reported() {
        let gpu = Gpu::new(GpuTiming::Immediate, true);
        let resource = gpu.lock().register_resource(ResourceState::Present);

        gpu.submit(batch(
            7,
            vec![RecordedCommand::Barrier {
                resource,
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            }],
        ));

        let messages = gpu.validation_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("declares before state"));
    }

    #[test]
    fn clear_outside_render_target_state_is_reported() {
        let gpu = Gpu::new(GpuTiming::Immediate, true);
        let resource = gpu.lock().register_resource(ResourceState::Present);

        gpu.submit(batch(
            7,
            vec![RecordedCommand::ClearRenderTarget { resource, color: [0.0; 4] }],
        ));

        assert_eq!(gpu.validation_messages().len(), 1);
    }

    #[test]
    fn releasing_referenced_upload_range_is_reported() {
        let gpu = Gpu::new(GpuTiming::OnWait, true);
        let (id, address) = gpu.lock().register_upload_range(1024);

        gpu.submit(batch(
            7,
            vec![RecordedCommand::SetRootConstantBuffer { parameter: 0, gpu_address: address }],
        ));
        gpu.lock().release_upload_range(id);

        let messages = gpu.validation_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("released while pending"));
    }

    #[test]
    fn removed_device_reads_max_fence_value() {
        let gpu = Gpu::new(GpuTiming::Hung, true);
        let fence = gpu.lock().register_fence(0);
        gpu.remove_device();

        assert_eq!(gpu.lock().fence_value(fence), u64::MAX);
        assert_eq!(gpu.wait(fence, 1, None).unwrap(), WaitStatus::Reached);
    }
}
