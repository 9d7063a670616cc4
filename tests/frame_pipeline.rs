// End-to-end frame loop against the headless backend

use std::time::{Duration, Instant};

use dx12_renderer::backend::headless::{
    AdapterSpec, GpuHandle, GpuTiming, HeadlessBackend, HeadlessConfig, HeadlessFactory,
    RecordedCommand, TimelineEvent,
};
use dx12_renderer::backend::{
    Adapter, CommandList, CommandQueue, Device, Factory, FeatureLevel, ResourceState, ShaderStage,
    Surface, UploadBuffer, VertexBufferView,
};
use dx12_renderer::pipeline::placeholder_bytecode;
use dx12_renderer::{RenderError, Renderer, RendererDesc, SceneState, ShaderSet, WaitPolicy};
use rstest::rstest;

fn shaders() -> ShaderSet {
    ShaderSet {
        vertex: placeholder_bytecode(ShaderStage::Vertex),
        pixel: placeholder_bytecode(ShaderStage::Pixel),
    }
}

fn setup(config: HeadlessConfig, desc: RendererDesc) -> (Renderer<HeadlessBackend>, GpuHandle) {
    let factory = HeadlessFactory::new(config);
    let gpu = factory.gpu_handle();
    let renderer = Renderer::new(&factory, &Surface::Offscreen, &desc, &shaders()).unwrap();
    (renderer, gpu)
}

fn with_timing(timing: GpuTiming) -> HeadlessConfig {
    HeadlessConfig { timing, ..HeadlessConfig::default() }
}

#[test]
fn device_falls_back_to_feature_level_12_0() {
    let config = HeadlessConfig {
        adapters: vec![
            AdapterSpec::software("Microsoft Basic Render Driver"),
            AdapterSpec::hardware("Older GPU", FeatureLevel::Level12_0),
        ],
        ..HeadlessConfig::default()
    };

    let (mut renderer, gpu) = setup(config, RendererDesc::default());

    assert_eq!(renderer.adapter_info().description, "Older GPU");
    assert_eq!(renderer.feature_level(), FeatureLevel::Level12_0);
    renderer.render_frame(&SceneState::default()).unwrap();
    assert!(gpu.validation_messages().is_empty());
}

#[test]
fn no_feature_level_accepted_is_fatal() {
    let factory = HeadlessFactory::new(HeadlessConfig {
        adapters: vec![AdapterSpec::hardware("Ancient GPU", FeatureLevel::Level11_1)],
        ..HeadlessConfig::default()
    });

    let err = Renderer::<HeadlessBackend>::new(&factory, &Surface::Offscreen, &RendererDesc::default(), &shaders())
        .err()
        .unwrap();
    assert!(matches!(err, RenderError::DeviceCreation { .. }));
}

#[rstest]
#[case(GpuTiming::Immediate)]
#[case(GpuTiming::OnWait)]
#[case(GpuTiming::Threaded { latency: Duration::from_millis(1) })]
fn fence_targets_count_up_from_one(#[case] timing: GpuTiming) {
    let (mut renderer, gpu) = setup(with_timing(timing), RendererDesc::default());
    let mut scene = SceneState::default();

    let targets: Vec<u64> = (0..3)
        .map(|_| {
            scene.advance();
            renderer.render_frame(&scene).unwrap().fence_target
        })
        .collect();

    assert_eq!(targets, vec![1, 2, 3]);
    assert_eq!(renderer.last_signaled(), 3);
    assert!(gpu.validation_messages().is_empty());
}

#[test]
fn thousand_frames_allocate_nothing_per_frame() {
    let config = HeadlessConfig { record_timeline: false, ..HeadlessConfig::default() };
    let desc = RendererDesc { reset_history: 8, ..RendererDesc::default() };
    let (mut renderer, gpu) = setup(config, desc);
    let before = gpu.stats();

    let mut scene = SceneState::default();
    for _ in 0..1000 {
        scene.advance();
        renderer.render_frame(&scene).unwrap();
    }

    let after = gpu.stats();
    assert_eq!(renderer.render_target_view_count(), 2);
    assert_eq!(after.render_target_views, 2);
    assert_eq!(after.upload_buffers_created, before.upload_buffers_created);
    assert_eq!(after.command_lists, 1);
    assert_eq!(after.command_allocators, 1);
    assert_eq!(after.allocator_resets, 1000);
    assert_eq!(after.presents, 1000);
    assert_eq!(renderer.reset_history().count(), 8);
    assert!(gpu.validation_messages().is_empty());
}

#[test]
fn every_frame_brackets_its_back_buffer() {
    let (mut renderer, gpu) = setup(HeadlessConfig::default(), RendererDesc::default());
    let mut scene = SceneState::default();

    for _ in 0..4 {
        gpu.clear_timeline();
        scene.advance();
        let report = renderer.render_frame(&scene).unwrap();

        let timeline = gpu.timeline();
        let commands: Vec<&RecordedCommand> = timeline
            .iter()
            .filter_map(|event| match event {
                TimelineEvent::Command { command, .. } => Some(command),
                _ => None,
            })
            .collect();

        let Some(RecordedCommand::Barrier { resource, before, after }) = commands.first() else {
            panic!("frame does not open with a barrier: {commands:?}");
        };
        assert_eq!((*before, *after), (ResourceState::Present, ResourceState::RenderTarget));
        assert_eq!(
            commands.last(),
            Some(&&RecordedCommand::Barrier {
                resource: *resource,
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            })
        );
        assert_eq!(commands.iter().filter(|c| matches!(c, RecordedCommand::Draw { vertex_count: 3, .. })).count(), 1);

        // Present follows the batch, the fence signal follows the present
        let present = timeline.iter().position(|e| matches!(e, TimelineEvent::Present { .. })).unwrap();
        let signal = timeline
            .iter()
            .position(|e| matches!(e, TimelineEvent::Signal { value, .. } if *value == report.fence_target))
            .unwrap();
        assert_eq!(present, commands.len());
        assert!(signal > present);
    }

    assert_eq!(renderer.tracker().barriers_emitted(), 8);
    assert!(gpu.validation_messages().is_empty());
}

#[test]
fn reset_never_precedes_completion() {
    let (mut renderer, gpu) = setup(
        with_timing(GpuTiming::Threaded { latency: Duration::from_millis(2) }),
        RendererDesc { wait_policy: WaitPolicy::Unbounded, ..RendererDesc::default() },
    );
    let mut scene = SceneState::default();

    for _ in 0..20 {
        scene.advance();
        let report = renderer.render_frame(&scene).unwrap();
        assert!(report.reset.completed_at_reset >= report.fence_target);
    }

    for record in renderer.reset_history() {
        assert!(record.completed_at_reset >= record.last_signaled_target);
    }
    assert!(gpu.validation_messages().is_empty());
}

#[test]
fn scripted_back_buffer_indices_select_matching_views() {
    let script = vec![0, 0, 1, 0];
    let config = HeadlessConfig { back_buffer_script: script.clone(), ..HeadlessConfig::default() };
    let (mut renderer, gpu) = setup(config, RendererDesc::default());
    let scene = SceneState::default();

    for expected in script {
        gpu.clear_timeline();
        let report = renderer.render_frame(&scene).unwrap();
        assert_eq!(report.back_buffer, expected);

        let timeline = gpu.timeline();
        let bound: Vec<u32> = timeline
            .iter()
            .filter_map(|event| match event {
                TimelineEvent::Command { command: RecordedCommand::SetRenderTarget { slot, .. }, .. } => {
                    Some(*slot)
                }
                _ => None,
            })
            .collect();
        assert_eq!(bound, vec![expected]);
        assert!(timeline
            .iter()
            .any(|e| matches!(e, TimelineEvent::Present { back_buffer, .. } if *back_buffer == expected)));
    }

    assert!(gpu.validation_messages().is_empty());
}

#[test]
fn releasing_upload_memory_before_the_wait_is_reported() {
    let factory = HeadlessFactory::new(with_timing(GpuTiming::OnWait));
    let gpu = factory.gpu_handle();
    let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
    let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
    let queue = device.create_command_queue().unwrap();
    let allocator = device.create_command_allocator().unwrap();
    let list = device.create_command_list(&allocator).unwrap();
    let fence = device.create_fence(0).unwrap();

    let buffer = device.create_upload_buffer(256).unwrap();
    list.set_vertex_buffer(
        0,
        &VertexBufferView { gpu_address: buffer.gpu_address(), size_in_bytes: 48, stride_in_bytes: 16 },
    );
    list.close().unwrap();
    queue.execute_command_lists(&[&list]);
    queue.signal(&fence, 1).unwrap();

    drop(buffer);

    let messages = gpu.validation_messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("released while pending GPU work"));
}

#[rstest]
#[case(WaitPolicy::Bounded(Duration::from_millis(20)))]
#[case(WaitPolicy::Unbounded)]
fn hung_gpu_surfaces_as_device_hung(#[case] policy: WaitPolicy) {
    let (mut renderer, _gpu) = setup(
        with_timing(GpuTiming::Hung),
        RendererDesc { wait_policy: policy, ..RendererDesc::default() },
    );

    let err = renderer.render_frame(&SceneState::default()).unwrap_err();

    assert!(matches!(err, RenderError::DeviceHung { target: 1, completed: 0, .. }), "{err}");
    assert!(err.is_device_lost());
}

#[test]
fn dropping_after_a_hang_does_not_wait_again() {
    let timeout = Duration::from_millis(200);
    let (mut renderer, _gpu) = setup(
        with_timing(GpuTiming::Hung),
        RendererDesc { wait_policy: WaitPolicy::Bounded(timeout), ..RendererDesc::default() },
    );

    let err = renderer.render_frame(&SceneState::default()).unwrap_err();
    assert!(matches!(err, RenderError::DeviceHung { .. }), "{err}");
    assert!(renderer.is_device_lost());

    let start = Instant::now();
    drop(renderer);
    assert!(start.elapsed() < timeout / 2, "drop took {:?}", start.elapsed());
}

#[test]
fn completed_value_is_monotonic_across_a_stale_read() {
    let (mut renderer, gpu) = setup(with_timing(GpuTiming::Immediate), RendererDesc::default());
    let scene = SceneState::default();
    let mut completed = Vec::new();

    for frame in 0..6 {
        if frame == 3 {
            gpu.rewind_fences(1);
        }
        completed.push(renderer.render_frame(&scene).unwrap().completed);
    }

    assert!(completed.windows(2).all(|w| w[0] <= w[1]), "{completed:?}");
    assert_eq!(completed, vec![1, 2, 3, 4, 5, 6]);
    assert!(!renderer.is_device_lost());
}

#[test]
fn removed_device_surfaces_as_device_lost() {
    let (mut renderer, gpu) = setup(HeadlessConfig::default(), RendererDesc::default());
    renderer.render_frame(&SceneState::default()).unwrap();

    gpu.remove_device();
    let err = renderer.render_frame(&SceneState::default()).unwrap_err();

    assert!(err.is_device_lost(), "{err}");
}

#[test]
fn flush_leaves_queue_idle() {
    let (mut renderer, gpu) = setup(with_timing(GpuTiming::OnWait), RendererDesc::default());
    renderer.render_frame(&SceneState::default()).unwrap();

    renderer.flush().unwrap();

    assert_eq!(gpu.pending_operations(), 0);
    assert_eq!(renderer.last_signaled(), 2);
}
