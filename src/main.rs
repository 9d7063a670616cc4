// =============================================================================
// DIRECT3D 12 FRAME PIPELINE - Triangle renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit window (or headless loop)                                │
// │    └── Renderer                                                 │
// │          └── Adapter + Device (feature-level ladder)            │
// │                └── Queue / Allocator / Command List             │
// │                      └── Fence handshake (signal, wait, reset)  │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Advance the scene
// 2. Upload vertices and constants
// 3. Record the render pass into the current back buffer
// 4. Execute and present
// 5. Signal, wait for the GPU, reset for the next frame
//
// =============================================================================

use anyhow::{bail, Context, Result};
use dx12_renderer::backend::headless::{HeadlessBackend, HeadlessFactory};
use dx12_renderer::backend::{Backend, ShaderStage, Surface};
use dx12_renderer::config::{BackendKind, Config};
use dx12_renderer::pipeline::{placeholder_bytecode, ShaderSet};
use dx12_renderer::{Renderer, SceneState};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting D3D12 frame pipeline");
    log::info!("Window: {}x{} ({})", config.window.width, config.window.height, config.window.title);

    match config.graphics.backend {
        BackendKind::Headless => run_headless(&config),
        BackendKind::D3d12 | BackendKind::Auto => run_native(config),
    }
}

#[cfg(windows)]
fn run_native(config: Config) -> Result<()> {
    let event_loop = winit::event_loop::EventLoop::new()?;
    let mut app = window::App::new(config);
    event_loop.run_app(&mut app)?;
    app.result()
}

#[cfg(not(windows))]
fn run_native(config: Config) -> Result<()> {
    if config.graphics.backend == BackendKind::D3d12 {
        bail!("Direct3D 12 backend is only available on Windows");
    }
    log::info!("Direct3D 12 unavailable on this platform, running headless");
    run_headless(&config)
}

/// Log lines go to stderr and, optionally, to one file per run
struct LogSink {
    file: Option<File>,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        std::io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        std::io::stderr().flush()
    }
}

/// `<dir>/YYYYMMDD_HHMMSS.log` in local time
fn log_file_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}.log", now.format("%Y%m%d_%H%M%S")))
}

/// Initialize logging with optional file output under `debug.log_dir`
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let file = if config.debug.log_to_file {
        let path = log_file_path(&config.debug.log_dir, Local::now());

        match std::fs::create_dir_all(&config.debug.log_dir).and_then(|_| File::create(&path)) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Warning: could not create log file {:?}: {}", path, e);
                None
            }
        }
    } else {
        None
    };

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.target(Target::Pipe(Box::new(LogSink { file })));
    builder.init();
}

/// Advance the scene and render one frame. Any error ends the run.
fn render_step<B: Backend>(renderer: &mut Renderer<B>, scene: &mut SceneState) -> Result<()> {
    scene.advance();
    match renderer.render_frame(scene) {
        Ok(_) => Ok(()),
        Err(e) => {
            if e.is_device_lost() {
                log::error!("Device lost: {}", e);
            } else {
                log::error!("Render error: {:?}", e);
            }
            Err(anyhow::Error::new(e).context("Frame failed"))
        }
    }
}

// =============================================================================
// HEADLESS RUN
// =============================================================================

/// Compiled shaders when present, otherwise placeholder containers the
/// simulated device accepts
fn headless_shaders(config: &Config) -> ShaderSet {
    ShaderSet::load(&config.graphics.vertex_shader, &config.graphics.pixel_shader).unwrap_or_else(|e| {
        log::warn!("{}; using placeholder bytecode", e);
        ShaderSet {
            vertex: placeholder_bytecode(ShaderStage::Vertex),
            pixel: placeholder_bytecode(ShaderStage::Pixel),
        }
    })
}

fn run_headless(config: &Config) -> Result<()> {
    let factory = HeadlessFactory::new(config.headless_config()?);
    let gpu = factory.gpu_handle();
    let shaders = headless_shaders(config);

    let mut renderer = Renderer::<HeadlessBackend>::new(
        &factory,
        &Surface::Offscreen,
        &config.renderer_desc(),
        &shaders,
    )
    .context("Failed to initialize renderer")?;

    let mut scene = config.scene_state();
    let start = Instant::now();
    for _ in 0..config.headless.frames {
        render_step(&mut renderer, &mut scene)?;
    }
    renderer.flush().context("Failed to flush queue")?;

    let elapsed = start.elapsed();
    let stats = gpu.stats();
    log::info!(
        "Rendered {} frames in {:.2?} on {} (feature level {})",
        renderer.frame_count(),
        elapsed,
        renderer.adapter_info().description,
        renderer.feature_level()
    );
    log::info!(
        "Fence value {}, {} RTVs, {} allocator resets, {} upload buffers, {} presents",
        renderer.last_signaled(),
        stats.render_target_views,
        stats.allocator_resets,
        stats.upload_buffers_created,
        stats.presents
    );
    drop(renderer);

    let messages = gpu.validation_messages();
    if !messages.is_empty() {
        for message in &messages {
            log::error!("Validation: {}", message);
        }
        bail!("{} validation message(s) recorded", messages.len());
    }

    Ok(())
}

// =============================================================================
// WINDOWED RUN
// =============================================================================

#[cfg(windows)]
mod window {
    use anyhow::{anyhow, Context, Result};
    use dx12_renderer::backend::d3d12::{D3d12Backend, D3d12Factory, DebugLayer};
    use dx12_renderer::backend::Surface;
    use dx12_renderer::config::Config;
    use dx12_renderer::pipeline::ShaderSet;
    use dx12_renderer::{Renderer, SceneState};
    use raw_window_handle::HasWindowHandle;
    use std::sync::Arc;
    use std::time::Instant;
    use winit::{
        application::ApplicationHandler,
        event::WindowEvent,
        event_loop::ActiveEventLoop,
        window::{Window, WindowAttributes},
    };

    /// IMPORTANT: the renderer is declared before the window so the swap
    /// chain goes before the HWND it presents to.
    pub struct App {
        config: Config,
        renderer: Option<Renderer<D3d12Backend>>,
        window: Option<Arc<Window>>,
        scene: SceneState,
        error: Option<anyhow::Error>,

        // FPS tracking
        frame_count: u32,
        last_fps_update: Instant,
        last_frame_time: Instant,
    }

    impl App {
        pub fn new(config: Config) -> Self {
            let now = Instant::now();
            let scene = config.scene_state();
            Self {
                config,
                renderer: None,
                window: None,
                scene,
                error: None,
                frame_count: 0,
                last_fps_update: now,
                last_frame_time: now,
            }
        }

        /// Error that ended the event loop, if any
        pub fn result(&mut self) -> Result<()> {
            self.error.take().map_or(Ok(()), Err)
        }

        fn init_renderer(&mut self, window: &Window) -> Result<()> {
            let debug = DebugLayer {
                enabled: self.config.debug.validation_layers,
                gpu_based_validation: self.config.debug.gpu_based_validation,
                break_on_error: self.config.debug.validation_layers,
            };
            let factory = D3d12Factory::new(debug).context("Failed to create DXGI factory")?;

            let shaders = ShaderSet::load(&self.config.graphics.vertex_shader, &self.config.graphics.pixel_shader)
                .context("Failed to load shaders")?;

            let handle = window
                .window_handle()
                .map_err(|e| anyhow!("Window handle unavailable: {}", e))?
                .as_raw();

            let size = window.inner_size();
            let mut desc = self.config.renderer_desc();
            desc.width = size.width;
            desc.height = size.height;

            let renderer = Renderer::<D3d12Backend>::new(&factory, &Surface::Window(handle), &desc, &shaders)
                .context("Failed to initialize renderer")?;

            self.renderer = Some(renderer);
            Ok(())
        }

        /// Dropping the renderer flushes the queue before any GPU object goes
        fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
            self.renderer = None;
            event_loop.exit();
        }

        pub fn update_fps(&mut self) {
            if !self.config.debug.show_fps {
                return;
            }

            let now = Instant::now();
            let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
            self.last_frame_time = now;
            self.frame_count += 1;

            // Update title every second
            if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
                let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
                let fps = self.frame_count as f32 / elapsed;

                if let Some(ref window) = self.window {
                    window.set_title(&format!(
                        "{} - {:.0} FPS ({:.2}ms)",
                        self.config.window.title,
                        fps,
                        frame_time * 1000.0
                    ));
                }

                self.frame_count = 0;
                self.last_fps_update = now;
            }
        }
    }

    impl ApplicationHandler for App {
        fn resumed(&mut self, event_loop: &ActiveEventLoop) {
            if self.window.is_some() {
                return;
            }

            let window_attributes = WindowAttributes::default()
                .with_title(&self.config.window.title)
                .with_resizable(false)
                .with_inner_size(winit::dpi::PhysicalSize::new(
                    self.config.window.width,
                    self.config.window.height,
                ));

            let window = match event_loop.create_window(window_attributes) {
                Ok(w) => Arc::new(w),
                Err(e) => {
                    log::error!("Failed to create window: {:?}", e);
                    self.error = Some(e.into());
                    event_loop.exit();
                    return;
                }
            };

            if let Err(e) = self.init_renderer(&window) {
                log::error!("Failed to initialize Direct3D 12: {:?}", e);
                self.error = Some(e);
                event_loop.exit();
                return;
            }

            self.window = Some(window);
        }

        fn window_event(
            &mut self,
            event_loop: &ActiveEventLoop,
            _id: winit::window::WindowId,
            event: WindowEvent,
        ) {
            match event {
                WindowEvent::CloseRequested => {
                    log::info!("Close requested, shutting down...");
                    self.shutdown(event_loop);
                }

                WindowEvent::RedrawRequested => {
                    let Some(renderer) = self.renderer.as_mut() else {
                        return;
                    };

                    match super::render_step(renderer, &mut self.scene) {
                        Ok(()) => self.update_fps(),
                        Err(e) => {
                            self.error = Some(e);
                            self.shutdown(event_loop);
                        }
                    }
                }

                WindowEvent::KeyboardInput { event, .. } => {
                    use winit::keyboard::{KeyCode, PhysicalKey};

                    if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                        log::info!("ESC pressed, exiting...");
                        self.shutdown(event_loop);
                    }
                }

                _ => {}
            }
        }

        /// Request continuous redraws
        fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
            if let Some(ref window) = self.window {
                window.request_redraw();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use dx12_renderer::backend::headless::HeadlessConfig;
    use dx12_renderer::{RenderError, RendererDesc};

    #[test]
    fn log_file_is_named_by_local_timestamp() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 3, 7).unwrap();
        let path = log_file_path(Path::new("Logs"), now);
        assert_eq!(path, Path::new("Logs").join("20240501_090307.log"));
    }

    #[test]
    fn any_render_error_ends_the_run() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let desc = RendererDesc { upload_slot_size: 16, ..RendererDesc::default() };
        let shaders = ShaderSet {
            vertex: placeholder_bytecode(ShaderStage::Vertex),
            pixel: placeholder_bytecode(ShaderStage::Pixel),
        };
        let mut renderer = Renderer::<HeadlessBackend>::new(&factory, &Surface::Offscreen, &desc, &shaders).unwrap();
        let mut scene = SceneState::default();

        let err = render_step(&mut renderer, &mut scene).unwrap_err();

        let cause = err.downcast_ref::<RenderError>().unwrap();
        assert!(!cause.is_device_lost());
        assert!(matches!(cause, RenderError::UploadExhausted { .. }), "{cause}");
    }
}
