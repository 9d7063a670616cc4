// Startup log lines, captured through a process-wide logger

use std::sync::OnceLock;

use dx12_renderer::backend::headless::{AdapterSpec, HeadlessBackend, HeadlessConfig, HeadlessFactory};
use dx12_renderer::backend::{FeatureLevel, ShaderStage, Surface};
use dx12_renderer::pipeline::placeholder_bytecode;
use dx12_renderer::{Renderer, RendererDesc, ShaderSet};
use parking_lot::Mutex;

/// Keeps every info-or-louder line from this crate
struct CaptureLogger {
    lines: Mutex<Vec<String>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) && record.target().starts_with("dx12_renderer") {
            self.lines.lock().push(format!("{}", record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<&'static CaptureLogger> = OnceLock::new();

fn logger() -> &'static CaptureLogger {
    LOGGER.get_or_init(|| {
        let logger: &'static CaptureLogger = Box::leak(Box::new(CaptureLogger { lines: Mutex::new(Vec::new()) }));
        log::set_logger(logger).unwrap();
        log::set_max_level(log::LevelFilter::Info);
        logger
    })
}

#[test]
fn startup_logs_chosen_adapter_and_feature_level() {
    let logger = logger();
    let factory = HeadlessFactory::new(HeadlessConfig {
        adapters: vec![
            AdapterSpec::software("Microsoft Basic Render Driver"),
            AdapterSpec::hardware("Older GPU", FeatureLevel::Level12_0),
        ],
        ..HeadlessConfig::default()
    });
    let shaders = ShaderSet {
        vertex: placeholder_bytecode(ShaderStage::Vertex),
        pixel: placeholder_bytecode(ShaderStage::Pixel),
    };

    let renderer =
        Renderer::<HeadlessBackend>::new(&factory, &Surface::Offscreen, &RendererDesc::default(), &shaders).unwrap();
    drop(renderer);

    let lines = logger.lines.lock().clone();
    let adapter = lines.iter().position(|l| l.starts_with("Use Adapter: Older GPU"));
    let level = lines.iter().position(|l| l == "FeatureLevel : 12.0");

    assert!(adapter.is_some(), "{lines:#?}");
    assert!(level.is_some(), "{lines:#?}");
    assert!(adapter < level);
    assert!(!lines.iter().any(|l| l.contains("Basic Render Driver")), "{lines:#?}");
}
