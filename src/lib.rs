// Direct3D 12 frame pipeline: device bring-up, command recording, resource
// transitions, presentation and CPU/GPU fence synchronization.

pub mod backend;
pub mod barrier;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod scene;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use config::Config;
pub use error::{RenderError, RenderResult};
pub use frame::{FrameReport, Renderer, RendererDesc};
pub use pipeline::ShaderSet;
pub use scene::SceneState;
pub use sync::{FrameState, WaitPolicy};
