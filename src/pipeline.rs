// Pipeline/shader assembly
//
// Consumes compiled shader bytecode (produced by build.rs or shipped next to
// the binary) and builds the one immutable pipeline state used every frame.
//
// Root signature:
//   parameter 0: CBV b0, pixel stage   (material colour)
//   parameter 1: CBV b0, vertex stage  (world-view-projection)
// Input layout: POSITION, float4, appended

use std::path::Path;

use crate::backend::{
    Backend, BlendDesc, CullMode, Device, FillMode, InputElement, PipelineStateDesc,
    RasterizerDesc, RootParameter, RootSignatureDesc, ShaderStage, ShaderVisibility,
    TextureFormat,
};
use crate::error::{RenderError, RenderResult};

/// Container magic shared by DXBC and DXIL blobs
const SHADER_CONTAINER_MAGIC: &[u8; 4] = b"DXBC";

pub const MATERIAL_ROOT_PARAMETER: u32 = 0;
pub const TRANSFORM_ROOT_PARAMETER: u32 = 1;

pub const INPUT_LAYOUT: [InputElement; 1] = [InputElement {
    semantic: "POSITION",
    semantic_index: 0,
    format: TextureFormat::Rgba32Float,
    aligned_byte_offset: None,
}];

/// Compiled bytecode for one shader stage
#[derive(Debug, Clone)]
pub struct ShaderBytecode {
    stage: ShaderStage,
    bytes: Vec<u8>,
}

impl ShaderBytecode {
    pub fn from_bytes(stage: ShaderStage, bytes: Vec<u8>) -> RenderResult<Self> {
        if bytes.is_empty() {
            return Err(RenderError::InvalidShader { stage, reason: "empty blob".into() });
        }
        if !bytes.starts_with(SHADER_CONTAINER_MAGIC) {
            return Err(RenderError::InvalidShader {
                stage,
                reason: "missing DXBC container header".into(),
            });
        }
        if bytes.len() % 4 != 0 {
            return Err(RenderError::InvalidShader {
                stage,
                reason: format!("size {} is not a multiple of 4", bytes.len()),
            });
        }

        Ok(Self { stage, bytes })
    }

    pub fn load(stage: ShaderStage, path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| RenderError::ShaderLoad {
            stage,
            path: path.to_path_buf(),
            source,
        })?;

        log::debug!("Loaded {} shader {:?} ({} bytes)", stage, path, bytes.len());
        Self::from_bytes(stage, bytes)
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub vertex: ShaderBytecode,
    pub pixel: ShaderBytecode,
}

impl ShaderSet {
    pub fn load(vertex: impl AsRef<Path>, pixel: impl AsRef<Path>) -> RenderResult<Self> {
        Ok(Self {
            vertex: ShaderBytecode::load(ShaderStage::Vertex, vertex)?,
            pixel: ShaderBytecode::load(ShaderStage::Pixel, pixel)?,
        })
    }
}

pub fn root_signature_desc() -> RootSignatureDesc {
    RootSignatureDesc {
        parameters: vec![
            RootParameter {
                shader_register: 0,
                register_space: 0,
                visibility: ShaderVisibility::Pixel,
            },
            RootParameter {
                shader_register: 0,
                register_space: 0,
                visibility: ShaderVisibility::Vertex,
            },
        ],
        allow_input_assembler_layout: true,
    }
}

pub const BLEND: BlendDesc = BlendDesc { blend_enable: false, write_all_channels: true };

pub const RASTERIZER: RasterizerDesc = RasterizerDesc {
    fill_mode: FillMode::Solid,
    cull_mode: CullMode::Back,
};

/// Root signature plus the pipeline state built against it
pub struct PipelineAssembly<B: Backend> {
    pub pipeline_state: B::PipelineState,
    pub root_signature: B::RootSignature,
}

impl<B: Backend> PipelineAssembly<B> {
    pub fn build(
        device: &B::Device,
        shaders: &ShaderSet,
        render_target_format: TextureFormat,
    ) -> RenderResult<Self> {
        for (code, slot) in [(&shaders.vertex, ShaderStage::Vertex), (&shaders.pixel, ShaderStage::Pixel)] {
            if code.stage() != slot {
                return Err(RenderError::InvalidShader {
                    stage: code.stage(),
                    reason: format!("bound to the {} stage", slot),
                });
            }
        }

        let root_signature = device
            .create_root_signature(&root_signature_desc())
            .map_err(RenderError::startup("root signature"))?;

        let desc = PipelineStateDesc::<B> {
            root_signature: &root_signature,
            input_layout: &INPUT_LAYOUT,
            vertex_shader: shaders.vertex.as_bytes(),
            pixel_shader: shaders.pixel.as_bytes(),
            blend: BLEND,
            rasterizer: RASTERIZER,
            render_target_format,
            sample_count: 1,
        };

        let pipeline_state = device
            .create_pipeline_state(&desc)
            .map_err(RenderError::startup("pipeline state"))?;

        log::info!("Pipeline state built ({:?} render target)", render_target_format);
        Ok(Self { pipeline_state, root_signature })
    }
}

/// Minimal well-formed container, for running without compiled shaders
pub fn placeholder_bytecode(stage: ShaderStage) -> ShaderBytecode {
    let mut bytes = SHADER_CONTAINER_MAGIC.to_vec();
    bytes.resize(32, 0);
    ShaderBytecode { stage, bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessBackend, HeadlessConfig, HeadlessFactory};
    use crate::backend::{Adapter, Factory, FeatureLevel};
    use rstest::rstest;

    fn shaders() -> ShaderSet {
        ShaderSet {
            vertex: placeholder_bytecode(ShaderStage::Vertex),
            pixel: placeholder_bytecode(ShaderStage::Pixel),
        }
    }

    #[rstest]
    #[case(Vec::new(), "empty")]
    #[case(b"MZ\0\0".to_vec(), "DXBC")]
    #[case(b"DXBC\0".to_vec(), "multiple of 4")]
    fn malformed_bytecode_is_rejected(#[case] bytes: Vec<u8>, #[case] reason: &str) {
        let err = ShaderBytecode::from_bytes(ShaderStage::Pixel, bytes).unwrap_err();
        assert!(err.to_string().contains(reason), "{err}");
    }

    #[test]
    fn missing_shader_file_names_path() {
        let err = ShaderBytecode::load(ShaderStage::Vertex, "does/not/exist.cso").unwrap_err();
        assert!(matches!(err, RenderError::ShaderLoad { stage: ShaderStage::Vertex, .. }));
        assert!(err.to_string().contains("exist.cso"));
    }

    #[test]
    fn root_signature_has_pixel_then_vertex_cbv() {
        let desc = root_signature_desc();
        assert_eq!(desc.parameters.len(), 2);
        assert_eq!(desc.parameters[MATERIAL_ROOT_PARAMETER as usize].visibility, ShaderVisibility::Pixel);
        assert_eq!(desc.parameters[TRANSFORM_ROOT_PARAMETER as usize].visibility, ShaderVisibility::Vertex);
        assert!(desc.allow_input_assembler_layout);
    }

    #[test]
    fn builds_against_headless_device() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();

        let assembly =
            PipelineAssembly::<HeadlessBackend>::build(&device, &shaders(), TextureFormat::Rgba8UnormSrgb).unwrap();

        assert_eq!(assembly.pipeline_state.input_elements, 1);
        assert_eq!(factory.gpu_handle().stats().pipeline_states, 1);
    }

    #[test]
    fn swapped_stages_are_rejected() {
        let factory = HeadlessFactory::new(HeadlessConfig::default());
        let adapter = factory.enum_adapter_by_preference(0).unwrap().unwrap();
        let device = adapter.create_device(FeatureLevel::Level12_0).unwrap();
        let swapped = ShaderSet {
            vertex: placeholder_bytecode(ShaderStage::Pixel),
            pixel: placeholder_bytecode(ShaderStage::Vertex),
        };

        let err = PipelineAssembly::<HeadlessBackend>::build(&device, &swapped, TextureFormat::Rgba8UnormSrgb)
            .err()
            .unwrap();

        assert!(matches!(err, RenderError::InvalidShader { stage: ShaderStage::Pixel, .. }), "{err}");
        assert_eq!(factory.gpu_handle().stats().root_signatures, 0);
    }
}
