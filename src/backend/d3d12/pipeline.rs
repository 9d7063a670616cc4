// Root signature serialization and graphics pipeline state creation

use std::ffi::CString;

use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::{dxgi_format, D3d12Backend};
use crate::backend::{
    BackendError, CullMode, FillMode, PipelineStateDesc, RootSignatureDesc, ShaderVisibility,
};

pub struct D3d12RootSignature {
    pub(crate) root_signature: ID3D12RootSignature,
}

pub struct D3d12PipelineState {
    pub(crate) pipeline: ID3D12PipelineState,
}

fn shader_visibility(visibility: ShaderVisibility) -> D3D12_SHADER_VISIBILITY {
    match visibility {
        ShaderVisibility::All => D3D12_SHADER_VISIBILITY_ALL,
        ShaderVisibility::Vertex => D3D12_SHADER_VISIBILITY_VERTEX,
        ShaderVisibility::Pixel => D3D12_SHADER_VISIBILITY_PIXEL,
    }
}

pub(crate) fn create_root_signature(
    device: &ID3D12Device,
    desc: &RootSignatureDesc,
) -> Result<D3d12RootSignature, BackendError> {
    let parameters: Vec<D3D12_ROOT_PARAMETER> = desc
        .parameters
        .iter()
        .map(|param| D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_CBV,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Descriptor: D3D12_ROOT_DESCRIPTOR {
                    ShaderRegister: param.shader_register,
                    RegisterSpace: param.register_space,
                },
            },
            ShaderVisibility: shader_visibility(param.visibility),
        })
        .collect();

    let flags = if desc.allow_input_assembler_layout {
        D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
    } else {
        D3D12_ROOT_SIGNATURE_FLAG_NONE
    };

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: flags,
    };

    let mut blob: Option<ID3DBlob> = None;
    let mut error_blob: Option<ID3DBlob> = None;
    let serialized = unsafe {
        D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut error_blob))
    };

    if let Err(e) = serialized {
        let details = error_blob.as_ref().map(blob_text).unwrap_or_default();
        log::error!("Root signature serialization failed: {} {}", e, details);
        return Err(BackendError::creation("root signature", format!("{} {}", e, details)));
    }

    let blob = blob.ok_or_else(|| BackendError::creation("root signature", "empty serialized blob"))?;
    let root_signature: ID3D12RootSignature = unsafe {
        device.CreateRootSignature(
            0,
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()),
        )
    }
    .map_err(|e| BackendError::creation("root signature", e))?;

    Ok(D3d12RootSignature { root_signature })
}

fn blob_text(blob: &ID3DBlob) -> String {
    let bytes = unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    };
    String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string()
}

pub(crate) fn create_pipeline_state(
    device: &ID3D12Device,
    desc: &PipelineStateDesc<'_, D3d12Backend>,
) -> Result<D3d12PipelineState, BackendError> {
    // Semantic names must outlive the CreateGraphicsPipelineState call
    let semantics = desc
        .input_layout
        .iter()
        .map(|element| CString::new(element.semantic))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BackendError::creation("pipeline state", e))?;

    let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
        .input_layout
        .iter()
        .zip(&semantics)
        .map(|(element, semantic)| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(semantic.as_ptr() as *const u8),
            SemanticIndex: element.semantic_index,
            Format: dxgi_format(element.format),
            InputSlot: 0,
            AlignedByteOffset: element.aligned_byte_offset.unwrap_or(D3D12_APPEND_ALIGNED_ELEMENT),
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        })
        .collect();

    let mut render_target_blend = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: desc.blend.blend_enable.into(),
        SrcBlend: D3D12_BLEND_ONE,
        DestBlend: D3D12_BLEND_ZERO,
        BlendOp: D3D12_BLEND_OP_ADD,
        SrcBlendAlpha: D3D12_BLEND_ONE,
        DestBlendAlpha: D3D12_BLEND_ZERO,
        BlendOpAlpha: D3D12_BLEND_OP_ADD,
        LogicOp: D3D12_LOGIC_OP_NOOP,
        ..Default::default()
    };
    if desc.blend.write_all_channels {
        render_target_blend.RenderTargetWriteMask = D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8;
    }

    let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
    rtv_formats[0] = dxgi_format(desc.render_target_format);

    let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        // Borrowed pointer, the caller keeps the root signature alive
        pRootSignature: unsafe { std::mem::transmute_copy(&desc.root_signature.root_signature) },
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.vertex_shader.as_ptr() as *const _,
            BytecodeLength: desc.vertex_shader.len(),
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: desc.pixel_shader.as_ptr() as *const _,
            BytecodeLength: desc.pixel_shader.len(),
        },
        BlendState: D3D12_BLEND_DESC {
            RenderTarget: [render_target_blend, Default::default(), Default::default(), Default::default(),
                Default::default(), Default::default(), Default::default(), Default::default()],
            ..Default::default()
        },
        SampleMask: u32::MAX,
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: match desc.rasterizer.fill_mode {
                FillMode::Solid => D3D12_FILL_MODE_SOLID,
                FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
            },
            CullMode: match desc.rasterizer.cull_mode {
                CullMode::None => D3D12_CULL_MODE_NONE,
                CullMode::Front => D3D12_CULL_MODE_FRONT,
                CullMode::Back => D3D12_CULL_MODE_BACK,
            },
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: input_elements.as_ptr(),
            NumElements: input_elements.len() as u32,
        },
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: 1,
        RTVFormats: rtv_formats,
        SampleDesc: DXGI_SAMPLE_DESC { Count: desc.sample_count, Quality: 0 },
        ..Default::default()
    };

    let pipeline: ID3D12PipelineState = unsafe { device.CreateGraphicsPipelineState(&pso_desc) }
        .map_err(|e| BackendError::creation("pipeline state", e))?;

    Ok(D3d12PipelineState { pipeline })
}
