//! Compute pipeline creation.

use crate::error::{GpuError, Result};
use ash::vk;
use std::path::Path;

/// Read a SPIR-V binary from disk.
pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path)
        .map_err(|e| GpuError::PipelineCreation(format!("{}: {e}", path.display())))?;
    ash::util::read_spv(&mut file)
        .map_err(|e| GpuError::PipelineCreation(format!("{}: {e}", path.display())))
}

/// Compute pipeline wrapper.
pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl ComputePipeline {
    /// Create a compute pipeline from shader code.
    ///
    /// # Safety
    /// The device must be valid and the shader code must be valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        shader_code: &[u32],
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        let shader_info = vk::ShaderModuleCreateInfo::default().code(shader_code);
        let shader_module = unsafe { device.create_shader_module(&shader_info, None) }
            .map_err(|e| GpuError::PipelineCreation(format!("Shader module: {e}")))?;

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = match unsafe { device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.destroy_shader_module(shader_module, None) };
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(c"main");

        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(layout);

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        // The module is not needed once creation has been attempted
        unsafe { device.destroy_shader_module(shader_module, None) };

        let pipeline = match pipelines {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

        pipeline
            .map(|pipeline| Self { pipeline, layout })
            .ok_or_else(|| GpuError::PipelineCreation("No pipeline returned".to_string()))
    }

    /// Destroy the pipeline.
    ///
    /// # Safety
    /// The device must be valid and the pipeline must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_spirv_file() {
        let err = load_spirv("/nonexistent/render.comp.spv").unwrap_err();
        assert!(matches!(err, GpuError::PipelineCreation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn spirv_words_are_read() {
        let dir = std::env::temp_dir().join(format!("ember-spirv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tiny.spv");

        // Magic number followed by one more word
        let words: [u32; 2] = [0x0723_0203, 0x0001_0000];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(load_spirv(&path).unwrap(), words);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
