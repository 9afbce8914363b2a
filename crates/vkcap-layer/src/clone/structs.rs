//! [`DeepClone`] implementations for the create-info structs the tracker records.

use ash::vk;

use super::{shallow, CloneError, Cloner, DeepClone};
use crate::tracker::raw_slice;

/// Structs whose only pointer is `p_next`.
macro_rules! chained_only {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl DeepClone for vk::$ty<'_> {
                type Owned = vk::$ty<'static>;

                unsafe fn deep_clone(
                    &self,
                    c: &mut Cloner<'_>,
                ) -> Result<Self::Owned, CloneError> {
                    let mut out: Self::Owned = unsafe { shallow(self) };
                    out.p_next = unsafe { c.chain(self.p_next as *const _) }? as _;
                    Ok(out)
                }
            }
        )+
    };
}

chained_only! {
    BufferViewCreateInfo,
    ImageViewCreateInfo,
    SamplerCreateInfo,
    MemoryAllocateInfo,
    CommandPoolCreateInfo,
    CommandBufferAllocateInfo,
    FenceCreateInfo,
    SemaphoreCreateInfo,
    EventCreateInfo,
    QueryPoolCreateInfo,
    HeadlessSurfaceCreateInfoEXT,
    PipelineInputAssemblyStateCreateInfo,
    PipelineTessellationStateCreateInfo,
    PipelineRasterizationStateCreateInfo,
    PipelineDepthStencilStateCreateInfo,
}

impl DeepClone for vk::ApplicationInfo<'_> {
    type Owned = vk::ApplicationInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_application_name = unsafe { c.cstr(self.p_application_name) };
        out.p_engine_name = unsafe { c.cstr(self.p_engine_name) };
        Ok(out)
    }
}

impl DeepClone for vk::InstanceCreateInfo<'_> {
    type Owned = vk::InstanceCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_application_info = unsafe { c.deep_one(self.p_application_info) }?;
        out.pp_enabled_layer_names = unsafe {
            c.cstr_array(self.pp_enabled_layer_names, self.enabled_layer_count as usize)
        };
        out.pp_enabled_extension_names = unsafe {
            c.cstr_array(
                self.pp_enabled_extension_names,
                self.enabled_extension_count as usize,
            )
        };
        Ok(out)
    }
}

impl DeepClone for vk::DeviceQueueCreateInfo<'_> {
    type Owned = vk::DeviceQueueCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_queue_priorities =
            unsafe { c.slice(self.p_queue_priorities, self.queue_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::DeviceCreateInfo<'_> {
    type Owned = vk::DeviceCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_queue_create_infos = unsafe {
            c.deep_slice(
                self.p_queue_create_infos,
                self.queue_create_info_count as usize,
            )
        }?;
        out.pp_enabled_layer_names = unsafe {
            c.cstr_array(self.pp_enabled_layer_names, self.enabled_layer_count as usize)
        };
        out.pp_enabled_extension_names = unsafe {
            c.cstr_array(
                self.pp_enabled_extension_names,
                self.enabled_extension_count as usize,
            )
        };
        out.p_enabled_features = unsafe { c.one(self.p_enabled_features) };
        Ok(out)
    }
}

/// Queue family indices are only read under concurrent sharing; otherwise
/// both the pointer and the count may hold any value.
unsafe fn queue_family_indices(
    c: &mut Cloner<'_>,
    sharing_mode: vk::SharingMode,
    ptr: *const u32,
    count: u32,
) -> *const u32 {
    if sharing_mode != vk::SharingMode::CONCURRENT {
        return std::ptr::null();
    }
    unsafe { c.slice(ptr, count as usize) }
}

/// Whether `p_immutable_samplers` is read for this binding.
pub(crate) fn has_immutable_samplers(binding: &vk::DescriptorSetLayoutBinding<'_>) -> bool {
    matches!(
        binding.descriptor_type,
        vk::DescriptorType::SAMPLER | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
    )
}

impl DeepClone for vk::BufferCreateInfo<'_> {
    type Owned = vk::BufferCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_queue_family_indices = unsafe {
            queue_family_indices(
                c,
                self.sharing_mode,
                self.p_queue_family_indices,
                self.queue_family_index_count,
            )
        };
        if out.p_queue_family_indices.is_null() {
            out.queue_family_index_count = 0;
        }
        Ok(out)
    }
}

impl DeepClone for vk::ImageCreateInfo<'_> {
    type Owned = vk::ImageCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_queue_family_indices = unsafe {
            queue_family_indices(
                c,
                self.sharing_mode,
                self.p_queue_family_indices,
                self.queue_family_index_count,
            )
        };
        if out.p_queue_family_indices.is_null() {
            out.queue_family_index_count = 0;
        }
        Ok(out)
    }
}

impl DeepClone for vk::SwapchainCreateInfoKHR<'_> {
    type Owned = vk::SwapchainCreateInfoKHR<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_queue_family_indices = unsafe {
            queue_family_indices(
                c,
                self.image_sharing_mode,
                self.p_queue_family_indices,
                self.queue_family_index_count,
            )
        };
        if out.p_queue_family_indices.is_null() {
            out.queue_family_index_count = 0;
        }
        Ok(out)
    }
}

impl DeepClone for vk::ShaderModuleCreateInfo<'_> {
    type Owned = vk::ShaderModuleCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        if self.code_size % 4 != 0 {
            return Err(CloneError::CodeSizeNotAligned(self.code_size));
        }
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_code = unsafe { c.slice(self.p_code, self.code_size / 4) };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineCacheCreateInfo<'_> {
    type Owned = vk::PipelineCacheCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_initial_data = unsafe { c.bytes(self.p_initial_data, self.initial_data_size) };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineLayoutCreateInfo<'_> {
    type Owned = vk::PipelineLayoutCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_set_layouts =
            unsafe { c.slice(self.p_set_layouts, self.set_layout_count as usize) };
        out.p_push_constant_ranges = unsafe {
            c.slice(
                self.p_push_constant_ranges,
                self.push_constant_range_count as usize,
            )
        };
        Ok(out)
    }
}

impl DeepClone for vk::DescriptorSetLayoutBinding<'_> {
    type Owned = vk::DescriptorSetLayoutBinding<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_immutable_samplers = if has_immutable_samplers(self) {
            unsafe { c.slice(self.p_immutable_samplers, self.descriptor_count as usize) }
        } else {
            std::ptr::null()
        };
        Ok(out)
    }
}

impl DeepClone for vk::DescriptorSetLayoutCreateInfo<'_> {
    type Owned = vk::DescriptorSetLayoutCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_bindings = unsafe { c.deep_slice(self.p_bindings, self.binding_count as usize) }?;
        Ok(out)
    }
}

impl DeepClone for vk::DescriptorPoolCreateInfo<'_> {
    type Owned = vk::DescriptorPoolCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_pool_sizes = unsafe { c.slice(self.p_pool_sizes, self.pool_size_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::DescriptorSetAllocateInfo<'_> {
    type Owned = vk::DescriptorSetAllocateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_set_layouts =
            unsafe { c.slice(self.p_set_layouts, self.descriptor_set_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::SubpassDescription<'_> {
    type Owned = vk::SubpassDescription<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        let colors = self.color_attachment_count as usize;
        out.p_input_attachments = unsafe {
            c.slice(
                self.p_input_attachments,
                self.input_attachment_count as usize,
            )
        };
        out.p_color_attachments = unsafe { c.slice(self.p_color_attachments, colors) };
        out.p_resolve_attachments = unsafe { c.slice(self.p_resolve_attachments, colors) };
        out.p_depth_stencil_attachment = unsafe { c.one(self.p_depth_stencil_attachment) };
        out.p_preserve_attachments = unsafe {
            c.slice(
                self.p_preserve_attachments,
                self.preserve_attachment_count as usize,
            )
        };
        Ok(out)
    }
}

impl DeepClone for vk::RenderPassCreateInfo<'_> {
    type Owned = vk::RenderPassCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_attachments =
            unsafe { c.slice(self.p_attachments, self.attachment_count as usize) };
        out.p_subpasses =
            unsafe { c.deep_slice(self.p_subpasses, self.subpass_count as usize) }?;
        out.p_dependencies =
            unsafe { c.slice(self.p_dependencies, self.dependency_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::FramebufferCreateInfo<'_> {
    type Owned = vk::FramebufferCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_attachments =
            unsafe { c.slice(self.p_attachments, self.attachment_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::SpecializationInfo<'_> {
    type Owned = vk::SpecializationInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_map_entries =
            unsafe { c.slice(self.p_map_entries, self.map_entry_count as usize) };
        out.p_data = unsafe { c.bytes(self.p_data, self.data_size) };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineShaderStageCreateInfo<'_> {
    type Owned = vk::PipelineShaderStageCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_name = unsafe { c.cstr(self.p_name) };
        out.p_specialization_info = unsafe { c.deep_one(self.p_specialization_info) }?;
        Ok(out)
    }
}

impl DeepClone for vk::ComputePipelineCreateInfo<'_> {
    type Owned = vk::ComputePipelineCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.stage = unsafe { self.stage.deep_clone(c) }?;
        Ok(out)
    }
}

impl DeepClone for vk::PipelineVertexInputStateCreateInfo<'_> {
    type Owned = vk::PipelineVertexInputStateCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_vertex_binding_descriptions = unsafe {
            c.slice(
                self.p_vertex_binding_descriptions,
                self.vertex_binding_description_count as usize,
            )
        };
        out.p_vertex_attribute_descriptions = unsafe {
            c.slice(
                self.p_vertex_attribute_descriptions,
                self.vertex_attribute_description_count as usize,
            )
        };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineViewportStateCreateInfo<'_> {
    type Owned = vk::PipelineViewportStateCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        // Null when viewports/scissors are dynamic state.
        out.p_viewports = unsafe { c.slice(self.p_viewports, self.viewport_count as usize) };
        out.p_scissors = unsafe { c.slice(self.p_scissors, self.scissor_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineMultisampleStateCreateInfo<'_> {
    type Owned = vk::PipelineMultisampleStateCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        let mask_words = (self.rasterization_samples.as_raw() as usize).div_ceil(32);
        out.p_sample_mask = unsafe { c.slice(self.p_sample_mask, mask_words) };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineColorBlendStateCreateInfo<'_> {
    type Owned = vk::PipelineColorBlendStateCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_attachments =
            unsafe { c.slice(self.p_attachments, self.attachment_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::PipelineDynamicStateCreateInfo<'_> {
    type Owned = vk::PipelineDynamicStateCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;
        out.p_dynamic_states =
            unsafe { c.slice(self.p_dynamic_states, self.dynamic_state_count as usize) };
        Ok(out)
    }
}

impl DeepClone for vk::GraphicsPipelineCreateInfo<'_> {
    type Owned = vk::GraphicsPipelineCreateInfo<'static>;

    unsafe fn deep_clone(&self, c: &mut Cloner<'_>) -> Result<Self::Owned, CloneError> {
        let mut out: Self::Owned = unsafe { shallow(self) };
        out.p_next = unsafe { c.chain(self.p_next) }?;

        let stages = unsafe { raw_slice(self.p_stages, self.stage_count as usize) };
        let dynamic = match unsafe { self.p_dynamic_state.as_ref() } {
            Some(state) => unsafe {
                raw_slice(state.p_dynamic_states, state.dynamic_state_count as usize)
            },
            None => &[],
        };
        let tessellated = stages.iter().any(|s| {
            s.stage.intersects(
                vk::ShaderStageFlags::TESSELLATION_CONTROL
                    | vk::ShaderStageFlags::TESSELLATION_EVALUATION,
            )
        });
        let discard = !dynamic.contains(&vk::DynamicState::RASTERIZER_DISCARD_ENABLE)
            && unsafe { self.p_rasterization_state.as_ref() }
                .is_some_and(|r| r.rasterizer_discard_enable == vk::TRUE);

        unsafe {
            out.p_stages = c.deep_slice(self.p_stages, self.stage_count as usize)?;
            out.p_vertex_input_state = c.deep_one(self.p_vertex_input_state)?;
            out.p_input_assembly_state = c.deep_one(self.p_input_assembly_state)?;
            out.p_rasterization_state = c.deep_one(self.p_rasterization_state)?;
            out.p_dynamic_state = c.deep_one(self.p_dynamic_state)?;
            out.p_tessellation_state = if tessellated {
                c.deep_one(self.p_tessellation_state)?
            } else {
                std::ptr::null()
            };
            if discard {
                out.p_viewport_state = std::ptr::null();
                out.p_multisample_state = std::ptr::null();
                out.p_depth_stencil_state = std::ptr::null();
                out.p_color_blend_state = std::ptr::null();
            } else {
                out.p_viewport_state = match self.p_viewport_state.as_ref() {
                    Some(viewport) => {
                        // Dynamic viewports and scissors leave their arrays unread
                        let mut viewport = *viewport;
                        if dynamic.contains(&vk::DynamicState::VIEWPORT) {
                            viewport.p_viewports = std::ptr::null();
                        }
                        if dynamic.contains(&vk::DynamicState::SCISSOR) {
                            viewport.p_scissors = std::ptr::null();
                        }
                        let source: *const vk::PipelineViewportStateCreateInfo<'_> = &viewport;
                        c.deep_one(source)?
                    }
                    None => std::ptr::null(),
                };
                out.p_multisample_state = c.deep_one(self.p_multisample_state)?;
                out.p_depth_stencil_state = c.deep_one(self.p_depth_stencil_state)?;
                out.p_color_blend_state = c.deep_one(self.p_color_blend_state)?;
            }
        }
        Ok(out)
    }
}
