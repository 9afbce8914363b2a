//! Deep-copy tests: clones are independent of the caller's memory, known
//! extension links are kept in order, unknown ones are skipped or rejected.

use std::ffi::{c_void, CStr};

use ash::vk;
use ash::vk::Handle;
use vkcap_core::UnknownExtensionPolicy;
use vkcap_layer::clone::{chain_types, is_known_extension, Cloned};
use vkcap_layer::{CloneError, CreateInfo};

mod common;

#[test]
fn test_clone_is_independent_of_source() {
    let mut families = vec![0u32, 2, 5];
    let info = vk::BufferCreateInfo::default()
        .size(1024)
        .usage(vk::BufferUsageFlags::TRANSFER_DST)
        .sharing_mode(vk::SharingMode::CONCURRENT)
        .queue_family_indices(&families);

    let cloned = unsafe { Cloned::new(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let source_ptr = families.as_ptr();
    families.iter_mut().for_each(|f| *f = 99);
    drop(families);

    let copy = cloned.get();
    assert_eq!(copy.size, 1024);
    assert_eq!(copy.queue_family_index_count, 3);
    assert_ne!(copy.p_queue_family_indices, source_ptr);
    let indices = unsafe { std::slice::from_raw_parts(copy.p_queue_family_indices, 3) };
    assert_eq!(indices, &[0, 2, 5]);
    assert!(cloned.arena().bytes() >= 3 * std::mem::size_of::<u32>());
}

#[test]
fn test_instance_strings_are_copied() {
    let layers = [c"VK_LAYER_KHRONOS_validation".as_ptr()];
    let extensions = [c"VK_KHR_surface".as_ptr(), c"VK_EXT_headless_surface".as_ptr()];
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"cloner")
        .engine_name(c"engine")
        .api_version(vk::API_VERSION_1_2);
    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);

    let cloned = unsafe { Cloned::new(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let copy = cloned.get();

    assert_ne!(copy.pp_enabled_extension_names, extensions.as_ptr());
    let names: Vec<&CStr> = unsafe {
        std::slice::from_raw_parts(copy.pp_enabled_extension_names, 2)
            .iter()
            .map(|&p| CStr::from_ptr(p))
            .collect()
    };
    assert_eq!(names, vec![c"VK_KHR_surface", c"VK_EXT_headless_surface"]);

    let app = unsafe { &*copy.p_application_info };
    assert_ne!(copy.p_application_info, &app_info as *const _);
    assert_eq!(app.api_version, vk::API_VERSION_1_2);
    assert_eq!(unsafe { CStr::from_ptr(app.p_application_name) }, c"cloner");
}

#[test]
fn test_known_extensions_keep_chain_order() {
    let mut external = vk::ExternalMemoryBufferCreateInfo::default()
        .handle_types(vk::ExternalMemoryHandleTypeFlags::OPAQUE_FD);
    let view_formats = [vk::Format::R8G8B8A8_UNORM, vk::Format::R8G8B8A8_SRGB];
    let mut format_list = vk::ImageFormatListCreateInfo::default().view_formats(&view_formats);
    let mut stencil = vk::ImageStencilUsageCreateInfo::default()
        .stencil_usage(vk::ImageUsageFlags::SAMPLED);

    let buffer = common::buffer_info(64).push_next(&mut external);
    let buffer_copy = unsafe { CreateInfo::record(&buffer, UnknownExtensionPolicy::Reject) }.unwrap();
    assert_eq!(
        buffer_copy.extensions(),
        vec![vk::StructureType::EXTERNAL_MEMORY_BUFFER_CREATE_INFO]
    );

    // push_next inserts right after the root: the chain is stencil -> format list
    let image = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .push_next(&mut format_list)
        .push_next(&mut stencil);
    let image_copy = unsafe { CreateInfo::record(&image, UnknownExtensionPolicy::Reject) }.unwrap();
    assert_eq!(
        image_copy.extensions(),
        vec![
            vk::StructureType::IMAGE_STENCIL_USAGE_CREATE_INFO,
            vk::StructureType::IMAGE_FORMAT_LIST_CREATE_INFO,
        ]
    );
    assert!(image_copy.skipped_extensions().is_empty());

    // The format array behind the second link is owned by the clone
    let copy = image_copy.image().unwrap();
    let stencil_copy = unsafe { &*(copy.p_next as *const vk::ImageStencilUsageCreateInfo<'_>) };
    let list_copy =
        unsafe { &*(stencil_copy.p_next as *const vk::ImageFormatListCreateInfo<'_>) };
    assert_ne!(list_copy.p_view_formats, view_formats.as_ptr());
    let formats = unsafe { std::slice::from_raw_parts(list_copy.p_view_formats, 2) };
    assert_eq!(formats, &view_formats);
}

#[test]
fn test_unknown_extension_is_skipped() {
    let mut external = vk::ExternalMemoryBufferCreateInfo::default();
    let mut opaque = vk::BufferOpaqueCaptureAddressCreateInfo::default().opaque_capture_address(7);
    assert!(!is_known_extension(opaque.s_type));

    // chain: opaque (unknown) -> external (known)
    let info = common::buffer_info(64)
        .push_next(&mut external)
        .push_next(&mut opaque);
    assert_eq!(
        unsafe { chain_types(info.p_next) },
        vec![
            vk::StructureType::BUFFER_OPAQUE_CAPTURE_ADDRESS_CREATE_INFO,
            vk::StructureType::EXTERNAL_MEMORY_BUFFER_CREATE_INFO,
        ]
    );

    let record = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    assert_eq!(
        record.extensions(),
        vec![vk::StructureType::EXTERNAL_MEMORY_BUFFER_CREATE_INFO]
    );
    assert_eq!(
        record.skipped_extensions(),
        &[vk::StructureType::BUFFER_OPAQUE_CAPTURE_ADDRESS_CREATE_INFO]
    );

    let summary = record.summary();
    assert_eq!(summary.kind, "BufferCreateInfo");
    assert_eq!(summary.skipped_extensions.len(), 1);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let mut opaque = vk::BufferOpaqueCaptureAddressCreateInfo::default();
    let info = common::buffer_info(64).push_next(&mut opaque);

    let err = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Reject) }.unwrap_err();
    assert_eq!(
        err,
        CloneError::UnknownExtension(vk::StructureType::BUFFER_OPAQUE_CAPTURE_ADDRESS_CREATE_INFO)
    );
    assert_eq!(vk::Result::from(err), vk::Result::ERROR_EXTENSION_NOT_PRESENT);
}

#[test]
fn test_shader_code_is_copied_by_words() {
    let info = vk::ShaderModuleCreateInfo::default().code(&common::SPIRV_WORDS);
    let record = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let copy = record.shader_module().unwrap();

    assert_eq!(copy.code_size, 16);
    assert_ne!(copy.p_code, common::SPIRV_WORDS.as_ptr());
    let words = unsafe { std::slice::from_raw_parts(copy.p_code, 4) };
    assert_eq!(words, &common::SPIRV_WORDS);
}

#[test]
fn test_shader_code_size_must_be_word_aligned() {
    let mut info = vk::ShaderModuleCreateInfo::default().code(&common::SPIRV_WORDS);
    info.code_size = 14;

    let err = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Skip) }.unwrap_err();
    assert_eq!(err, CloneError::CodeSizeNotAligned(14));
}

#[test]
fn test_nested_pipeline_state_is_copied() {
    let entry = c"main";
    let specialization_data = [1u8, 0, 0, 0];
    let map_entries = [vk::SpecializationMapEntry {
        constant_id: 0,
        offset: 0,
        size: 4,
    }];
    let specialization = vk::SpecializationInfo::default()
        .map_entries(&map_entries)
        .data(&specialization_data);
    let module = vk::ShaderModule::from_raw(0x51);
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(module)
            .name(entry)
            .specialization_info(&specialization),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(module)
            .name(entry),
    ];
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .dynamic_state(&dynamic);

    let record = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let copy = record.graphics_pipeline().unwrap();

    assert_eq!(copy.stage_count, 2);
    assert_ne!(copy.p_stages, stages.as_ptr());
    let copied_stages = unsafe { std::slice::from_raw_parts(copy.p_stages, 2) };
    assert_eq!(copied_stages[1].stage, vk::ShaderStageFlags::FRAGMENT);
    assert_eq!(unsafe { CStr::from_ptr(copied_stages[0].p_name) }, entry);
    assert_ne!(copied_stages[0].p_name, entry.as_ptr());

    let spec = unsafe { &*copied_stages[0].p_specialization_info };
    let data = unsafe { std::slice::from_raw_parts(spec.p_data as *const u8, spec.data_size) };
    assert_eq!(data, &specialization_data);
    assert!(copied_stages[1].p_specialization_info.is_null());

    let dynamic_copy = unsafe { &*copy.p_dynamic_state };
    let states = unsafe {
        std::slice::from_raw_parts(
            dynamic_copy.p_dynamic_states,
            dynamic_copy.dynamic_state_count as usize,
        )
    };
    assert_eq!(states, &dynamic_states);
}

#[test]
fn test_null_chain_has_no_extensions() {
    let record =
        unsafe { CreateInfo::record(&common::buffer_info(8), UnknownExtensionPolicy::Reject) }
            .unwrap();
    assert!(record.extensions().is_empty());
    assert_eq!(record.s_type(), vk::StructureType::BUFFER_CREATE_INFO);
    assert!(unsafe { chain_types(std::ptr::null::<c_void>()) }.is_empty());
}

/// An address no Vulkan array lives at; reading it would fault.
const UNREADABLE: usize = 0x10;

#[test]
fn test_exclusive_sharing_ignores_queue_family_indices() {
    let mut buffer = common::buffer_info(256);
    buffer.queue_family_index_count = 4;
    buffer.p_queue_family_indices = UNREADABLE as *const u32;
    let cloned = unsafe { Cloned::new(&buffer, UnknownExtensionPolicy::Skip) }.unwrap();
    assert!(cloned.get().p_queue_family_indices.is_null());
    assert_eq!(cloned.get().queue_family_index_count, 0);
    assert_eq!(cloned.get().size, 256);

    let mut image = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    image.queue_family_index_count = 2;
    image.p_queue_family_indices = UNREADABLE as *const u32;
    let cloned = unsafe { Cloned::new(&image, UnknownExtensionPolicy::Skip) }.unwrap();
    assert!(cloned.get().p_queue_family_indices.is_null());

    let mut swapchain = vk::SwapchainCreateInfoKHR::default()
        .min_image_count(2)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE);
    swapchain.queue_family_index_count = 3;
    swapchain.p_queue_family_indices = UNREADABLE as *const u32;
    let cloned = unsafe { Cloned::new(&swapchain, UnknownExtensionPolicy::Skip) }.unwrap();
    assert!(cloned.get().p_queue_family_indices.is_null());
    assert_eq!(cloned.get().min_image_count, 2);
}

#[test]
fn test_immutable_samplers_only_read_for_sampler_bindings() {
    let samplers = [vk::Sampler::from_raw(0x5a), vk::Sampler::from_raw(0x5b)];
    let mut uniform = vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(2)
        .stage_flags(vk::ShaderStageFlags::VERTEX);
    uniform.p_immutable_samplers = UNREADABLE as *const vk::Sampler;
    let combined = vk::DescriptorSetLayoutBinding::default()
        .binding(1)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .stage_flags(vk::ShaderStageFlags::FRAGMENT)
        .immutable_samplers(&samplers);
    let bindings = [uniform, combined];
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

    let cloned = unsafe { Cloned::new(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let copied = unsafe { std::slice::from_raw_parts(cloned.get().p_bindings, 2) };
    assert!(copied[0].p_immutable_samplers.is_null());
    assert_eq!(copied[0].descriptor_count, 2);
    assert_ne!(copied[1].p_immutable_samplers, samplers.as_ptr());
    let copied_samplers = unsafe { std::slice::from_raw_parts(copied[1].p_immutable_samplers, 2) };
    assert_eq!(copied_samplers, &samplers);
}

#[test]
fn test_rasterizer_discard_skips_fragment_states() {
    let module = vk::ShaderModule::from_raw(0x51);
    let stages = [vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(module)
        .name(c"main")];
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .rasterizer_discard_enable(true)
        .line_width(1.0);
    let mut info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .rasterization_state(&rasterization);
    info.p_tessellation_state = UNREADABLE as *const _;
    info.p_viewport_state = UNREADABLE as *const _;
    info.p_multisample_state = UNREADABLE as *const _;
    info.p_depth_stencil_state = UNREADABLE as *const _;
    info.p_color_blend_state = UNREADABLE as *const _;

    let record = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let copy = record.graphics_pipeline().unwrap();

    assert!(copy.p_tessellation_state.is_null());
    assert!(copy.p_viewport_state.is_null());
    assert!(copy.p_multisample_state.is_null());
    assert!(copy.p_depth_stencil_state.is_null());
    assert!(copy.p_color_blend_state.is_null());
    let raster = unsafe { &*copy.p_rasterization_state };
    assert_eq!(raster.rasterizer_discard_enable, vk::TRUE);
}

#[test]
fn test_dynamic_viewport_array_is_not_read() {
    let module = vk::ShaderModule::from_raw(0x51);
    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(module)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::TESSELLATION_CONTROL)
            .module(module)
            .name(c"main"),
    ];
    let tessellation = vk::PipelineTessellationStateCreateInfo::default().patch_control_points(3);
    let scissors = [vk::Rect2D::default()];
    let mut viewport = vk::PipelineViewportStateCreateInfo::default().scissors(&scissors);
    viewport.viewport_count = 1;
    viewport.p_viewports = UNREADABLE as *const vk::Viewport;
    let dynamic_states = [vk::DynamicState::VIEWPORT];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .tessellation_state(&tessellation)
        .viewport_state(&viewport)
        .dynamic_state(&dynamic);

    let record = unsafe { CreateInfo::record(&info, UnknownExtensionPolicy::Skip) }.unwrap();
    let copy = record.graphics_pipeline().unwrap();

    // Tessellation stages make the tessellation state meaningful
    let tess = unsafe { &*copy.p_tessellation_state };
    assert_eq!(tess.patch_control_points, 3);

    let viewport_copy = unsafe { &*copy.p_viewport_state };
    assert!(viewport_copy.p_viewports.is_null());
    assert_eq!(viewport_copy.viewport_count, 1);
    assert_eq!(viewport_copy.scissor_count, 1);
    assert_ne!(viewport_copy.p_scissors, scissors.as_ptr());
    assert!(!viewport_copy.p_scissors.is_null());
}
