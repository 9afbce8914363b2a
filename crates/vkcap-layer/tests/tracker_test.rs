//! Creation/destruction tracker tests, run against the dry-run driver.

use std::thread;

use ash::vk;
use vkcap_core::{HandleType, TrackedTypes};
use vkcap_layer::{key_of, Dispatch, ObjectState};

mod common;

use common::{boot, buffer_info, capture, capture_with, create_buffer};

#[test]
fn test_created_objects_are_shadowed() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let buffer = create_buffer(&cap.chain, booted.device, 4096);

    // instance + physical device + device + buffer
    assert_eq!(cap.table.len(), 4);

    let shadow = cap.table.lookup_handle(buffer).unwrap();
    assert_eq!(shadow.parent(), Some(key_of(booted.device)));
    let info = shadow.create_info().unwrap().buffer().unwrap();
    assert_eq!(info.size, 4096);
    assert_eq!(info.usage, vk::BufferUsageFlags::STORAGE_BUFFER);

    let device = cap.table.lookup_handle(booted.device).unwrap();
    assert_eq!(device.parent(), Some(key_of(booted.physical_device)));
    let device_info = device.create_info().unwrap().device().unwrap();
    assert_eq!(device_info.queue_create_info_count, 1);
}

#[test]
fn test_only_tracked_types_are_shadowed() {
    let cap = capture_with(
        TrackedTypes::BUFFER | TrackedTypes::FENCE,
        Default::default(),
    );
    let booted = boot(&cap.chain);
    let buffer = create_buffer(&cap.chain, booted.device, 64);
    let sampler = unsafe {
        cap.chain
            .create_sampler(booted.device, &vk::SamplerCreateInfo::default(), None)
    }
    .unwrap();

    assert_eq!(cap.table.len(), 1);
    assert!(cap.table.contains_handle(buffer));
    assert!(!cap.table.contains_handle(sampler));
    assert!(!cap.table.contains_handle(booted.device));

    // Destroying untracked objects is not a desync
    unsafe { cap.chain.destroy_sampler(booted.device, sampler, None) };
    unsafe { cap.chain.destroy_device(booted.device, None) };
    assert!(!cap.driver.is_live(sampler));
}

#[test]
fn test_buffer_only_scope_leaves_images_untracked() {
    let cap = capture_with(TrackedTypes::BUFFER, Default::default());
    let booted = boot(&cap.chain);

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(vk::Format::R8G8B8A8_UNORM)
        .extent(vk::Extent3D {
            width: 16,
            height: 16,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .usage(vk::ImageUsageFlags::SAMPLED);
    let image = unsafe { cap.chain.create_image(booted.device, &image_info, None) }.unwrap();
    assert!(cap.table.is_empty());

    let buffer = create_buffer(&cap.chain, booted.device, 64);
    assert_eq!(cap.table.len(), 1);
    assert!(cap.table.contains_handle(buffer));
    assert!(!cap.table.contains_handle(image));
    assert!(cap.driver.is_live(image));

    unsafe { cap.chain.destroy_image(booted.device, image, None) };
    assert_eq!(cap.table.len(), 1);
}

#[test]
fn test_exclusive_buffer_with_stale_family_pointer_is_tracked() {
    let cap = capture();
    let booted = boot(&cap.chain);

    // Ignored under exclusive sharing, so any value is valid
    let mut info = buffer_info(512);
    info.queue_family_index_count = 4;
    info.p_queue_family_indices = 0x10 as *const u32;
    let buffer = unsafe { cap.chain.create_buffer(booted.device, &info, None) }.unwrap();

    assert!(cap.driver.is_live(buffer));
    let shadow = cap.table.lookup_handle(buffer).unwrap();
    let recorded = shadow.create_info().unwrap().buffer().unwrap();
    assert_eq!(recorded.size, 512);
    assert!(recorded.p_queue_family_indices.is_null());
}

#[test]
fn test_failed_create_leaves_table_unchanged() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let before = cap.table.len();

    cap.driver
        .queue_result("create_buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    let result = unsafe { cap.chain.create_buffer(booted.device, &buffer_info(64), None) };

    assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    assert_eq!(cap.table.len(), before);
    assert_eq!(cap.table.count_of(HandleType::Buffer), 0);
}

#[test]
fn test_destroy_removes_shadow() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let buffer = create_buffer(&cap.chain, booted.device, 64);

    unsafe { cap.chain.destroy_buffer(booted.device, buffer, None) };

    assert!(!cap.table.contains_handle(buffer));
    assert!(!cap.driver.is_live(buffer));
}

#[test]
fn test_destroy_null_handle_is_ignored() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let before = cap.table.len();

    unsafe { cap.chain.destroy_buffer(booted.device, vk::Buffer::null(), None) };
    unsafe { cap.chain.destroy_descriptor_pool(booted.device, vk::DescriptorPool::null(), None) };

    assert_eq!(cap.table.len(), before);
}

#[test]
fn test_memory_allocation_state() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let info = vk::MemoryAllocateInfo::default()
        .allocation_size(1 << 20)
        .memory_type_index(0);
    let memory = unsafe { cap.chain.allocate_memory(booted.device, &info, None) }.unwrap();

    assert_eq!(
        *cap.table.lookup_handle(memory).unwrap().state(),
        ObjectState::DeviceMemory {
            allocation_size: 1 << 20,
            memory_type_index: 0
        }
    );

    unsafe { cap.chain.free_memory(booted.device, memory, None) };
    assert!(!cap.table.contains_handle(memory));
}

#[test]
fn test_batch_allocation_tracks_every_handle() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let pool = unsafe {
        cap.chain.create_command_pool(
            booted.device,
            &vk::CommandPoolCreateInfo::default().queue_family_index(0),
            None,
        )
    }
    .unwrap();

    let alloc = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(3);
    let buffers = unsafe { cap.chain.allocate_command_buffers(booted.device, &alloc) }.unwrap();

    assert_eq!(buffers.len(), 3);
    assert_eq!(cap.table.count_of(HandleType::CommandBuffer), 3);
    for &cb in &buffers {
        let shadow = cap.table.lookup_handle(cb).unwrap();
        assert_eq!(shadow.parent(), Some(key_of(pool)));
        assert_eq!(
            *shadow.state(),
            ObjectState::CommandBuffer {
                pool,
                level: vk::CommandBufferLevel::PRIMARY
            }
        );
        let info = shadow.create_info().unwrap().command_buffer().unwrap();
        assert_eq!(info.command_buffer_count, 3);
    }

    unsafe { cap.chain.free_command_buffers(booted.device, pool, &buffers[..1]) };
    assert_eq!(cap.table.count_of(HandleType::CommandBuffer), 2);

    // The pool takes the remaining buffers with it
    unsafe { cap.chain.destroy_command_pool(booted.device, pool, None) };
    assert_eq!(cap.table.count_of(HandleType::CommandBuffer), 0);
    assert!(!cap.table.contains_handle(pool));
}

#[test]
fn test_descriptor_pool_reset_and_destroy_free_sets() {
    let cap = capture();
    let booted = boot(&cap.chain);

    let bindings = [vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::COMPUTE)];
    let layout = unsafe {
        cap.chain.create_descriptor_set_layout(
            booted.device,
            &vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings),
            None,
        )
    }
    .unwrap();

    let sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_BUFFER,
        descriptor_count: 8,
    }];
    let pool = unsafe {
        cap.chain.create_descriptor_pool(
            booted.device,
            &vk::DescriptorPoolCreateInfo::default()
                .max_sets(4)
                .pool_sizes(&sizes),
            None,
        )
    }
    .unwrap();

    let layouts = [layout, layout];
    let alloc = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);
    let sets = unsafe { cap.chain.allocate_descriptor_sets(booted.device, &alloc) }.unwrap();
    assert_eq!(cap.table.children_of(key_of(pool), HandleType::DescriptorSet).len(), 2);
    assert_eq!(
        *cap.table.lookup_handle(sets[1]).unwrap().state(),
        ObjectState::DescriptorSet { pool, layout }
    );

    unsafe {
        cap.chain
            .reset_descriptor_pool(booted.device, pool, vk::DescriptorPoolResetFlags::empty())
    }
    .unwrap();
    assert_eq!(cap.table.count_of(HandleType::DescriptorSet), 0);

    unsafe { cap.chain.allocate_descriptor_sets(booted.device, &alloc) }.unwrap();
    unsafe { cap.chain.destroy_descriptor_pool(booted.device, pool, None) };
    assert_eq!(cap.table.count_of(HandleType::DescriptorSet), 0);
    assert!(cap.table.contains_handle(layout));
}

#[test]
fn test_partial_pipeline_batch_registers_created_handles() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let module = unsafe {
        cap.chain.create_shader_module(
            booted.device,
            &vk::ShaderModuleCreateInfo::default().code(&common::SPIRV_WORDS),
            None,
        )
    }
    .unwrap();
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(c"main");
    let infos = [vk::ComputePipelineCreateInfo::default().stage(stage); 3];

    cap.driver.queue_result(
        "create_compute_pipelines",
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
    );
    let (pipelines, err) = unsafe {
        cap.chain
            .create_compute_pipelines(booted.device, vk::PipelineCache::null(), &infos, None)
    }
    .unwrap_err();

    assert_eq!(err, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    assert_eq!(pipelines.len(), 3);
    assert_eq!(pipelines[2], vk::Pipeline::null());
    assert_eq!(cap.table.count_of(HandleType::Pipeline), 2);

    let shadow = cap.table.lookup_handle(pipelines[0]).unwrap();
    assert_eq!(
        *shadow.state(),
        ObjectState::Pipeline {
            bind_point: vk::PipelineBindPoint::COMPUTE,
            cache: vk::PipelineCache::null()
        }
    );
    let info = shadow.create_info().unwrap().compute_pipeline().unwrap();
    assert_eq!(info.stage.module, module);
}

#[test]
fn test_queries_are_idempotent() {
    let cap = capture();
    let booted = boot(&cap.chain);

    let first = unsafe { cap.chain.get_device_queue(booted.device, 0, 0) };
    let again = unsafe { cap.chain.get_device_queue(booted.device, 0, 0) };
    let other = unsafe { cap.chain.get_device_queue(booted.device, 0, 1) };
    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(cap.table.count_of(HandleType::Queue), 2);
    assert_eq!(
        *cap.table.lookup_handle(other).unwrap().state(),
        ObjectState::Queue {
            family_index: 0,
            queue_index: 1
        }
    );

    unsafe { cap.chain.enumerate_physical_devices(booted.instance) }.unwrap();
    assert_eq!(cap.table.count_of(HandleType::PhysicalDevice), 1);

    // Queues go away with their device
    unsafe { cap.chain.destroy_device(booted.device, None) };
    assert_eq!(cap.table.count_of(HandleType::Queue), 0);
}

#[test]
#[should_panic(expected = "handle tracking desync")]
fn test_double_destroy_aborts() {
    let cap = capture();
    let booted = boot(&cap.chain);
    let fence = unsafe {
        cap.chain
            .create_fence(booted.device, &vk::FenceCreateInfo::default(), None)
    }
    .unwrap();

    unsafe { cap.chain.destroy_fence(booted.device, fence, None) };
    unsafe { cap.chain.destroy_fence(booted.device, fence, None) };
}

#[test]
fn test_double_destroy_is_logged_under_log_policy() {
    let cap = capture_with(TrackedTypes::all(), common::log_policy());
    let booted = boot(&cap.chain);
    let fence = unsafe {
        cap.chain
            .create_fence(booted.device, &vk::FenceCreateInfo::default(), None)
    }
    .unwrap();

    unsafe { cap.chain.destroy_fence(booted.device, fence, None) };
    unsafe { cap.chain.destroy_fence(booted.device, fence, None) };

    // The driver still sees both calls
    assert_eq!(cap.driver.call_count("destroy_fence"), 2);
    assert!(!cap.table.contains_handle(fence));
}

#[test]
fn test_rejected_extension_fails_before_driver() {
    let cap = capture_with(TrackedTypes::all(), common::reject_policy());
    let booted = boot(&cap.chain);
    let before = cap.table.len();

    let mut opaque = vk::BufferOpaqueCaptureAddressCreateInfo::default();
    let info = buffer_info(64).push_next(&mut opaque);
    let result = unsafe { cap.chain.create_buffer(booted.device, &info, None) };

    assert_eq!(result, Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
    assert_eq!(cap.driver.call_count("create_buffer"), 0);
    assert_eq!(cap.table.len(), before);
}

#[test]
fn test_skipped_extension_is_recorded() {
    let cap = capture();
    let booted = boot(&cap.chain);

    let mut opaque = vk::BufferOpaqueCaptureAddressCreateInfo::default();
    let info = buffer_info(64).push_next(&mut opaque);
    let buffer = unsafe { cap.chain.create_buffer(booted.device, &info, None) }.unwrap();

    let shadow = cap.table.lookup_handle(buffer).unwrap();
    let record = shadow.create_info().unwrap();
    assert!(record.extensions().is_empty());
    assert_eq!(
        record.skipped_extensions(),
        &[vk::StructureType::BUFFER_OPAQUE_CAPTURE_ADDRESS_CREATE_INFO]
    );
}

#[test]
fn test_concurrent_creates_through_chain() {
    let cap = capture();
    let booted = boot(&cap.chain);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut created = Vec::new();
                for _ in 0..100 {
                    created.push(create_buffer(&cap.chain, booted.device, 16));
                }
                for buffer in created.into_iter().step_by(2) {
                    unsafe { cap.chain.destroy_buffer(booted.device, buffer, None) };
                }
            });
        }
    });

    assert_eq!(cap.table.count_of(HandleType::Buffer), 4 * 50);
    assert_eq!(cap.driver.live_handles(), cap.table.len() - 1);
}
