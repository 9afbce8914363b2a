//! End-to-end capture scenarios through a configured capture session.
//!
//! Each scenario drives a full object lifetime through the chain and checks
//! the handle table against what the application still holds.

use std::sync::Arc;

use ash::vk;
use vkcap_core::config::CaptureConfig;
use vkcap_core::HandleType;
use vkcap_layer::{count_by_type, key_of, CaptureSession, Dispatch, DryRunDriver};

mod common;

fn session() -> (Arc<DryRunDriver>, CaptureSession) {
    let _ = vkcap_common::try_init_logging();
    let driver = Arc::new(DryRunDriver::new());
    let config = CaptureConfig {
        trace_calls: true,
        ..CaptureConfig::default()
    };
    let session = CaptureSession::new(&config, driver.clone() as Arc<dyn Dispatch>).unwrap();
    (driver, session)
}

#[test]
fn test_device_and_buffer_teardown_empties_table() {
    let (driver, session) = session();
    let chain = session.chain();
    assert_eq!(chain.depth(), 2);

    let booted = common::boot(chain);
    let buffer = common::create_buffer(chain, booted.device, 65536);

    let counts = count_by_type(&session.live_objects());
    assert_eq!(counts.get(&HandleType::Buffer), Some(&1));
    assert_eq!(counts.get(&HandleType::Device), Some(&1));

    let json = serde_json::to_value(session.live_objects()).unwrap();
    let last = &json.as_array().unwrap()[3];
    assert_eq!(last["handle_type"], "buffer");
    assert_eq!(last["create_info"]["kind"], "BufferCreateInfo");
    assert_eq!(last["parent"]["ty"], "device");

    unsafe {
        chain.destroy_buffer(booted.device, buffer, None);
        chain.destroy_device(booted.device, None);
        chain.destroy_instance(booted.instance, None);
    }

    assert!(session.table().is_empty());
    assert_eq!(driver.live_handles(), 0);
}

#[test]
fn test_swapchain_images_are_tracked_once() {
    let (driver, session) = session();
    let chain = session.chain();
    let booted = common::boot(chain);

    let surface = unsafe {
        chain.create_headless_surface(
            booted.instance,
            &vk::HeadlessSurfaceCreateInfoEXT::default(),
            None,
        )
    }
    .unwrap();
    let swapchain_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(3)
        .image_format(vk::Format::B8G8R8A8_UNORM)
        .image_extent(vk::Extent2D {
            width: 640,
            height: 480,
        })
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .present_mode(vk::PresentModeKHR::FIFO);
    let swapchain = unsafe { chain.create_swapchain(booted.device, &swapchain_info, None) }.unwrap();

    let images = unsafe { chain.get_swapchain_images(booted.device, swapchain) }.unwrap();
    let again = unsafe { chain.get_swapchain_images(booted.device, swapchain) }.unwrap();
    assert_eq!(images.len(), 3);
    assert_eq!(images, again);

    let table = session.table();
    assert_eq!(table.count_of(HandleType::Image), 3);
    assert_eq!(table.children_of(key_of(swapchain), HandleType::Image).len(), 3);
    assert_eq!(table.lookup_handle(swapchain).unwrap().swapchain_images(), &images[..]);

    let recorded = table.lookup_handle(swapchain).unwrap();
    let info = recorded.create_info().unwrap().swapchain().unwrap();
    assert_eq!(info.min_image_count, 3);
    assert_eq!(info.surface, surface);
    drop(recorded);

    unsafe {
        chain.destroy_swapchain(booted.device, swapchain, None);
        chain.destroy_surface(booted.instance, surface, None);
        chain.destroy_device(booted.device, None);
        chain.destroy_instance(booted.instance, None);
    }
    assert!(table.is_empty());
    assert_eq!(driver.live_handles(), 0);
}

#[test]
fn test_failed_buffer_creation_leaves_nothing_behind() {
    let (driver, session) = session();
    let chain = session.chain();
    let booted = common::boot(chain);

    driver.queue_result("create_buffer", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    let result = unsafe { chain.create_buffer(booted.device, &common::buffer_info(1 << 40), None) };
    assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    assert_eq!(session.table().count_of(HandleType::Buffer), 0);

    unsafe {
        chain.destroy_device(booted.device, None);
        chain.destroy_instance(booted.instance, None);
    }
    assert!(session.table().is_empty());
}
