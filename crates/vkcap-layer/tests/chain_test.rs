//! Transform chain tests: forwarding, before/after ordering across links,
//! short-circuiting and call tracing.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use parking_lot::Mutex;
use vkcap_layer::{CallTrace, ChainBuilder, Dispatch, DryRunDriver, Transform, ENTRY_POINTS};

mod common;

/// Logs when a `create_buffer` passes through it in each direction.
struct Probe {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Transform for Probe {
    unsafe fn create_buffer(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::BufferCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Buffer> {
        self.log.lock().push(format!("{} before", self.name));
        let result = unsafe { next.create_buffer(device, create_info, allocator) };
        self.log.lock().push(format!("{} after", self.name));
        result
    }
}

/// Fails every buffer creation without asking the driver.
struct DenyBuffers;

impl Transform for DenyBuffers {
    unsafe fn create_buffer(
        &self,
        _next: &dyn Dispatch,
        _device: vk::Device,
        _create_info: &vk::BufferCreateInfo<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Buffer> {
        Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
    }
}

#[test]
fn test_empty_chain_reaches_driver() {
    let driver = Arc::new(DryRunDriver::new());
    let chain = ChainBuilder::new().build(driver.clone() as Arc<dyn Dispatch>);
    assert_eq!(chain.depth(), 0);

    let booted = common::boot(&chain);
    let buffer = common::create_buffer(&chain, booted.device, 128);

    assert!(driver.is_live(buffer));
    assert_eq!(
        driver.calls(),
        vec!["create_instance", "enumerate_physical_devices", "create_device", "create_buffer"]
    );
}

#[test]
fn test_links_run_in_application_to_driver_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let driver = Arc::new(DryRunDriver::new());
    let chain = ChainBuilder::new()
        .with(Probe {
            name: "outer",
            log: log.clone(),
        })
        .with(Probe {
            name: "inner",
            log: log.clone(),
        })
        .build(driver.clone() as Arc<dyn Dispatch>);
    assert_eq!(chain.depth(), 2);

    let booted = common::boot(&chain);
    common::create_buffer(&chain, booted.device, 16);

    assert_eq!(
        *log.lock(),
        vec!["outer before", "inner before", "inner after", "outer after"]
    );
}

#[test]
fn test_transform_can_short_circuit() {
    let driver = Arc::new(DryRunDriver::new());
    let chain = ChainBuilder::new()
        .with(DenyBuffers)
        .build(driver.clone() as Arc<dyn Dispatch>);

    let booted = common::boot(&chain);
    let result = unsafe { chain.create_buffer(booted.device, &common::buffer_info(16), None) };

    assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
    assert_eq!(driver.call_count("create_buffer"), 0);
    // Everything else still forwards
    assert_eq!(driver.call_count("create_device"), 1);
}

#[test]
fn test_call_trace_counts_every_call() {
    let trace = Arc::new(CallTrace::new());
    let driver = Arc::new(DryRunDriver::new());
    let chain = ChainBuilder::new()
        .with(trace.clone())
        .build(driver.clone() as Arc<dyn Dispatch>);

    let booted = common::boot(&chain);
    driver.queue_result("create_buffer", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
    let failed = unsafe { chain.create_buffer(booted.device, &common::buffer_info(16), None) };
    assert_eq!(failed, Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
    unsafe { chain.destroy_device(booted.device, None) };

    assert_eq!(trace.calls(), 5);
    assert_eq!(driver.calls().len(), 5);
}

#[test]
fn test_entry_points_are_listed_once() {
    let mut names = ENTRY_POINTS.to_vec();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), ENTRY_POINTS.len());
    assert!(ENTRY_POINTS.contains(&"create_graphics_pipelines"));
    assert!(ENTRY_POINTS.contains(&"queue_present"));
}
