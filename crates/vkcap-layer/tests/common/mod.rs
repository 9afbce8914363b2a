//! Shared fixtures: chains over the dry-run driver and a booted device.

#![allow(dead_code)]

use std::sync::Arc;

use ash::vk;
use vkcap_core::{DesyncPolicy, TrackedTypes, UnknownExtensionPolicy};
use vkcap_layer::{Chain, ChainBuilder, Dispatch, DryRunDriver, HandleTable, Tracker, TrackerPolicy};

pub struct Capture {
    pub driver: Arc<DryRunDriver>,
    pub table: Arc<HandleTable>,
    pub chain: Chain,
}

/// `tracker -> dry-run driver`, tracking every handle type.
pub fn capture() -> Capture {
    capture_with(TrackedTypes::all(), TrackerPolicy::default())
}

pub fn capture_with(tracked: TrackedTypes, policy: TrackerPolicy) -> Capture {
    let driver = Arc::new(DryRunDriver::new());
    let table = Arc::new(HandleTable::new());
    let chain = ChainBuilder::new()
        .with(Tracker::new(table.clone(), tracked, policy))
        .build(driver.clone() as Arc<dyn Dispatch>);
    Capture {
        driver,
        table,
        chain,
    }
}

pub fn log_policy() -> TrackerPolicy {
    TrackerPolicy {
        unknown_extensions: UnknownExtensionPolicy::Skip,
        on_desync: DesyncPolicy::Log,
    }
}

pub fn reject_policy() -> TrackerPolicy {
    TrackerPolicy {
        unknown_extensions: UnknownExtensionPolicy::Reject,
        on_desync: DesyncPolicy::Abort,
    }
}

pub struct Booted {
    pub instance: vk::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub device: vk::Device,
}

/// Create an instance, pick the first physical device and create a device on it.
pub fn boot(chain: &Chain) -> Booted {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vkcap-test")
        .api_version(vk::API_VERSION_1_3);
    let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
    let instance = unsafe { chain.create_instance(&instance_info, None) }.unwrap();

    let physical_device = unsafe { chain.enumerate_physical_devices(instance) }.unwrap()[0];

    let priorities = [1.0f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(0)
        .queue_priorities(&priorities);
    let device_info =
        vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));
    let device = unsafe { chain.create_device(physical_device, &device_info, None) }.unwrap();

    Booted {
        instance,
        physical_device,
        device,
    }
}

pub fn buffer_info<'a>(size: u64) -> vk::BufferCreateInfo<'a> {
    vk::BufferCreateInfo::default()
        .size(size)
        .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
}

pub fn create_buffer(chain: &Chain, device: vk::Device, size: u64) -> vk::Buffer {
    unsafe { chain.create_buffer(device, &buffer_info(size), None) }.unwrap()
}

/// A trivially valid SPIR-V header, four words long.
pub const SPIRV_WORDS: [u32; 4] = [0x0723_0203, 0x0001_0000, 0, 0];
