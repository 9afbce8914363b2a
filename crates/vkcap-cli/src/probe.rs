//! Capture scenario runner.
//!
//! Drives a compute-style object lifetime through a capture session and
//! reports what the handle table saw at each step. After teardown the table
//! must be empty again.

use std::sync::Arc;

use anyhow::Context;
use ash::vk;
use serde::Serialize;
use vkcap_core::config::CaptureConfig;
use vkcap_layer::{count_by_type, CaptureSession, Chain, Dispatch, ObjectRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    details: Vec<String>,
}

impl CheckResult {
    fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn fail(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn skip(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Skip,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn detail(mut self, d: &str) -> Self {
        self.details.push(d.to_string());
        self
    }
}

/// Objects created so far, torn down in reverse order whatever step failed.
#[derive(Default)]
struct Objects {
    instance: Option<vk::Instance>,
    physical_device: Option<vk::PhysicalDevice>,
    device: Option<vk::Device>,
    queue_family: u32,
    buffer: Option<vk::Buffer>,
    memory: Option<vk::DeviceMemory>,
    pool: Option<vk::CommandPool>,
    fence: Option<vk::Fence>,
}

#[derive(Serialize)]
struct Report<'a> {
    checks: &'a [CheckResult],
    live_objects: &'a [ObjectRecord],
}

// ── Main entry point ────────────────────────────────────────────────────────

/// Run the scenario over `driver`. Returns false if any check failed.
pub fn run(driver: Arc<dyn Dispatch>, config: &CaptureConfig, json: bool) -> bool {
    let mut results = Vec::new();

    let session = match CaptureSession::new(config, driver) {
        Ok(session) => {
            results.push(
                CheckResult::pass("Capture session", "Chain built")
                    .detail(&format!("Chain depth: {}", session.chain().depth()))
                    .detail(&format!("Unknown extensions: {:?}", config.unknown_extensions))
                    .detail(&format!("On desync: {:?}", config.on_desync)),
            );
            session
        }
        Err(e) => {
            results.push(CheckResult::fail("Capture session", &e.to_string()));
            output(&results, &[], json);
            return false;
        }
    };

    let chain = session.chain();
    let mut objects = Objects::default();

    let steps: [(&str, fn(&Chain, &mut Objects) -> anyhow::Result<CheckResult>); 4] = [
        ("Instance", check_instance),
        ("Device", check_device),
        ("Buffer", check_buffer),
        ("Command submission", check_submission),
    ];
    let mut failed = false;
    for (name, step) in steps {
        if failed {
            results.push(CheckResult::skip(name, "Skipped after earlier failure"));
            continue;
        }
        match step(chain, &mut objects) {
            Ok(result) => results.push(result),
            Err(e) => {
                results.push(CheckResult::fail(name, &format!("{:#}", e)));
                failed = true;
            }
        }
    }

    let live = session.live_objects();
    results.push(check_live_objects(&live));

    teardown(chain, &objects);
    results.push(check_teardown(&session));

    output(&results, &live, json);
    !results
        .iter()
        .any(|r| matches!(r.status, CheckStatus::Fail))
}

// ── Step 1: Instance ────────────────────────────────────────────────────────

fn check_instance(chain: &Chain, objects: &mut Objects) -> anyhow::Result<CheckResult> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(c"vkcap-probe")
        .api_version(vk::API_VERSION_1_1);
    let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
    let instance =
        unsafe { chain.create_instance(&create_info, None) }.context("vkCreateInstance")?;
    objects.instance = Some(instance);

    let physical_devices = unsafe { chain.enumerate_physical_devices(instance) }
        .context("vkEnumeratePhysicalDevices")?;
    let Some(&physical_device) = physical_devices.first() else {
        anyhow::bail!("no physical devices reported");
    };
    objects.physical_device = Some(physical_device);

    let mut result = CheckResult::pass(
        "Instance",
        &format!("{} physical device(s)", physical_devices.len()),
    );
    for (i, pd) in physical_devices.iter().enumerate() {
        let props = unsafe { chain.get_physical_device_properties(*pd) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        result = result.detail(&format!("GPU {}: {} ({:?})", i, name, props.device_type));
    }
    Ok(result)
}

// ── Step 2: Device ──────────────────────────────────────────────────────────

fn check_device(chain: &Chain, objects: &mut Objects) -> anyhow::Result<CheckResult> {
    let physical_device = objects
        .physical_device
        .context("no physical device selected")?;
    let families = unsafe { chain.get_physical_device_queue_family_properties(physical_device) };
    let family = families
        .iter()
        .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
        .context("no compute queue family")? as u32;
    objects.queue_family = family;

    let priorities = [1.0f32];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(family)
        .queue_priorities(&priorities);
    let create_info =
        vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));
    let device = unsafe { chain.create_device(physical_device, &create_info, None) }
        .context("vkCreateDevice")?;
    objects.device = Some(device);

    let queue = unsafe { chain.get_device_queue(device, family, 0) };
    if queue == vk::Queue::null() {
        anyhow::bail!("vkGetDeviceQueue returned a null queue");
    }
    Ok(CheckResult::pass("Device", &format!("Compute queue family {}", family)))
}

// ── Step 3: Buffer and memory ───────────────────────────────────────────────

fn check_buffer(chain: &Chain, objects: &mut Objects) -> anyhow::Result<CheckResult> {
    let device = objects.device.context("no device")?;
    let physical_device = objects.physical_device.context("no physical device")?;

    let buffer_info = vk::BufferCreateInfo::default()
        .size(64 * 1024)
        .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer =
        unsafe { chain.create_buffer(device, &buffer_info, None) }.context("vkCreateBuffer")?;
    objects.buffer = Some(buffer);

    let requirements = unsafe { chain.get_buffer_memory_requirements(device, buffer) };
    let memory_props = unsafe { chain.get_physical_device_memory_properties(physical_device) };
    let memory_type = (0..memory_props.memory_type_count)
        .find(|i| requirements.memory_type_bits & (1 << i) != 0)
        .context("no memory type fits the buffer")?;

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    let memory =
        unsafe { chain.allocate_memory(device, &alloc_info, None) }.context("vkAllocateMemory")?;
    objects.memory = Some(memory);
    unsafe { chain.bind_buffer_memory(device, buffer, memory, 0) }
        .context("vkBindBufferMemory")?;

    Ok(CheckResult::pass("Buffer", "Buffer bound to device memory")
        .detail(&format!("Size: {} bytes", requirements.size))
        .detail(&format!("Memory type: {}", memory_type)))
}

// ── Step 4: Command submission ──────────────────────────────────────────────

fn check_submission(chain: &Chain, objects: &mut Objects) -> anyhow::Result<CheckResult> {
    let device = objects.device.context("no device")?;

    let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(objects.queue_family);
    let pool = unsafe { chain.create_command_pool(device, &pool_info, None) }
        .context("vkCreateCommandPool")?;
    objects.pool = Some(pool);

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(2);
    let command_buffers = unsafe { chain.allocate_command_buffers(device, &alloc_info) }
        .context("vkAllocateCommandBuffers")?;
    for &cb in &command_buffers {
        unsafe { chain.begin_command_buffer(cb, &vk::CommandBufferBeginInfo::default()) }
            .context("vkBeginCommandBuffer")?;
        unsafe { chain.end_command_buffer(cb) }.context("vkEndCommandBuffer")?;
    }

    let fence = unsafe { chain.create_fence(device, &vk::FenceCreateInfo::default(), None) }
        .context("vkCreateFence")?;
    objects.fence = Some(fence);

    let queue = unsafe { chain.get_device_queue(device, objects.queue_family, 0) };
    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
    unsafe { chain.queue_submit(queue, std::slice::from_ref(&submit), fence) }
        .context("vkQueueSubmit")?;
    unsafe { chain.wait_for_fences(device, &[fence], true, u64::MAX) }
        .context("vkWaitForFences")?;

    Ok(CheckResult::pass(
        "Command submission",
        &format!("{} command buffer(s) submitted", command_buffers.len()),
    ))
}

// ── Step 5: Live objects ────────────────────────────────────────────────────

fn check_live_objects(live: &[ObjectRecord]) -> CheckResult {
    let mut result = CheckResult::pass(
        "Live objects",
        &format!("{} object(s) tracked before teardown", live.len()),
    );
    for (ty, count) in count_by_type(live) {
        result = result.detail(&format!("{}: {}", ty.name(), count));
    }
    result
}

// ── Step 6: Teardown ────────────────────────────────────────────────────────

fn teardown(chain: &Chain, objects: &Objects) {
    unsafe {
        if let Some(device) = objects.device {
            // Best effort: a lost device still gets its children destroyed
            let _ = chain.device_wait_idle(device);
            if let Some(fence) = objects.fence {
                chain.destroy_fence(device, fence, None);
            }
            if let Some(pool) = objects.pool {
                chain.destroy_command_pool(device, pool, None);
            }
            if let Some(buffer) = objects.buffer {
                chain.destroy_buffer(device, buffer, None);
            }
            if let Some(memory) = objects.memory {
                chain.free_memory(device, memory, None);
            }
            chain.destroy_device(device, None);
        }
        if let Some(instance) = objects.instance {
            chain.destroy_instance(instance, None);
        }
    }
}

fn check_teardown(session: &CaptureSession) -> CheckResult {
    let leftover = session.live_objects();
    if leftover.is_empty() {
        return CheckResult::pass("Teardown", "Handle table is empty");
    }
    let mut result = CheckResult::fail(
        "Teardown",
        &format!("{} object(s) still tracked", leftover.len()),
    );
    for record in &leftover {
        result = result.detail(&format!("{}({:#x})", record.handle_type.name(), record.handle));
    }
    result
}

// ── Output ──────────────────────────────────────────────────────────────────

fn output(results: &[CheckResult], live: &[ObjectRecord], json: bool) {
    if json {
        print_results_json(results, live);
    } else {
        print_results_pretty(results);
    }
}

fn print_results_pretty(results: &[CheckResult]) {
    println!();
    println!("vkcap Capture Probe");
    println!("===================");
    println!();

    for result in results {
        let tag = match result.status {
            CheckStatus::Pass => "[PASS]",
            CheckStatus::Fail => "[FAIL]",
            CheckStatus::Skip => "[SKIP]",
        };
        println!("  {} {}: {}", tag, result.name, result.message);
        for detail in &result.details {
            println!("         {}", detail);
        }
    }

    let passed = results
        .iter()
        .filter(|r| matches!(r.status, CheckStatus::Pass))
        .count();
    let failed = results
        .iter()
        .filter(|r| matches!(r.status, CheckStatus::Fail))
        .count();
    println!();
    println!("-------------------");
    println!("  {} passed, {} failed", passed, failed);
    println!();
}

fn print_results_json(results: &[CheckResult], live: &[ObjectRecord]) {
    let report = Report {
        checks: results,
        live_objects: live,
    };
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to serialize report: {}", e),
    }
}
