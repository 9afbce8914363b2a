//! Terminal link executing calls on the system Vulkan driver via `ash`.

use ash::prelude::VkResult;
use ash::vk;
use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::error::DriverError;
use crate::surface::{Dispatch, PipelineResult};

struct InstanceFns {
    instance: ash::Instance,
    surface: ash::khr::surface::Instance,
    headless_surface: ash::ext::headless_surface::Instance,
}

struct DeviceFns {
    device: ash::Device,
    swapchain: ash::khr::swapchain::Device,
}

/// Vulkan driver backed by the system loader.
///
/// Keeps the `ash` function tables of every instance and device it created
/// and the owner of every dispatchable child, so entry points taking a
/// physical device, queue or command buffer reach the right table.
pub struct VulkanDriver {
    entry: ash::Entry,

    // ── Function tables ─────────────────────────────────────
    instances: DashMap<vk::Instance, InstanceFns>,
    devices: DashMap<vk::Device, DeviceFns>,

    // ── Owners of dispatchable children ─────────────────────
    physical_device_owner: DashMap<vk::PhysicalDevice, vk::Instance>,
    queue_owner: DashMap<vk::Queue, vk::Device>,
    /// command buffer -> (device, pool)
    command_buffer_owner: DashMap<vk::CommandBuffer, (vk::Device, vk::CommandPool)>,
}

// SAFETY: Vulkan handles are valid across threads with proper external synchronization
unsafe impl Send for VulkanDriver {}
unsafe impl Sync for VulkanDriver {}

impl VulkanDriver {
    /// Load the system Vulkan loader.
    pub fn new() -> Result<Self, DriverError> {
        let entry = unsafe { ash::Entry::load() }?;
        info!("Vulkan entry loaded successfully");
        Ok(Self {
            entry,
            instances: DashMap::new(),
            devices: DashMap::new(),
            physical_device_owner: DashMap::new(),
            queue_owner: DashMap::new(),
            command_buffer_owner: DashMap::new(),
        })
    }

    fn instance(&self, instance: vk::Instance) -> VkResult<Ref<'_, vk::Instance, InstanceFns>> {
        self.instances.get(&instance).ok_or_else(|| {
            error!("unknown instance {:?}", instance);
            vk::Result::ERROR_INITIALIZATION_FAILED
        })
    }

    fn instance_of(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Ref<'_, vk::Instance, InstanceFns>> {
        let owner = self
            .physical_device_owner
            .get(&physical_device)
            .map(|e| *e.value())
            .ok_or_else(|| {
                error!("unknown physical device {:?}", physical_device);
                vk::Result::ERROR_DEVICE_LOST
            })?;
        self.instance(owner)
    }

    fn device(&self, device: vk::Device) -> VkResult<Ref<'_, vk::Device, DeviceFns>> {
        self.devices.get(&device).ok_or_else(|| {
            error!("unknown device {:?}", device);
            vk::Result::ERROR_DEVICE_LOST
        })
    }

    fn device_of_queue(&self, queue: vk::Queue) -> VkResult<Ref<'_, vk::Device, DeviceFns>> {
        let owner = self
            .queue_owner
            .get(&queue)
            .map(|e| *e.value())
            .ok_or_else(|| {
                error!("unknown queue {:?}", queue);
                vk::Result::ERROR_DEVICE_LOST
            })?;
        self.device(owner)
    }

    fn device_of_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> VkResult<Ref<'_, vk::Device, DeviceFns>> {
        let (owner, _) = self
            .command_buffer_owner
            .get(&command_buffer)
            .map(|e| *e.value())
            .ok_or_else(|| {
                error!("unknown command buffer {:?}", command_buffer);
                vk::Result::ERROR_DEVICE_LOST
            })?;
        self.device(owner)
    }
}

macro_rules! device_children {
    ($(($create:ident, $destroy:ident, $info:ident, $handle:ident)),+ $(,)?) => {
        $(
            unsafe fn $create(
                &self,
                device: vk::Device,
                create_info: &vk::$info<'_>,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) -> VkResult<vk::$handle> {
                let fns = self.device(device)?;
                unsafe { fns.device.$create(create_info, allocator) }
            }

            unsafe fn $destroy(
                &self,
                device: vk::Device,
                handle: vk::$handle,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) {
                if let Ok(fns) = self.device(device) {
                    unsafe { fns.device.$destroy(handle, allocator) }
                }
            }
        )+
    };
}

impl Dispatch for VulkanDriver {
    // ── Instance ────────────────────────────────────────────

    unsafe fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Instance> {
        let instance = unsafe { self.entry.create_instance(create_info, allocator) }?;
        let handle = instance.handle();
        let fns = InstanceFns {
            surface: ash::khr::surface::Instance::new(&self.entry, &instance),
            headless_surface: ash::ext::headless_surface::Instance::new(&self.entry, &instance),
            instance,
        };
        self.instances.insert(handle, fns);
        info!("created Vulkan instance: {:?}", handle);
        Ok(handle)
    }

    unsafe fn destroy_instance(
        &self,
        instance: vk::Instance,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let Some((_, fns)) = self.instances.remove(&instance) else {
            warn!("destroy of unknown instance {:?}", instance);
            return;
        };
        self.physical_device_owner.retain(|_, owner| *owner != instance);
        unsafe { fns.instance.destroy_instance(allocator) };
        info!("destroyed Vulkan instance: {:?}", instance);
    }

    unsafe fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        let physical_devices = {
            let fns = self.instance(instance)?;
            unsafe { fns.instance.enumerate_physical_devices() }?
        };
        for &pd in &physical_devices {
            self.physical_device_owner.insert(pd, instance);
        }
        debug!("enumerated {} physical devices", physical_devices.len());
        Ok(physical_devices)
    }

    unsafe fn get_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        match self.instance_of(physical_device) {
            Ok(fns) => unsafe { fns.instance.get_physical_device_properties(physical_device) },
            Err(_) => vk::PhysicalDeviceProperties::default(),
        }
    }

    unsafe fn get_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        match self.instance_of(physical_device) {
            Ok(fns) => unsafe {
                fns.instance
                    .get_physical_device_queue_family_properties(physical_device)
            },
            Err(_) => Vec::new(),
        }
    }

    unsafe fn get_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        match self.instance_of(physical_device) {
            Ok(fns) => unsafe {
                fns.instance
                    .get_physical_device_memory_properties(physical_device)
            },
            Err(_) => vk::PhysicalDeviceMemoryProperties::default(),
        }
    }

    unsafe fn create_headless_surface(
        &self,
        instance: vk::Instance,
        create_info: &vk::HeadlessSurfaceCreateInfoEXT<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SurfaceKHR> {
        let fns = self.instance(instance)?;
        unsafe {
            fns.headless_surface
                .create_headless_surface(create_info, allocator)
        }
    }

    unsafe fn destroy_surface(
        &self,
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        if let Ok(fns) = self.instance(instance) {
            unsafe { fns.surface.destroy_surface(surface, allocator) }
        }
    }

    // ── Device / queue ──────────────────────────────────────

    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Device> {
        let fns = {
            let inst = self.instance_of(physical_device)?;
            let device =
                unsafe { inst.instance.create_device(physical_device, create_info, allocator) }?;
            DeviceFns {
                swapchain: ash::khr::swapchain::Device::new(&inst.instance, &device),
                device,
            }
        };
        let handle = fns.device.handle();
        self.devices.insert(handle, fns);
        info!("created Vulkan device: {:?}", handle);
        Ok(handle)
    }

    unsafe fn destroy_device(
        &self,
        device: vk::Device,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let Some((_, fns)) = self.devices.remove(&device) else {
            warn!("destroy of unknown device {:?}", device);
            return;
        };
        self.queue_owner.retain(|_, owner| *owner != device);
        self.command_buffer_owner
            .retain(|_, (owner, _)| *owner != device);
        unsafe { fns.device.destroy_device(allocator) };
        info!("destroyed Vulkan device: {:?}", device);
    }

    unsafe fn get_device_queue(
        &self,
        device: vk::Device,
        queue_family_index: u32,
        queue_index: u32,
    ) -> vk::Queue {
        let queue = match self.device(device) {
            Ok(fns) => unsafe { fns.device.get_device_queue(queue_family_index, queue_index) },
            Err(_) => return vk::Queue::null(),
        };
        self.queue_owner.insert(queue, device);
        queue
    }

    unsafe fn device_wait_idle(&self, device: vk::Device) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.device_wait_idle() }
    }

    unsafe fn queue_submit(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let fns = self.device_of_queue(queue)?;
        unsafe { fns.device.queue_submit(queue, submits, fence) }
    }

    unsafe fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        let fns = self.device_of_queue(queue)?;
        unsafe { fns.device.queue_wait_idle(queue) }
    }

    // ── Memory ──────────────────────────────────────────────

    unsafe fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DeviceMemory> {
        let fns = self.device(device)?;
        unsafe { fns.device.allocate_memory(allocate_info, allocator) }
    }

    unsafe fn free_memory(
        &self,
        device: vk::Device,
        memory: vk::DeviceMemory,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        if let Ok(fns) = self.device(device) {
            unsafe { fns.device.free_memory(memory, allocator) }
        }
    }

    unsafe fn bind_buffer_memory(
        &self,
        device: vk::Device,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.bind_buffer_memory(buffer, memory, offset) }
    }

    unsafe fn bind_image_memory(
        &self,
        device: vk::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.bind_image_memory(image, memory, offset) }
    }

    unsafe fn get_buffer_memory_requirements(
        &self,
        device: vk::Device,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        match self.device(device) {
            Ok(fns) => unsafe { fns.device.get_buffer_memory_requirements(buffer) },
            Err(_) => vk::MemoryRequirements::default(),
        }
    }

    unsafe fn get_image_memory_requirements(
        &self,
        device: vk::Device,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        match self.device(device) {
            Ok(fns) => unsafe { fns.device.get_image_memory_requirements(image) },
            Err(_) => vk::MemoryRequirements::default(),
        }
    }

    // ── Device children ─────────────────────────────────────

    device_children! {
        (create_buffer, destroy_buffer, BufferCreateInfo, Buffer),
        (create_buffer_view, destroy_buffer_view, BufferViewCreateInfo, BufferView),
        (create_image, destroy_image, ImageCreateInfo, Image),
        (create_image_view, destroy_image_view, ImageViewCreateInfo, ImageView),
        (create_sampler, destroy_sampler, SamplerCreateInfo, Sampler),
        (create_shader_module, destroy_shader_module, ShaderModuleCreateInfo, ShaderModule),
        (create_pipeline_cache, destroy_pipeline_cache, PipelineCacheCreateInfo, PipelineCache),
        (create_pipeline_layout, destroy_pipeline_layout, PipelineLayoutCreateInfo, PipelineLayout),
        (create_descriptor_set_layout, destroy_descriptor_set_layout, DescriptorSetLayoutCreateInfo, DescriptorSetLayout),
        (create_descriptor_pool, destroy_descriptor_pool, DescriptorPoolCreateInfo, DescriptorPool),
        (create_render_pass, destroy_render_pass, RenderPassCreateInfo, RenderPass),
        (create_framebuffer, destroy_framebuffer, FramebufferCreateInfo, Framebuffer),
        (create_fence, destroy_fence, FenceCreateInfo, Fence),
        (create_semaphore, destroy_semaphore, SemaphoreCreateInfo, Semaphore),
        (create_event, destroy_event, EventCreateInfo, Event),
        (create_query_pool, destroy_query_pool, QueryPoolCreateInfo, QueryPool),
    }

    // ── Pipelines ───────────────────────────────────────────

    unsafe fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::GraphicsPipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        let fns = self
            .device(device)
            .map_err(|e| (vec![vk::Pipeline::null(); create_infos.len()], e))?;
        unsafe {
            fns.device
                .create_graphics_pipelines(pipeline_cache, create_infos, allocator)
        }
    }

    unsafe fn create_compute_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::ComputePipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        let fns = self
            .device(device)
            .map_err(|e| (vec![vk::Pipeline::null(); create_infos.len()], e))?;
        unsafe {
            fns.device
                .create_compute_pipelines(pipeline_cache, create_infos, allocator)
        }
    }

    unsafe fn destroy_pipeline(
        &self,
        device: vk::Device,
        pipeline: vk::Pipeline,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        if let Ok(fns) = self.device(device) {
            unsafe { fns.device.destroy_pipeline(pipeline, allocator) }
        }
    }

    // ── Descriptors ─────────────────────────────────────────

    unsafe fn reset_descriptor_pool(
        &self,
        device: vk::Device,
        pool: vk::DescriptorPool,
        flags: vk::DescriptorPoolResetFlags,
    ) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.reset_descriptor_pool(pool, flags) }
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        device: vk::Device,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let fns = self.device(device)?;
        unsafe { fns.device.allocate_descriptor_sets(allocate_info) }
    }

    unsafe fn free_descriptor_sets(
        &self,
        device: vk::Device,
        pool: vk::DescriptorPool,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.free_descriptor_sets(pool, descriptor_sets) }
    }

    unsafe fn update_descriptor_sets(
        &self,
        device: vk::Device,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        if let Ok(fns) = self.device(device) {
            unsafe { fns.device.update_descriptor_sets(writes, copies) }
        }
    }

    // ── Command buffers ─────────────────────────────────────

    unsafe fn create_command_pool(
        &self,
        device: vk::Device,
        create_info: &vk::CommandPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::CommandPool> {
        let fns = self.device(device)?;
        unsafe { fns.device.create_command_pool(create_info, allocator) }
    }

    unsafe fn destroy_command_pool(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.command_buffer_owner
            .retain(|_, (_, owner_pool)| *owner_pool != pool);
        if let Ok(fns) = self.device(device) {
            unsafe { fns.device.destroy_command_pool(pool, allocator) }
        }
    }

    unsafe fn reset_command_pool(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.reset_command_pool(pool, flags) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        device: vk::Device,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let buffers = {
            let fns = self.device(device)?;
            unsafe { fns.device.allocate_command_buffers(allocate_info) }?
        };
        for &cb in &buffers {
            self.command_buffer_owner
                .insert(cb, (device, allocate_info.command_pool));
        }
        Ok(buffers)
    }

    unsafe fn free_command_buffers(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        for cb in command_buffers {
            self.command_buffer_owner.remove(cb);
        }
        if let Ok(fns) = self.device(device) {
            unsafe { fns.device.free_command_buffers(pool, command_buffers) }
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        let fns = self.device_of_command_buffer(command_buffer)?;
        unsafe { fns.device.begin_command_buffer(command_buffer, begin_info) }
    }

    unsafe fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let fns = self.device_of_command_buffer(command_buffer)?;
        unsafe { fns.device.end_command_buffer(command_buffer) }
    }

    // ── Synchronization ─────────────────────────────────────

    unsafe fn wait_for_fences(
        &self,
        device: vk::Device,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.wait_for_fences(fences, wait_all, timeout) }
    }

    unsafe fn reset_fences(&self, device: vk::Device, fences: &[vk::Fence]) -> VkResult<()> {
        let fns = self.device(device)?;
        unsafe { fns.device.reset_fences(fences) }
    }

    // ── Swapchain ───────────────────────────────────────────

    unsafe fn create_swapchain(
        &self,
        device: vk::Device,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SwapchainKHR> {
        let fns = self.device(device)?;
        unsafe { fns.swapchain.create_swapchain(create_info, allocator) }
    }

    unsafe fn destroy_swapchain(
        &self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        if let Ok(fns) = self.device(device) {
            unsafe { fns.swapchain.destroy_swapchain(swapchain, allocator) }
        }
    }

    unsafe fn get_swapchain_images(
        &self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        let fns = self.device(device)?;
        unsafe { fns.swapchain.get_swapchain_images(swapchain) }
    }

    unsafe fn acquire_next_image(
        &self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        let fns = self.device(device)?;
        unsafe {
            fns.swapchain
                .acquire_next_image(swapchain, timeout, semaphore, fence)
        }
    }

    unsafe fn queue_present(
        &self,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let fns = self.device_of_queue(queue)?;
        unsafe { fns.swapchain.queue_present(queue, present_info) }
    }
}
