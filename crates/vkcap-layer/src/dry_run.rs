//! An in-process driver that fabricates handles without touching a GPU.
//!
//! Used for dry validation of a capture configuration and as the terminal
//! driver in tests. Every call is logged; a failure can be queued for any
//! entry point by name with [`DryRunDriver::queue_result`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use ash::prelude::VkResult;
use ash::vk;
use ash::vk::Handle;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::surface::{Dispatch, PipelineResult};

/// First fabricated handle value; keeps handles clear of small integers.
const FIRST_HANDLE: u64 = 0x1000;

pub struct DryRunDriver {
    next_handle: AtomicU64,
    physical_device_count: u32,
    /// Results to return instead of success, per entry point, used once each
    result_queue: Mutex<HashMap<&'static str, VecDeque<vk::Result>>>,
    calls: Mutex<Vec<&'static str>>,
    /// Objects created and not yet destroyed: raw handle -> creating call
    live: DashMap<u64, &'static str>,
    /// Pool -> command buffers or descriptor sets allocated from it
    pool_children: DashMap<u64, Vec<u64>>,
    physical_devices: DashMap<u64, Vec<vk::PhysicalDevice>>,
    queues: DashMap<(u64, u32, u32), vk::Queue>,
    swapchain_image_counts: DashMap<u64, u32>,
    swapchain_images: DashMap<u64, Vec<vk::Image>>,
}

impl DryRunDriver {
    pub fn new() -> Self {
        Self::with_physical_devices(1)
    }

    pub fn with_physical_devices(count: u32) -> Self {
        Self {
            next_handle: AtomicU64::new(FIRST_HANDLE),
            physical_device_count: count,
            result_queue: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            live: DashMap::new(),
            pool_children: DashMap::new(),
            physical_devices: DashMap::new(),
            queues: DashMap::new(),
            swapchain_image_counts: DashMap::new(),
            swapchain_images: DashMap::new(),
        }
    }

    /// Return `result` from the next call to the named entry point. Queued
    /// results are used once each, in order.
    ///
    /// Batch pipeline creation treats a queued error as a partial failure:
    /// every pipeline but the last is created.
    pub fn queue_result(&self, call: &'static str, result: vk::Result) {
        self.result_queue
            .lock()
            .entry(call)
            .or_default()
            .push_back(result);
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    /// Number of created objects the driver has not seen destroyed.
    pub fn live_handles(&self) -> usize {
        self.live.len()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.live.contains_key(&handle.as_raw())
    }

    fn enter(&self, call: &'static str) -> VkResult<()> {
        self.note(call);
        let queued = self
            .result_queue
            .lock()
            .get_mut(call)
            .and_then(|queue| queue.pop_front());
        match queued {
            Some(result) if result != vk::Result::SUCCESS => Err(result),
            _ => Ok(()),
        }
    }

    fn note(&self, call: &'static str) {
        self.calls.lock().push(call);
    }

    fn fabricate<H: Handle + Copy>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn make<H: Handle + Copy>(&self, call: &'static str) -> H {
        let handle: H = self.fabricate();
        self.live.insert(handle.as_raw(), call);
        handle
    }

    fn retire(&self, raw: u64) {
        self.live.remove(&raw);
    }

    fn retire_pool_children(&self, pool: u64) {
        if let Some((_, children)) = self.pool_children.remove(&pool) {
            for child in children {
                self.retire(child);
            }
        }
    }

    fn make_pipelines(&self, call: &'static str, count: usize) -> PipelineResult {
        match self.enter(call) {
            Ok(()) => Ok((0..count).map(|_| self.make(call)).collect()),
            Err(err) => {
                let mut pipelines: Vec<vk::Pipeline> =
                    (0..count.saturating_sub(1)).map(|_| self.make(call)).collect();
                if count > 0 {
                    pipelines.push(vk::Pipeline::null());
                }
                Err((pipelines, err))
            }
        }
    }
}

impl Default for DryRunDriver {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! fake_device_children {
    ($(($create:ident, $destroy:ident, $info:ident, $handle:ident)),+ $(,)?) => {
        $(
            unsafe fn $create(
                &self,
                _device: vk::Device,
                _create_info: &vk::$info<'_>,
                _allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) -> VkResult<vk::$handle> {
                self.enter(stringify!($create))?;
                Ok(self.make(stringify!($create)))
            }

            unsafe fn $destroy(
                &self,
                _device: vk::Device,
                handle: vk::$handle,
                _allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) {
                self.note(stringify!($destroy));
                self.retire(handle.as_raw());
            }
        )+
    };
}

impl Dispatch for DryRunDriver {
    unsafe fn create_instance(
        &self,
        _create_info: &vk::InstanceCreateInfo<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Instance> {
        self.enter("create_instance")?;
        Ok(self.make("create_instance"))
    }

    unsafe fn destroy_instance(
        &self,
        instance: vk::Instance,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_instance");
        self.physical_devices.remove(&instance.as_raw());
        self.retire(instance.as_raw());
    }

    unsafe fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        self.enter("enumerate_physical_devices")?;
        let devices = self
            .physical_devices
            .entry(instance.as_raw())
            .or_insert_with(|| {
                (0..self.physical_device_count)
                    .map(|_| self.fabricate())
                    .collect()
            })
            .clone();
        Ok(devices)
    }

    unsafe fn get_physical_device_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        self.note("get_physical_device_properties");
        vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_3,
            device_type: vk::PhysicalDeviceType::CPU,
            ..Default::default()
        }
    }

    unsafe fn get_physical_device_queue_family_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.note("get_physical_device_queue_family_properties");
        vec![vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS
                | vk::QueueFlags::COMPUTE
                | vk::QueueFlags::TRANSFER,
            queue_count: 4,
            ..Default::default()
        }]
    }

    unsafe fn get_physical_device_memory_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.note("get_physical_device_memory_properties");
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 1,
            memory_heap_count: 1,
            ..Default::default()
        };
        props.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 0,
        };
        props.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        props
    }

    unsafe fn create_headless_surface(
        &self,
        _instance: vk::Instance,
        _create_info: &vk::HeadlessSurfaceCreateInfoEXT<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SurfaceKHR> {
        self.enter("create_headless_surface")?;
        Ok(self.make("create_headless_surface"))
    }

    unsafe fn destroy_surface(
        &self,
        _instance: vk::Instance,
        surface: vk::SurfaceKHR,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_surface");
        self.retire(surface.as_raw());
    }

    unsafe fn create_device(
        &self,
        _physical_device: vk::PhysicalDevice,
        _create_info: &vk::DeviceCreateInfo<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Device> {
        self.enter("create_device")?;
        Ok(self.make("create_device"))
    }

    unsafe fn destroy_device(
        &self,
        device: vk::Device,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_device");
        self.queues.retain(|(owner, _, _), _| *owner != device.as_raw());
        self.retire(device.as_raw());
    }

    unsafe fn get_device_queue(
        &self,
        device: vk::Device,
        queue_family_index: u32,
        queue_index: u32,
    ) -> vk::Queue {
        self.note("get_device_queue");
        *self
            .queues
            .entry((device.as_raw(), queue_family_index, queue_index))
            .or_insert_with(|| self.fabricate())
    }

    unsafe fn device_wait_idle(&self, _device: vk::Device) -> VkResult<()> {
        self.enter("device_wait_idle")
    }

    unsafe fn queue_submit(
        &self,
        _queue: vk::Queue,
        _submits: &[vk::SubmitInfo<'_>],
        _fence: vk::Fence,
    ) -> VkResult<()> {
        self.enter("queue_submit")
    }

    unsafe fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.enter("queue_wait_idle")
    }

    unsafe fn allocate_memory(
        &self,
        _device: vk::Device,
        _allocate_info: &vk::MemoryAllocateInfo<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DeviceMemory> {
        self.enter("allocate_memory")?;
        Ok(self.make("allocate_memory"))
    }

    unsafe fn free_memory(
        &self,
        _device: vk::Device,
        memory: vk::DeviceMemory,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("free_memory");
        self.retire(memory.as_raw());
    }

    unsafe fn bind_buffer_memory(
        &self,
        _device: vk::Device,
        _buffer: vk::Buffer,
        _memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.enter("bind_buffer_memory")
    }

    unsafe fn bind_image_memory(
        &self,
        _device: vk::Device,
        _image: vk::Image,
        _memory: vk::DeviceMemory,
        _offset: vk::DeviceSize,
    ) -> VkResult<()> {
        self.enter("bind_image_memory")
    }

    unsafe fn get_buffer_memory_requirements(
        &self,
        _device: vk::Device,
        _buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        self.note("get_buffer_memory_requirements");
        vk::MemoryRequirements {
            size: 256,
            alignment: 256,
            memory_type_bits: 1,
        }
    }

    unsafe fn get_image_memory_requirements(
        &self,
        _device: vk::Device,
        _image: vk::Image,
    ) -> vk::MemoryRequirements {
        self.note("get_image_memory_requirements");
        vk::MemoryRequirements {
            size: 4096,
            alignment: 4096,
            memory_type_bits: 1,
        }
    }

    fake_device_children! {
        (create_buffer, destroy_buffer, BufferCreateInfo, Buffer),
        (create_buffer_view, destroy_buffer_view, BufferViewCreateInfo, BufferView),
        (create_image, destroy_image, ImageCreateInfo, Image),
        (create_image_view, destroy_image_view, ImageViewCreateInfo, ImageView),
        (create_sampler, destroy_sampler, SamplerCreateInfo, Sampler),
        (create_shader_module, destroy_shader_module, ShaderModuleCreateInfo, ShaderModule),
        (create_pipeline_cache, destroy_pipeline_cache, PipelineCacheCreateInfo, PipelineCache),
        (create_pipeline_layout, destroy_pipeline_layout, PipelineLayoutCreateInfo, PipelineLayout),
        (create_descriptor_set_layout, destroy_descriptor_set_layout, DescriptorSetLayoutCreateInfo, DescriptorSetLayout),
        (create_render_pass, destroy_render_pass, RenderPassCreateInfo, RenderPass),
        (create_framebuffer, destroy_framebuffer, FramebufferCreateInfo, Framebuffer),
        (create_fence, destroy_fence, FenceCreateInfo, Fence),
        (create_semaphore, destroy_semaphore, SemaphoreCreateInfo, Semaphore),
        (create_event, destroy_event, EventCreateInfo, Event),
        (create_query_pool, destroy_query_pool, QueryPoolCreateInfo, QueryPool),
    }

    unsafe fn create_graphics_pipelines(
        &self,
        _device: vk::Device,
        _pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::GraphicsPipelineCreateInfo<'_>],
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        self.make_pipelines("create_graphics_pipelines", create_infos.len())
    }

    unsafe fn create_compute_pipelines(
        &self,
        _device: vk::Device,
        _pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::ComputePipelineCreateInfo<'_>],
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        self.make_pipelines("create_compute_pipelines", create_infos.len())
    }

    unsafe fn destroy_pipeline(
        &self,
        _device: vk::Device,
        pipeline: vk::Pipeline,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_pipeline");
        self.retire(pipeline.as_raw());
    }

    unsafe fn create_descriptor_pool(
        &self,
        _device: vk::Device,
        _create_info: &vk::DescriptorPoolCreateInfo<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DescriptorPool> {
        self.enter("create_descriptor_pool")?;
        Ok(self.make("create_descriptor_pool"))
    }

    unsafe fn destroy_descriptor_pool(
        &self,
        _device: vk::Device,
        pool: vk::DescriptorPool,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_descriptor_pool");
        self.retire_pool_children(pool.as_raw());
        self.retire(pool.as_raw());
    }

    unsafe fn reset_descriptor_pool(
        &self,
        _device: vk::Device,
        pool: vk::DescriptorPool,
        _flags: vk::DescriptorPoolResetFlags,
    ) -> VkResult<()> {
        self.enter("reset_descriptor_pool")?;
        self.retire_pool_children(pool.as_raw());
        Ok(())
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        _device: vk::Device,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        self.enter("allocate_descriptor_sets")?;
        let sets: Vec<vk::DescriptorSet> = (0..allocate_info.descriptor_set_count)
            .map(|_| self.make("allocate_descriptor_sets"))
            .collect();
        self.pool_children
            .entry(allocate_info.descriptor_pool.as_raw())
            .or_default()
            .extend(sets.iter().map(|s| s.as_raw()));
        Ok(sets)
    }

    unsafe fn free_descriptor_sets(
        &self,
        _device: vk::Device,
        _pool: vk::DescriptorPool,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> VkResult<()> {
        self.enter("free_descriptor_sets")?;
        for set in descriptor_sets {
            self.retire(set.as_raw());
        }
        Ok(())
    }

    unsafe fn update_descriptor_sets(
        &self,
        _device: vk::Device,
        _writes: &[vk::WriteDescriptorSet<'_>],
        _copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        self.note("update_descriptor_sets");
    }

    unsafe fn create_command_pool(
        &self,
        _device: vk::Device,
        _create_info: &vk::CommandPoolCreateInfo<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::CommandPool> {
        self.enter("create_command_pool")?;
        Ok(self.make("create_command_pool"))
    }

    unsafe fn destroy_command_pool(
        &self,
        _device: vk::Device,
        pool: vk::CommandPool,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_command_pool");
        self.retire_pool_children(pool.as_raw());
        self.retire(pool.as_raw());
    }

    unsafe fn reset_command_pool(
        &self,
        _device: vk::Device,
        _pool: vk::CommandPool,
        _flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        self.enter("reset_command_pool")
    }

    unsafe fn allocate_command_buffers(
        &self,
        _device: vk::Device,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        self.enter("allocate_command_buffers")?;
        let buffers: Vec<vk::CommandBuffer> = (0..allocate_info.command_buffer_count)
            .map(|_| self.make("allocate_command_buffers"))
            .collect();
        self.pool_children
            .entry(allocate_info.command_pool.as_raw())
            .or_default()
            .extend(buffers.iter().map(|b| b.as_raw()));
        Ok(buffers)
    }

    unsafe fn free_command_buffers(
        &self,
        _device: vk::Device,
        _pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        self.note("free_command_buffers");
        for buffer in command_buffers {
            self.retire(buffer.as_raw());
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        _command_buffer: vk::CommandBuffer,
        _begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        self.enter("begin_command_buffer")
    }

    unsafe fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.enter("end_command_buffer")
    }

    unsafe fn wait_for_fences(
        &self,
        _device: vk::Device,
        _fences: &[vk::Fence],
        _wait_all: bool,
        _timeout: u64,
    ) -> VkResult<()> {
        self.enter("wait_for_fences")
    }

    unsafe fn reset_fences(&self, _device: vk::Device, _fences: &[vk::Fence]) -> VkResult<()> {
        self.enter("reset_fences")
    }

    unsafe fn create_swapchain(
        &self,
        _device: vk::Device,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SwapchainKHR> {
        self.enter("create_swapchain")?;
        let swapchain: vk::SwapchainKHR = self.make("create_swapchain");
        self.swapchain_image_counts
            .insert(swapchain.as_raw(), create_info.min_image_count.max(1));
        Ok(swapchain)
    }

    unsafe fn destroy_swapchain(
        &self,
        _device: vk::Device,
        swapchain: vk::SwapchainKHR,
        _allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.note("destroy_swapchain");
        self.swapchain_image_counts.remove(&swapchain.as_raw());
        self.swapchain_images.remove(&swapchain.as_raw());
        self.retire(swapchain.as_raw());
    }

    unsafe fn get_swapchain_images(
        &self,
        _device: vk::Device,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        self.enter("get_swapchain_images")?;
        let count = self
            .swapchain_image_counts
            .get(&swapchain.as_raw())
            .map(|c| *c)
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let images = self
            .swapchain_images
            .entry(swapchain.as_raw())
            .or_insert_with(|| (0..count).map(|_| self.fabricate()).collect())
            .clone();
        Ok(images)
    }

    unsafe fn acquire_next_image(
        &self,
        _device: vk::Device,
        _swapchain: vk::SwapchainKHR,
        _timeout: u64,
        _semaphore: vk::Semaphore,
        _fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        self.enter("acquire_next_image")?;
        Ok((0, false))
    }

    unsafe fn queue_present(
        &self,
        _queue: vk::Queue,
        _present_info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        self.enter("queue_present")?;
        Ok(false)
    }
}
