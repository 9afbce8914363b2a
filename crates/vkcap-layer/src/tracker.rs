//! Creation/destruction tracking transform.
//!
//! Keeps the [`HandleTable`] in step with the driver: every handle of a
//! tracked type the driver produces gets a shadow, every destroy or free
//! removes one. Driver failures are returned untouched and leave the table
//! as it was.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use tracing::{debug, error, warn};
use vkcap_core::{DesyncPolicy, HandleKey, HandleType, TrackedTypes, UnknownExtensionPolicy};

use crate::error::TrackingError;
use crate::handle_table::HandleTable;
use crate::keys::{key_of, TrackedHandle};
use crate::shadow::{CreateInfo, ObjectState, Recordable};
use crate::surface::{Dispatch, PipelineResult, Transform};

/// How the tracker reacts to inputs it cannot handle cleanly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerPolicy {
    pub unknown_extensions: UnknownExtensionPolicy,
    pub on_desync: DesyncPolicy,
}

pub struct Tracker {
    table: Arc<HandleTable>,
    tracked: TrackedTypes,
    policy: TrackerPolicy,
}

impl Tracker {
    pub fn new(table: Arc<HandleTable>, tracked: TrackedTypes, policy: TrackerPolicy) -> Self {
        Self {
            table,
            tracked,
            policy,
        }
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }

    pub fn tracked(&self) -> TrackedTypes {
        self.tracked
    }

    pub fn tracks(&self, ty: HandleType) -> bool {
        self.tracked.tracks(ty)
    }

    /// The table and the call stream disagree.
    fn fault(&self, err: TrackingError) {
        error!("handle tracking desync: {}", err);
        if self.policy.on_desync == DesyncPolicy::Abort {
            panic!("handle tracking desync: {err}");
        }
    }

    /// Clone `count` copies of a create info before the driver sees the call,
    /// so a rejected extension chain fails the call without side effects.
    unsafe fn prepare<S: Recordable>(
        &self,
        ty: HandleType,
        call: &'static str,
        info: &S,
        count: usize,
    ) -> VkResult<Vec<CreateInfo>> {
        if !self.tracks(ty) {
            return Ok(Vec::new());
        }
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            match unsafe { CreateInfo::record(info, self.policy.unknown_extensions) } {
                Ok(record) => records.push(record),
                Err(e) => {
                    error!("{}: cannot record create info: {}", call, e);
                    return Err(e.into());
                }
            }
        }
        Ok(records)
    }

    /// Like [`Tracker::prepare`] for a single object.
    unsafe fn prepare_one<S: Recordable>(
        &self,
        ty: HandleType,
        call: &'static str,
        info: &S,
    ) -> VkResult<Option<CreateInfo>> {
        Ok(unsafe { self.prepare(ty, call, info, 1) }?.pop())
    }

    /// Track a handle the driver just produced.
    fn register<H: TrackedHandle>(
        &self,
        call: &'static str,
        handle: H,
        parent: Option<HandleKey>,
        info: Option<CreateInfo>,
        state: ObjectState,
    ) {
        let key = key_of(handle);
        if key.is_null() || !self.tracks(key.ty) {
            return;
        }
        match self.table.create(key, parent) {
            Ok(mut shadow) => {
                if let Some(info) = info {
                    shadow.attach_create_info(info);
                }
                shadow.set_state(state);
            }
            Err(e) => self.fault(e.with_op(call)),
        }
    }

    /// Track a handle returned by a query; repeated queries hit the same entry.
    fn observe<H: TrackedHandle>(&self, handle: H, parent: Option<HandleKey>, state: ObjectState) {
        let key = key_of(handle);
        if key.is_null() || !self.tracks(key.ty) {
            return;
        }
        self.table.get_or_create(key, parent).set_state(state);
    }

    /// Stop tracking a handle the application is destroying.
    fn forget<H: TrackedHandle>(&self, call: &'static str, handle: H) {
        let key = key_of(handle);
        if key.is_null() || !self.tracks(key.ty) {
            return;
        }
        if let Err(e) = self.table.erase(key) {
            self.fault(e.with_op(call));
        }
    }

    /// Erase the objects of type `ty` freed along with `parent`.
    fn forget_children(&self, call: &'static str, parent: HandleKey, ty: HandleType) {
        if !self.tracks(ty) {
            return;
        }
        let children = self.table.children_of(parent, ty);
        if !children.is_empty() {
            debug!("{}: {} {} freed with {}", call, children.len(), ty, parent);
        }
        for key in children {
            // Listed a moment ago; a concurrent erase of the same child is not a desync.
            let _ = self.table.erase(key);
        }
    }

    /// Register the non-null handles of a pipeline batch, whatever the outcome.
    fn register_pipelines(
        &self,
        call: &'static str,
        device: vk::Device,
        bind_point: vk::PipelineBindPoint,
        cache: vk::PipelineCache,
        result: &PipelineResult,
        infos: Vec<CreateInfo>,
    ) {
        let pipelines = match result {
            Ok(pipelines) => pipelines,
            Err((pipelines, err)) => {
                debug!("{}: partial failure {:?}", call, err);
                pipelines
            }
        };
        let mut infos = infos.into_iter();
        for &pipeline in pipelines {
            let info = infos.next();
            self.register(
                call,
                pipeline,
                Some(key_of(device)),
                info,
                ObjectState::Pipeline { bind_point, cache },
            );
        }
    }
}

/// Create/destroy pairs of device children with no derived state.
macro_rules! device_children {
    ($(($create:ident, $destroy:ident, $info:ident, $handle:ident)),+ $(,)?) => {
        $(
            unsafe fn $create(
                &self,
                next: &dyn Dispatch,
                device: vk::Device,
                create_info: &vk::$info<'_>,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) -> VkResult<vk::$handle> {
                let call = stringify!($create);
                let info = unsafe {
                    self.prepare_one(<vk::$handle as TrackedHandle>::HANDLE_TYPE, call, create_info)
                }?;
                let handle = unsafe { next.$create(device, create_info, allocator) }?;
                self.register(call, handle, Some(key_of(device)), info, ObjectState::None);
                Ok(handle)
            }

            unsafe fn $destroy(
                &self,
                next: &dyn Dispatch,
                device: vk::Device,
                handle: vk::$handle,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) {
                self.forget(stringify!($destroy), handle);
                unsafe { next.$destroy(device, handle, allocator) }
            }
        )+
    };
}

impl Transform for Tracker {
    // ── Instance ────────────────────────────────────────────

    unsafe fn create_instance(
        &self,
        next: &dyn Dispatch,
        create_info: &vk::InstanceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Instance> {
        let call = "create_instance";
        let info = unsafe { self.prepare_one(HandleType::Instance, call, create_info) }?;
        let instance = unsafe { next.create_instance(create_info, allocator) }?;
        self.register(call, instance, None, info, ObjectState::None);
        Ok(instance)
    }

    unsafe fn destroy_instance(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let call = "destroy_instance";
        self.forget_children(call, key_of(instance), HandleType::PhysicalDevice);
        self.forget(call, instance);
        unsafe { next.destroy_instance(instance, allocator) }
    }

    unsafe fn enumerate_physical_devices(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        let physical_devices = unsafe { next.enumerate_physical_devices(instance) }?;
        for (index, &pd) in physical_devices.iter().enumerate() {
            self.observe(
                pd,
                Some(key_of(instance)),
                ObjectState::PhysicalDevice {
                    index: index as u32,
                },
            );
        }
        Ok(physical_devices)
    }

    unsafe fn create_headless_surface(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
        create_info: &vk::HeadlessSurfaceCreateInfoEXT<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SurfaceKHR> {
        let call = "create_headless_surface";
        let info = unsafe { self.prepare_one(HandleType::Surface, call, create_info) }?;
        let surface = unsafe { next.create_headless_surface(instance, create_info, allocator) }?;
        self.register(call, surface, Some(key_of(instance)), info, ObjectState::None);
        Ok(surface)
    }

    unsafe fn destroy_surface(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.forget("destroy_surface", surface);
        unsafe { next.destroy_surface(instance, surface, allocator) }
    }

    // ── Device / queue ──────────────────────────────────────

    unsafe fn create_device(
        &self,
        next: &dyn Dispatch,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Device> {
        let call = "create_device";
        let info = unsafe { self.prepare_one(HandleType::Device, call, create_info) }?;
        let device = unsafe { next.create_device(physical_device, create_info, allocator) }?;
        self.register(
            call,
            device,
            Some(key_of(physical_device)),
            info,
            ObjectState::None,
        );
        Ok(device)
    }

    unsafe fn destroy_device(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let call = "destroy_device";
        let parent = key_of(device);
        self.forget_children(call, parent, HandleType::Queue);
        let leaked = self.table.dependents_of(parent);
        if !leaked.is_empty() {
            warn!(
                "{}: {} still has {} live children (first: {})",
                call,
                parent,
                leaked.len(),
                leaked[0]
            );
        }
        self.forget(call, device);
        unsafe { next.destroy_device(device, allocator) }
    }

    unsafe fn get_device_queue(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        queue_family_index: u32,
        queue_index: u32,
    ) -> vk::Queue {
        let queue = unsafe { next.get_device_queue(device, queue_family_index, queue_index) };
        self.observe(
            queue,
            Some(key_of(device)),
            ObjectState::Queue {
                family_index: queue_family_index,
                queue_index,
            },
        );
        queue
    }

    // ── Memory ──────────────────────────────────────────────

    unsafe fn allocate_memory(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DeviceMemory> {
        let call = "allocate_memory";
        let info = unsafe { self.prepare_one(HandleType::DeviceMemory, call, allocate_info) }?;
        let memory = unsafe { next.allocate_memory(device, allocate_info, allocator) }?;
        self.register(
            call,
            memory,
            Some(key_of(device)),
            info,
            ObjectState::DeviceMemory {
                allocation_size: allocate_info.allocation_size,
                memory_type_index: allocate_info.memory_type_index,
            },
        );
        Ok(memory)
    }

    unsafe fn free_memory(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        memory: vk::DeviceMemory,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.forget("free_memory", memory);
        unsafe { next.free_memory(device, memory, allocator) }
    }

    // ── Simple device children ──────────────────────────────

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
        next: &dyn Dispatch,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::GraphicsPipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        let call = "create_graphics_pipelines";
        let mut infos = Vec::with_capacity(create_infos.len());
        for create_info in create_infos {
            match unsafe { self.prepare_one(HandleType::Pipeline, call, create_info) } {
                Ok(info) => infos.extend(info),
                Err(e) => return Err((vec![vk::Pipeline::null(); create_infos.len()], e)),
            }
        }
        let result = unsafe {
            next.create_graphics_pipelines(device, pipeline_cache, create_infos, allocator)
        };
        self.register_pipelines(
            call,
            device,
            vk::PipelineBindPoint::GRAPHICS,
            pipeline_cache,
            &result,
            infos,
        );
        result
    }

    unsafe fn create_compute_pipelines(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::ComputePipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        let call = "create_compute_pipelines";
        let mut infos = Vec::with_capacity(create_infos.len());
        for create_info in create_infos {
            match unsafe { self.prepare_one(HandleType::Pipeline, call, create_info) } {
                Ok(info) => infos.extend(info),
                Err(e) => return Err((vec![vk::Pipeline::null(); create_infos.len()], e)),
            }
        }
        let result = unsafe {
            next.create_compute_pipelines(device, pipeline_cache, create_infos, allocator)
        };
        self.register_pipelines(
            call,
            device,
            vk::PipelineBindPoint::COMPUTE,
            pipeline_cache,
            &result,
            infos,
        );
        result
    }

    unsafe fn destroy_pipeline(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pipeline: vk::Pipeline,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        self.forget("destroy_pipeline", pipeline);
        unsafe { next.destroy_pipeline(device, pipeline, allocator) }
    }

    // ── Descriptors ─────────────────────────────────────────

    unsafe fn create_descriptor_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DescriptorPool> {
        let call = "create_descriptor_pool";
        let info = unsafe { self.prepare_one(HandleType::DescriptorPool, call, create_info) }?;
        let pool = unsafe { next.create_descriptor_pool(device, create_info, allocator) }?;
        self.register(call, pool, Some(key_of(device)), info, ObjectState::None);
        Ok(pool)
    }

    unsafe fn destroy_descriptor_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::DescriptorPool,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let call = "destroy_descriptor_pool";
        if pool != vk::DescriptorPool::null() {
            self.forget_children(call, key_of(pool), HandleType::DescriptorSet);
        }
        self.forget(call, pool);
        unsafe { next.destroy_descriptor_pool(device, pool, allocator) }
    }

    unsafe fn reset_descriptor_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::DescriptorPool,
        flags: vk::DescriptorPoolResetFlags,
    ) -> VkResult<()> {
        unsafe { next.reset_descriptor_pool(device, pool, flags) }?;
        self.forget_children("reset_descriptor_pool", key_of(pool), HandleType::DescriptorSet);
        Ok(())
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let call = "allocate_descriptor_sets";
        let count = allocate_info.descriptor_set_count as usize;
        let infos = unsafe { self.prepare(HandleType::DescriptorSet, call, allocate_info, count) }?;
        let sets = unsafe { next.allocate_descriptor_sets(device, allocate_info) }?;
        let layouts = unsafe { raw_slice(allocate_info.p_set_layouts, count) };
        let pool = allocate_info.descriptor_pool;
        let mut infos = infos.into_iter();
        for (i, &set) in sets.iter().enumerate() {
            let layout = layouts.get(i).copied().unwrap_or_default();
            self.register(
                call,
                set,
                Some(key_of(pool)),
                infos.next(),
                ObjectState::DescriptorSet { pool, layout },
            );
        }
        Ok(sets)
    }

    unsafe fn free_descriptor_sets(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::DescriptorPool,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> VkResult<()> {
        for &set in descriptor_sets {
            self.forget("free_descriptor_sets", set);
        }
        unsafe { next.free_descriptor_sets(device, pool, descriptor_sets) }
    }

    // ── Command buffers ─────────────────────────────────────

    unsafe fn create_command_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::CommandPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::CommandPool> {
        let call = "create_command_pool";
        let info = unsafe { self.prepare_one(HandleType::CommandPool, call, create_info) }?;
        let pool = unsafe { next.create_command_pool(device, create_info, allocator) }?;
        self.register(call, pool, Some(key_of(device)), info, ObjectState::None);
        Ok(pool)
    }

    unsafe fn destroy_command_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::CommandPool,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let call = "destroy_command_pool";
        if pool != vk::CommandPool::null() {
            self.forget_children(call, key_of(pool), HandleType::CommandBuffer);
        }
        self.forget(call, pool);
        unsafe { next.destroy_command_pool(device, pool, allocator) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let call = "allocate_command_buffers";
        let count = allocate_info.command_buffer_count as usize;
        let infos = unsafe { self.prepare(HandleType::CommandBuffer, call, allocate_info, count) }?;
        let buffers = unsafe { next.allocate_command_buffers(device, allocate_info) }?;
        let mut infos = infos.into_iter();
        for &buffer in &buffers {
            self.register(
                call,
                buffer,
                Some(key_of(allocate_info.command_pool)),
                infos.next(),
                ObjectState::CommandBuffer {
                    pool: allocate_info.command_pool,
                    level: allocate_info.level,
                },
            );
        }
        Ok(buffers)
    }

    unsafe fn free_command_buffers(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        for &buffer in command_buffers {
            self.forget("free_command_buffers", buffer);
        }
        unsafe { next.free_command_buffers(device, pool, command_buffers) }
    }

    // ── Swapchain ───────────────────────────────────────────

    unsafe fn create_swapchain(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SwapchainKHR> {
        let call = "create_swapchain";
        let info = unsafe { self.prepare_one(HandleType::Swapchain, call, create_info) }?;
        let swapchain = unsafe { next.create_swapchain(device, create_info, allocator) }?;
        self.register(
            call,
            swapchain,
            Some(key_of(device)),
            info,
            ObjectState::Swapchain { images: Vec::new() },
        );
        Ok(swapchain)
    }

    unsafe fn destroy_swapchain(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        let call = "destroy_swapchain";
        if swapchain != vk::SwapchainKHR::null() {
            self.forget_children(call, key_of(swapchain), HandleType::Image);
        }
        self.forget(call, swapchain);
        unsafe { next.destroy_swapchain(device, swapchain, allocator) }
    }

    unsafe fn get_swapchain_images(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        let images = unsafe { next.get_swapchain_images(device, swapchain) }?;
        let parent = key_of(swapchain);
        for &image in &images {
            self.observe(image, Some(parent), ObjectState::None);
        }
        if let Some(mut shadow) = self.table.lookup_mut(parent) {
            shadow.set_state(ObjectState::Swapchain {
                images: images.clone(),
            });
        }
        Ok(images)
    }
}

/// View a counted array from a Vulkan struct.
///
/// # Safety
/// `ptr` must be null or valid for `len` reads for the returned lifetime.
pub(crate) unsafe fn raw_slice<'a, T>(ptr: *const T, len: usize) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(ptr, len) }
    }
}
