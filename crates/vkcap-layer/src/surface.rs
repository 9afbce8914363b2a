//! The intercepted Vulkan entry points.
//!
//! The surface is declared once below. From that list the macro generates
//! the [`Dispatch`] trait a driver implements, the [`Transform`] trait an
//! interceptor implements (every entry point defaults to forwarding to
//! `next` unchanged), and the forwarding impls that compose them.
//!
//! All entry points are `unsafe`: callers vouch for the validity of every
//! pointer inside the Vulkan structs they pass, as with `ash`.

use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;

use crate::call_trace::{CallOutcome, CallTrace, CALL_TARGET};
use crate::chain::{Chain, Link};

/// Result of a batch pipeline creation: on failure, the handles that were
/// produced (null where creation failed) together with the error.
pub type PipelineResult = Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>;

macro_rules! api_surface {
    ($(
        $(#[$meta:meta])*
        fn $name:ident(&self $(, $arg:ident : $ty:ty)*) $(-> $ret:ty)?;
    )+) => {
        /// A driver, or a composed chain link in front of one.
        pub trait Dispatch: Send + Sync {
            $(
                $(#[$meta])*
                unsafe fn $name(&self $(, $arg: $ty)*) $(-> $ret)?;
            )+
        }

        /// An interceptor. Every entry point forwards to `next` unless overridden.
        pub trait Transform: Send + Sync {
            $(
                $(#[$meta])*
                unsafe fn $name(&self, next: &dyn Dispatch $(, $arg: $ty)*) $(-> $ret)? {
                    unsafe { next.$name($($arg),*) }
                }
            )+
        }

        impl Dispatch for Link {
            $(
                unsafe fn $name(&self $(, $arg: $ty)*) $(-> $ret)? {
                    unsafe { self.transform.$name(&*self.next $(, $arg)*) }
                }
            )+
        }

        impl Dispatch for Chain {
            $(
                unsafe fn $name(&self $(, $arg: $ty)*) $(-> $ret)? {
                    unsafe { self.head.$name($($arg),*) }
                }
            )+
        }

        impl<T: Transform + ?Sized> Transform for Arc<T> {
            $(
                unsafe fn $name(&self, next: &dyn Dispatch $(, $arg: $ty)*) $(-> $ret)? {
                    unsafe { (**self).$name(next $(, $arg)*) }
                }
            )+
        }

        impl Transform for CallTrace {
            $(
                unsafe fn $name(&self, next: &dyn Dispatch $(, $arg: $ty)*) $(-> $ret)? {
                    self.count();
                    let result = unsafe { next.$name($($arg),*) };
                    match CallOutcome::failure(&result) {
                        Some(err) => {
                            tracing::trace!(target: CALL_TARGET, "{} -> {:?}", stringify!($name), err)
                        }
                        None => tracing::trace!(target: CALL_TARGET, "{}", stringify!($name)),
                    }
                    result
                }
            )+
        }

        /// Names of every intercepted entry point, in declaration order.
        pub const ENTRY_POINTS: &[&str] = &[$(stringify!($name)),+];
    };
}

api_surface! {
    // ── Instance ────────────────────────────────────────────
    fn create_instance(
        &self,
        create_info: &vk::InstanceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Instance>;
    fn destroy_instance(&self, instance: vk::Instance, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn enumerate_physical_devices(&self, instance: vk::Instance) -> VkResult<Vec<vk::PhysicalDevice>>;
    fn get_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice
    ) -> vk::PhysicalDeviceProperties;
    fn get_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice
    ) -> Vec<vk::QueueFamilyProperties>;
    fn get_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice
    ) -> vk::PhysicalDeviceMemoryProperties;
    /// `VK_EXT_headless_surface`: a presentable surface without a window system.
    fn create_headless_surface(
        &self,
        instance: vk::Instance,
        create_info: &vk::HeadlessSurfaceCreateInfoEXT<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::SurfaceKHR>;
    fn destroy_surface(&self, instance: vk::Instance, surface: vk::SurfaceKHR, allocator: Option<&vk::AllocationCallbacks<'_>>);

    // ── Device / queue ──────────────────────────────────────
    fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Device>;
    fn destroy_device(&self, device: vk::Device, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn get_device_queue(&self, device: vk::Device, queue_family_index: u32, queue_index: u32) -> vk::Queue;
    fn device_wait_idle(&self, device: vk::Device) -> VkResult<()>;
    fn queue_submit(&self, queue: vk::Queue, submits: &[vk::SubmitInfo<'_>], fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;

    // ── Memory ──────────────────────────────────────────────
    fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn bind_buffer_memory(
        &self,
        device: vk::Device,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize
    ) -> VkResult<()>;
    fn bind_image_memory(
        &self,
        device: vk::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize
    ) -> VkResult<()>;
    fn get_buffer_memory_requirements(&self, device: vk::Device, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn get_image_memory_requirements(&self, device: vk::Device, image: vk::Image) -> vk::MemoryRequirements;

    // ── Resources ───────────────────────────────────────────
    fn create_buffer(
        &self,
        device: vk::Device,
        create_info: &vk::BufferCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Buffer>;
    fn destroy_buffer(&self, device: vk::Device, buffer: vk::Buffer, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_buffer_view(
        &self,
        device: vk::Device,
        create_info: &vk::BufferViewCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::BufferView>;
    fn destroy_buffer_view(&self, device: vk::Device, buffer_view: vk::BufferView, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_image(
        &self,
        device: vk::Device,
        create_info: &vk::ImageCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Image>;
    fn destroy_image(&self, device: vk::Device, image: vk::Image, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_image_view(
        &self,
        device: vk::Device,
        create_info: &vk::ImageViewCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, device: vk::Device, image_view: vk::ImageView, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_sampler(
        &self,
        device: vk::Device,
        create_info: &vk::SamplerCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&self, device: vk::Device, sampler: vk::Sampler, allocator: Option<&vk::AllocationCallbacks<'_>>);

    // ── Shaders / pipelines ─────────────────────────────────
    fn create_shader_module(
        &self,
        device: vk::Device,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, device: vk::Device, shader_module: vk::ShaderModule, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_pipeline_cache(
        &self,
        device: vk::Device,
        create_info: &vk::PipelineCacheCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::PipelineCache>;
    fn destroy_pipeline_cache(&self, device: vk::Device, pipeline_cache: vk::PipelineCache, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_pipeline_layout(
        &self,
        device: vk::Device,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, device: vk::Device, pipeline_layout: vk::PipelineLayout, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_graphics_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::GraphicsPipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> PipelineResult;
    fn create_compute_pipelines(
        &self,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::ComputePipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> PipelineResult;
    fn destroy_pipeline(&self, device: vk::Device, pipeline: vk::Pipeline, allocator: Option<&vk::AllocationCallbacks<'_>>);

    // ── Descriptors ─────────────────────────────────────────
    fn create_descriptor_set_layout(
        &self,
        device: vk::Device,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(
        &self,
        device: vk::Device,
        layout: vk::DescriptorSetLayout,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    );
    fn create_descriptor_pool(
        &self,
        device: vk::Device,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, device: vk::Device, pool: vk::DescriptorPool, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn reset_descriptor_pool(
        &self,
        device: vk::Device,
        pool: vk::DescriptorPool,
        flags: vk::DescriptorPoolResetFlags
    ) -> VkResult<()>;
    fn allocate_descriptor_sets(
        &self,
        device: vk::Device,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>
    ) -> VkResult<Vec<vk::DescriptorSet>>;
    fn free_descriptor_sets(
        &self,
        device: vk::Device,
        pool: vk::DescriptorPool,
        descriptor_sets: &[vk::DescriptorSet]
    ) -> VkResult<()>;
    fn update_descriptor_sets(
        &self,
        device: vk::Device,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>]
    );

    // ── Render passes ───────────────────────────────────────
    fn create_render_pass(
        &self,
        device: vk::Device,
        create_info: &vk::RenderPassCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, device: vk::Device, render_pass: vk::RenderPass, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_framebuffer(
        &self,
        device: vk::Device,
        create_info: &vk::FramebufferCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer, allocator: Option<&vk::AllocationCallbacks<'_>>);

    // ── Command buffers ─────────────────────────────────────
    fn create_command_pool(
        &self,
        device: vk::Device,
        create_info: &vk::CommandPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, device: vk::Device, pool: vk::CommandPool, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn reset_command_pool(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags
    ) -> VkResult<()>;
    fn allocate_command_buffers(
        &self,
        device: vk::Device,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>
    ) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(
        &self,
        device: vk::Device,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer]
    );
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>
    ) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    // ── Synchronization / queries ───────────────────────────
    fn create_fence(
        &self,
        device: vk::Device,
        create_info: &vk::FenceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, device: vk::Device, fence: vk::Fence, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn wait_for_fences(&self, device: vk::Device, fences: &[vk::Fence], wait_all: bool, timeout: u64) -> VkResult<()>;
    fn reset_fences(&self, device: vk::Device, fences: &[vk::Fence]) -> VkResult<()>;
    fn create_semaphore(
        &self,
        device: vk::Device,
        create_info: &vk::SemaphoreCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_event(
        &self,
        device: vk::Device,
        create_info: &vk::EventCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::Event>;
    fn destroy_event(&self, device: vk::Device, event: vk::Event, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn create_query_pool(
        &self,
        device: vk::Device,
        create_info: &vk::QueryPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::QueryPool>;
    fn destroy_query_pool(&self, device: vk::Device, query_pool: vk::QueryPool, allocator: Option<&vk::AllocationCallbacks<'_>>);

    // ── Swapchain ───────────────────────────────────────────
    fn create_swapchain(
        &self,
        device: vk::Device,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>
    ) -> VkResult<vk::SwapchainKHR>;
    fn destroy_swapchain(&self, device: vk::Device, swapchain: vk::SwapchainKHR, allocator: Option<&vk::AllocationCallbacks<'_>>);
    fn get_swapchain_images(&self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the swapchain is suboptimal.
    fn queue_present(&self, queue: vk::Queue, present_info: &vk::PresentInfoKHR<'_>) -> VkResult<bool>;
}
