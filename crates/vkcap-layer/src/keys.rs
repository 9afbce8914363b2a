//! Mapping from `ash` handle types to table keys.

use ash::vk;
use ash::vk::Handle;
use vkcap_core::{HandleKey, HandleType};

/// A driver handle type the handle table knows how to key.
pub trait TrackedHandle: Handle + Copy {
    const HANDLE_TYPE: HandleType;
}

macro_rules! tracked_handles {
    ($($vk:ident => $ty:ident),+ $(,)?) => {
        $(
            impl TrackedHandle for vk::$vk {
                const HANDLE_TYPE: HandleType = HandleType::$ty;
            }
        )+
    };
}

tracked_handles! {
    Instance => Instance,
    PhysicalDevice => PhysicalDevice,
    Device => Device,
    Queue => Queue,
    Semaphore => Semaphore,
    CommandBuffer => CommandBuffer,
    Fence => Fence,
    DeviceMemory => DeviceMemory,
    Buffer => Buffer,
    Image => Image,
    Event => Event,
    QueryPool => QueryPool,
    BufferView => BufferView,
    ImageView => ImageView,
    ShaderModule => ShaderModule,
    PipelineCache => PipelineCache,
    PipelineLayout => PipelineLayout,
    RenderPass => RenderPass,
    Pipeline => Pipeline,
    DescriptorSetLayout => DescriptorSetLayout,
    Sampler => Sampler,
    DescriptorPool => DescriptorPool,
    DescriptorSet => DescriptorSet,
    Framebuffer => Framebuffer,
    CommandPool => CommandPool,
    SurfaceKHR => Surface,
    SwapchainKHR => Swapchain,
}

/// Table key for a typed handle.
pub fn key_of<H: TrackedHandle>(handle: H) -> HandleKey {
    HandleKey::new(H::HANDLE_TYPE, handle.as_raw())
}

pub fn is_null<H: TrackedHandle>(handle: H) -> bool {
    handle.as_raw() == 0
}
