use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of driver object a handle refers to.
///
/// Handle values are only unique within one kind, so every lookup is keyed
/// by `(HandleType, raw value)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleType {
    Instance,
    PhysicalDevice,
    Device,
    Queue,
    Semaphore,
    CommandBuffer,
    Fence,
    DeviceMemory,
    Buffer,
    Image,
    Event,
    QueryPool,
    BufferView,
    ImageView,
    ShaderModule,
    PipelineCache,
    PipelineLayout,
    RenderPass,
    Pipeline,
    DescriptorSetLayout,
    Sampler,
    DescriptorPool,
    DescriptorSet,
    Framebuffer,
    CommandPool,
    Surface,
    Swapchain,
}

impl HandleType {
    pub const ALL: [HandleType; 27] = [
        HandleType::Instance,
        HandleType::PhysicalDevice,
        HandleType::Device,
        HandleType::Queue,
        HandleType::Semaphore,
        HandleType::CommandBuffer,
        HandleType::Fence,
        HandleType::DeviceMemory,
        HandleType::Buffer,
        HandleType::Image,
        HandleType::Event,
        HandleType::QueryPool,
        HandleType::BufferView,
        HandleType::ImageView,
        HandleType::ShaderModule,
        HandleType::PipelineCache,
        HandleType::PipelineLayout,
        HandleType::RenderPass,
        HandleType::Pipeline,
        HandleType::DescriptorSetLayout,
        HandleType::Sampler,
        HandleType::DescriptorPool,
        HandleType::DescriptorSet,
        HandleType::Framebuffer,
        HandleType::CommandPool,
        HandleType::Surface,
        HandleType::Swapchain,
    ];

    /// Snake-case name, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            HandleType::Instance => "instance",
            HandleType::PhysicalDevice => "physical_device",
            HandleType::Device => "device",
            HandleType::Queue => "queue",
            HandleType::Semaphore => "semaphore",
            HandleType::CommandBuffer => "command_buffer",
            HandleType::Fence => "fence",
            HandleType::DeviceMemory => "device_memory",
            HandleType::Buffer => "buffer",
            HandleType::Image => "image",
            HandleType::Event => "event",
            HandleType::QueryPool => "query_pool",
            HandleType::BufferView => "buffer_view",
            HandleType::ImageView => "image_view",
            HandleType::ShaderModule => "shader_module",
            HandleType::PipelineCache => "pipeline_cache",
            HandleType::PipelineLayout => "pipeline_layout",
            HandleType::RenderPass => "render_pass",
            HandleType::Pipeline => "pipeline",
            HandleType::DescriptorSetLayout => "descriptor_set_layout",
            HandleType::Sampler => "sampler",
            HandleType::DescriptorPool => "descriptor_pool",
            HandleType::DescriptorSet => "descriptor_set",
            HandleType::Framebuffer => "framebuffer",
            HandleType::CommandPool => "command_pool",
            HandleType::Surface => "surface",
            HandleType::Swapchain => "swapchain",
        }
    }

    /// Dispatchable handles are pointers owned by the loader/driver.
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            HandleType::Instance
                | HandleType::PhysicalDevice
                | HandleType::Device
                | HandleType::Queue
                | HandleType::CommandBuffer
        )
    }

    /// The single-bit set containing only this type.
    pub fn flag(self) -> TrackedTypes {
        TrackedTypes::from_bits_truncate(1 << self as u32)
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HandleType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HandleType::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| CoreError::UnknownHandleType(s.to_string()))
    }
}

bitflags::bitflags! {
    /// Set of handle types a tracker is responsible for.
    ///
    /// Bit `n` corresponds to the `HandleType` with discriminant `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TrackedTypes: u32 {
        const INSTANCE = 1 << 0;
        const PHYSICAL_DEVICE = 1 << 1;
        const DEVICE = 1 << 2;
        const QUEUE = 1 << 3;
        const SEMAPHORE = 1 << 4;
        const COMMAND_BUFFER = 1 << 5;
        const FENCE = 1 << 6;
        const DEVICE_MEMORY = 1 << 7;
        const BUFFER = 1 << 8;
        const IMAGE = 1 << 9;
        const EVENT = 1 << 10;
        const QUERY_POOL = 1 << 11;
        const BUFFER_VIEW = 1 << 12;
        const IMAGE_VIEW = 1 << 13;
        const SHADER_MODULE = 1 << 14;
        const PIPELINE_CACHE = 1 << 15;
        const PIPELINE_LAYOUT = 1 << 16;
        const RENDER_PASS = 1 << 17;
        const PIPELINE = 1 << 18;
        const DESCRIPTOR_SET_LAYOUT = 1 << 19;
        const SAMPLER = 1 << 20;
        const DESCRIPTOR_POOL = 1 << 21;
        const DESCRIPTOR_SET = 1 << 22;
        const FRAMEBUFFER = 1 << 23;
        const COMMAND_POOL = 1 << 24;
        const SURFACE = 1 << 25;
        const SWAPCHAIN = 1 << 26;
    }
}

impl TrackedTypes {
    pub fn tracks(self, ty: HandleType) -> bool {
        self.contains(ty.flag())
    }

    /// Handle types in this set, in discriminant order.
    pub fn types(self) -> impl Iterator<Item = HandleType> {
        HandleType::ALL.into_iter().filter(move |ty| self.tracks(*ty))
    }

    /// Parse configuration names. `"all"` selects every type, `"none"` none.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, CoreError> {
        let mut set = TrackedTypes::empty();
        for name in names {
            match name.as_ref() {
                "all" => set |= TrackedTypes::all(),
                "none" => {}
                other => set |= other.parse::<HandleType>()?.flag(),
            }
        }
        Ok(set)
    }
}

impl FromIterator<HandleType> for TrackedTypes {
    fn from_iter<I: IntoIterator<Item = HandleType>>(iter: I) -> Self {
        iter.into_iter()
            .fold(TrackedTypes::empty(), |set, ty| set | ty.flag())
    }
}

/// Table key: a handle value qualified by its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleKey {
    pub ty: HandleType,
    pub raw: u64,
}

impl HandleKey {
    pub fn new(ty: HandleType, raw: u64) -> Self {
        Self { ty, raw }
    }

    pub fn is_null(&self) -> bool {
        self.raw == 0
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:#x})", self.ty, self.raw)
    }
}
