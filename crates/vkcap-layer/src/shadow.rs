//! Shadow objects: what the layer remembers about one live driver object.

use std::ffi::c_void;

use ash::vk;
use serde::Serialize;
use vkcap_core::{HandleKey, HandleType, UnknownExtensionPolicy};

use crate::clone::{chain_types, CloneArena, Cloned, DeepClone};
use crate::error::CloneError;
use crate::snapshot::{CreateInfoSummary, ObjectRecord};

/// Creation-order sequence number, unique within one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ShadowId(pub u64);

/// Per-type state derived from the calls that produced or queried an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ObjectState {
    #[default]
    None,
    PhysicalDevice {
        /// Position in the enumeration result
        index: u32,
    },
    Queue {
        family_index: u32,
        queue_index: u32,
    },
    DeviceMemory {
        allocation_size: vk::DeviceSize,
        memory_type_index: u32,
    },
    CommandBuffer {
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
    },
    DescriptorSet {
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    },
    Pipeline {
        bind_point: vk::PipelineBindPoint,
        cache: vk::PipelineCache,
    },
    Swapchain {
        /// Images in the order the driver returned them
        images: Vec<vk::Image>,
    },
}

/// A create-info struct that can be recorded on a shadow.
pub trait Recordable: DeepClone {
    fn wrap(cloned: Cloned<Self::Owned>) -> CreateInfo;
}

macro_rules! create_infos {
    ($($variant:ident($ty:ident) => $accessor:ident),+ $(,)?) => {
        /// The deep-copied create info of a tracked object.
        #[derive(Debug)]
        pub enum CreateInfo {
            $($variant(Cloned<vk::$ty<'static>>),)+
        }

        impl CreateInfo {
            /// Name of the recorded Vulkan struct.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(CreateInfo::$variant(_) => stringify!($ty),)+
                }
            }

            pub fn s_type(&self) -> vk::StructureType {
                match self {
                    $(CreateInfo::$variant(c) => c.get().s_type,)+
                }
            }

            /// Structure types of the extension chain kept in the clone.
            pub fn extensions(&self) -> Vec<vk::StructureType> {
                let p_next = match self {
                    $(CreateInfo::$variant(c) => c.get().p_next as *const c_void,)+
                };
                // SAFETY: the chain lives in the clone's own arena.
                unsafe { chain_types(p_next) }
            }

            pub fn skipped_extensions(&self) -> &[vk::StructureType] {
                match self {
                    $(CreateInfo::$variant(c) => c.skipped_extensions(),)+
                }
            }

            pub fn arena(&self) -> &CloneArena {
                match self {
                    $(CreateInfo::$variant(c) => c.arena(),)+
                }
            }

            $(
                pub fn $accessor(&self) -> Option<&vk::$ty<'static>> {
                    match self {
                        CreateInfo::$variant(c) => Some(c.get()),
                        _ => None,
                    }
                }
            )+
        }

        $(
            impl Recordable for vk::$ty<'_> {
                fn wrap(cloned: Cloned<vk::$ty<'static>>) -> CreateInfo {
                    CreateInfo::$variant(cloned)
                }
            }
        )+
    };
}

create_infos! {
    Instance(InstanceCreateInfo) => instance,
    HeadlessSurface(HeadlessSurfaceCreateInfoEXT) => headless_surface,
    Device(DeviceCreateInfo) => device,
    Memory(MemoryAllocateInfo) => memory,
    Buffer(BufferCreateInfo) => buffer,
    BufferView(BufferViewCreateInfo) => buffer_view,
    Image(ImageCreateInfo) => image,
    ImageView(ImageViewCreateInfo) => image_view,
    Sampler(SamplerCreateInfo) => sampler,
    ShaderModule(ShaderModuleCreateInfo) => shader_module,
    PipelineCache(PipelineCacheCreateInfo) => pipeline_cache,
    PipelineLayout(PipelineLayoutCreateInfo) => pipeline_layout,
    GraphicsPipeline(GraphicsPipelineCreateInfo) => graphics_pipeline,
    ComputePipeline(ComputePipelineCreateInfo) => compute_pipeline,
    DescriptorSetLayout(DescriptorSetLayoutCreateInfo) => descriptor_set_layout,
    DescriptorPool(DescriptorPoolCreateInfo) => descriptor_pool,
    DescriptorSet(DescriptorSetAllocateInfo) => descriptor_set,
    RenderPass(RenderPassCreateInfo) => render_pass,
    Framebuffer(FramebufferCreateInfo) => framebuffer,
    CommandPool(CommandPoolCreateInfo) => command_pool,
    CommandBuffer(CommandBufferAllocateInfo) => command_buffer,
    Fence(FenceCreateInfo) => fence,
    Semaphore(SemaphoreCreateInfo) => semaphore,
    Event(EventCreateInfo) => event,
    QueryPool(QueryPoolCreateInfo) => query_pool,
    Swapchain(SwapchainCreateInfoKHR) => swapchain,
}

impl CreateInfo {
    /// Deep-copy `info` into a new record.
    ///
    /// # Safety
    /// See [`DeepClone::deep_clone`].
    pub unsafe fn record<S: Recordable>(
        info: &S,
        policy: UnknownExtensionPolicy,
    ) -> Result<Self, CloneError> {
        let cloned = unsafe { Cloned::new(info, policy) }?;
        Ok(S::wrap(cloned))
    }

    pub fn summary(&self) -> CreateInfoSummary {
        CreateInfoSummary {
            kind: self.kind(),
            s_type: self.s_type().as_raw(),
            extensions: self.extensions().iter().map(|s| s.as_raw()).collect(),
            skipped_extensions: self
                .skipped_extensions()
                .iter()
                .map(|s| s.as_raw())
                .collect(),
        }
    }
}

/// Shadow of one live driver object, owned by its handle table entry.
#[derive(Debug)]
pub struct Shadow {
    id: ShadowId,
    key: HandleKey,
    parent: Option<HandleKey>,
    create_info: Option<CreateInfo>,
    state: ObjectState,
    replay_handle: Option<u64>,
}

impl Shadow {
    pub(crate) fn new(id: ShadowId, key: HandleKey, parent: Option<HandleKey>) -> Self {
        Self {
            id,
            key,
            parent,
            create_info: None,
            state: ObjectState::None,
            replay_handle: None,
        }
    }

    pub fn id(&self) -> ShadowId {
        self.id
    }

    pub fn key(&self) -> HandleKey {
        self.key
    }

    pub fn handle_type(&self) -> HandleType {
        self.key.ty
    }

    pub fn raw(&self) -> u64 {
        self.key.raw
    }

    /// The object this one was created from or allocated out of.
    pub fn parent(&self) -> Option<HandleKey> {
        self.parent
    }

    /// Deep-copy `info` and keep it as this object's create info. Nothing
    /// inside the caller's struct is referenced afterwards.
    ///
    /// # Safety
    /// See [`DeepClone::deep_clone`].
    pub unsafe fn set_create_info<S: Recordable>(
        &mut self,
        info: &S,
        policy: UnknownExtensionPolicy,
    ) -> Result<(), CloneError> {
        self.create_info = Some(unsafe { CreateInfo::record(info, policy) }?);
        Ok(())
    }

    /// Keep a create info recorded ahead of the driver call.
    pub fn attach_create_info(&mut self, info: CreateInfo) {
        self.create_info = Some(info);
    }

    pub fn create_info(&self) -> Option<&CreateInfo> {
        self.create_info.as_ref()
    }

    pub fn state(&self) -> &ObjectState {
        &self.state
    }

    pub fn set_state(&mut self, state: ObjectState) {
        self.state = state;
    }

    /// Images of a swapchain shadow, empty for anything else.
    pub fn swapchain_images(&self) -> &[vk::Image] {
        match &self.state {
            ObjectState::Swapchain { images } => images,
            _ => &[],
        }
    }

    /// Live replay-time handle bound to this trace-time object.
    pub fn replay_handle(&self) -> Option<u64> {
        self.replay_handle
    }

    pub fn set_replay_handle(&mut self, live: u64) {
        self.replay_handle = Some(live);
    }

    pub fn record(&self) -> ObjectRecord {
        ObjectRecord {
            id: self.id,
            handle_type: self.key.ty,
            handle: self.key.raw,
            parent: self.parent,
            create_info: self.create_info.as_ref().map(CreateInfo::summary),
            replay_handle: self.replay_handle,
        }
    }
}
