//! Extension structures the cloner can copy out of a `p_next` chain.
//!
//! Each entry pairs a structure type with its struct and lists the counted
//! arrays the struct points at. Structures not listed here are unknown to the
//! cloner and handled per the unknown-extension policy.

use std::ffi::c_void;

use ash::vk;

use super::{shallow, CloneError, Cloner, DeepClone};

macro_rules! known_links {
    ($(
        $s_type:ident => $ty:ident $({ $($ptr:ident[$count:ident]),+ $(,)? })?
    ),+ $(,)?) => {
        $(
            impl DeepClone for vk::$ty<'_> {
                type Owned = vk::$ty<'static>;

                unsafe fn deep_clone(
                    &self,
                    c: &mut Cloner<'_>,
                ) -> Result<Self::Owned, CloneError> {
                    let mut out: Self::Owned = unsafe { shallow(self) };
                    out.p_next = unsafe { c.chain(self.p_next as *const c_void) }? as _;
                    $($(
                        out.$ptr = unsafe { c.slice(self.$ptr, self.$count as usize) };
                    )+)?
                    Ok(out)
                }
            }
        )+

        /// Deep-copy `node` if its structure type is known. The copy's own
        /// `p_next` is cloned recursively.
        ///
        /// # Safety
        /// `node` must point at a valid Vulkan structure.
        pub(crate) unsafe fn clone_link(
            c: &mut Cloner<'_>,
            node: *const c_void,
        ) -> Result<Option<*const c_void>, CloneError> {
            let s_type = unsafe { (*node.cast::<vk::BaseInStructure<'_>>()).s_type };
            let cloned: *const c_void = match s_type {
                $(
                    vk::StructureType::$s_type => {
                        let src = unsafe { &*node.cast::<vk::$ty<'_>>() };
                        let owned = unsafe { src.deep_clone(c) }?;
                        c.alloc(owned).cast_const().cast()
                    }
                )+
                _ => return Ok(None),
            };
            Ok(Some(cloned))
        }

        /// Whether the cloner knows how to copy an extension structure of this type.
        pub fn is_known_extension(s_type: vk::StructureType) -> bool {
            matches!(s_type, $(vk::StructureType::$s_type)|+)
        }
    };
}

known_links! {
    IMAGE_FORMAT_LIST_CREATE_INFO => ImageFormatListCreateInfo {
        p_view_formats[view_format_count],
    },
    EXTERNAL_MEMORY_IMAGE_CREATE_INFO => ExternalMemoryImageCreateInfo,
    EXTERNAL_MEMORY_BUFFER_CREATE_INFO => ExternalMemoryBufferCreateInfo,
    EXPORT_MEMORY_ALLOCATE_INFO => ExportMemoryAllocateInfo,
    MEMORY_DEDICATED_ALLOCATE_INFO => MemoryDedicatedAllocateInfo,
    MEMORY_ALLOCATE_FLAGS_INFO => MemoryAllocateFlagsInfo,
    IMAGE_SWAPCHAIN_CREATE_INFO_KHR => ImageSwapchainCreateInfoKHR,
    IMAGE_VIEW_USAGE_CREATE_INFO => ImageViewUsageCreateInfo,
    IMAGE_STENCIL_USAGE_CREATE_INFO => ImageStencilUsageCreateInfo,
    SAMPLER_YCBCR_CONVERSION_INFO => SamplerYcbcrConversionInfo,
    SEMAPHORE_TYPE_CREATE_INFO => SemaphoreTypeCreateInfo,
    EXPORT_FENCE_CREATE_INFO => ExportFenceCreateInfo,
    EXPORT_SEMAPHORE_CREATE_INFO => ExportSemaphoreCreateInfo,
    DESCRIPTOR_SET_LAYOUT_BINDING_FLAGS_CREATE_INFO => DescriptorSetLayoutBindingFlagsCreateInfo {
        p_binding_flags[binding_count],
    },
    DESCRIPTOR_SET_VARIABLE_DESCRIPTOR_COUNT_ALLOCATE_INFO => DescriptorSetVariableDescriptorCountAllocateInfo {
        p_descriptor_counts[descriptor_set_count],
    },
    DEVICE_GROUP_DEVICE_CREATE_INFO => DeviceGroupDeviceCreateInfo {
        p_physical_devices[physical_device_count],
    },
    PIPELINE_RENDERING_CREATE_INFO => PipelineRenderingCreateInfo {
        p_color_attachment_formats[color_attachment_count],
    },
    SWAPCHAIN_COUNTER_CREATE_INFO_EXT => SwapchainCounterCreateInfoEXT,
    DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT => DebugUtilsMessengerCreateInfoEXT,
    PHYSICAL_DEVICE_FEATURES_2 => PhysicalDeviceFeatures2,
    PHYSICAL_DEVICE_VULKAN_1_1_FEATURES => PhysicalDeviceVulkan11Features,
    PHYSICAL_DEVICE_VULKAN_1_2_FEATURES => PhysicalDeviceVulkan12Features,
    PHYSICAL_DEVICE_VULKAN_1_3_FEATURES => PhysicalDeviceVulkan13Features,
    PHYSICAL_DEVICE_DESCRIPTOR_INDEXING_FEATURES => PhysicalDeviceDescriptorIndexingFeatures,
    PHYSICAL_DEVICE_DYNAMIC_RENDERING_FEATURES => PhysicalDeviceDynamicRenderingFeatures,
    PHYSICAL_DEVICE_TIMELINE_SEMAPHORE_FEATURES => PhysicalDeviceTimelineSemaphoreFeatures,
    PHYSICAL_DEVICE_BUFFER_DEVICE_ADDRESS_FEATURES => PhysicalDeviceBufferDeviceAddressFeatures,
    PHYSICAL_DEVICE_SYNCHRONIZATION_2_FEATURES => PhysicalDeviceSynchronization2Features,
}
