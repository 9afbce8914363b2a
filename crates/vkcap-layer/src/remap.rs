//! Replay-time handle remapping.
//!
//! A replayer issues calls with the handle values recorded at capture time.
//! [`HandleRemapper`] substitutes the live handles of the replay device on
//! the way to the driver, and maps handles the driver produces back to the
//! trace-time values queued with [`HandleRemapper::expect`], so everything
//! upstream of it keeps speaking trace-time handles.
//!
//! Handles nested inside `p_next` extension structs are passed through
//! untranslated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::prelude::VkResult;
use ash::vk;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error};
use vkcap_core::{DesyncPolicy, HandleKey, HandleType, TrackedTypes};

use crate::clone::has_immutable_samplers;
use crate::error::TrackingError;
use crate::handle_table::HandleTable;
use crate::keys::{key_of, TrackedHandle};
use crate::surface::{Dispatch, PipelineResult, Transform};
use crate::tracker::raw_slice;

/// Trace-time to live handle bindings for one replay session.
///
/// Entries are shadows keyed by the trace-time handle with the live handle
/// stored as their replay handle; a reverse index answers live-to-trace.
pub struct RemapTable {
    by_trace: HandleTable,
    by_live: DashMap<HandleKey, HandleKey>,
}

impl RemapTable {
    pub fn new() -> Self {
        Self {
            by_trace: HandleTable::new(),
            by_live: DashMap::new(),
        }
    }

    /// Bind a trace-time handle to the live handle the replay driver produced.
    pub fn bind(
        &self,
        trace: HandleKey,
        live: u64,
        parent: Option<HandleKey>,
    ) -> Result<(), TrackingError> {
        self.by_trace
            .create(trace, parent)
            .map_err(|e| e.with_op("bind"))?
            .set_replay_handle(live);
        self.by_live.insert(HandleKey::new(trace.ty, live), trace);
        debug!("bind {} -> {:#x}", trace, live);
        Ok(())
    }

    /// Live handle for a trace-time handle.
    pub fn resolve(&self, trace: HandleKey) -> Option<u64> {
        self.by_trace
            .lookup(trace)
            .and_then(|shadow| shadow.replay_handle())
    }

    /// Trace-time handle bound to a live handle.
    pub fn trace_of_live(&self, live: HandleKey) -> Option<HandleKey> {
        self.by_live.get(&live).map(|v| *v)
    }

    /// Drop a binding, returning the live handle it held.
    pub fn release(&self, trace: HandleKey) -> Result<u64, TrackingError> {
        let shadow = self.by_trace.erase(trace).map_err(|e| e.with_op("release"))?;
        let live = shadow.replay_handle().unwrap_or(trace.raw);
        self.by_live.remove(&HandleKey::new(trace.ty, live));
        Ok(live)
    }

    /// Trace-time keys bound under `parent`, in binding order.
    pub fn children_of(&self, parent: HandleKey, ty: HandleType) -> Vec<HandleKey> {
        self.by_trace.children_of(parent, ty)
    }

    /// The bindings as a handle table keyed by trace-time handle.
    pub fn table(&self) -> &HandleTable {
        &self.by_trace
    }

    pub fn len(&self) -> usize {
        self.by_trace.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_trace.is_empty()
    }

    pub fn clear(&self) {
        self.by_trace.clear();
        self.by_live.clear();
    }
}

impl Default for RemapTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Transform translating trace-time handles to live ones and back.
pub struct HandleRemapper {
    remap: Arc<RemapTable>,
    tracked: TrackedTypes,
    on_desync: DesyncPolicy,
    /// Trace-time handles the next producing calls will return, in order
    pending: Mutex<VecDeque<HandleKey>>,
    /// Next value handed out for an unexpected handle whose own value is taken
    next_stand_in: AtomicU64,
}

impl HandleRemapper {
    pub fn new(remap: Arc<RemapTable>, tracked: TrackedTypes, on_desync: DesyncPolicy) -> Self {
        Self {
            remap,
            tracked,
            on_desync,
            pending: Mutex::new(VecDeque::new()),
            next_stand_in: AtomicU64::new(u64::MAX),
        }
    }

    pub fn remap(&self) -> &Arc<RemapTable> {
        &self.remap
    }

    /// Queue the trace-time handle the next call producing an `H` returned
    /// at capture time.
    pub fn expect<H: TrackedHandle>(&self, trace: H) {
        self.expect_key(key_of(trace));
    }

    pub fn expect_key(&self, trace: HandleKey) {
        self.pending.lock().push_back(trace);
    }

    /// Number of queued trace-time handles not yet bound.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn fault(&self, err: TrackingError) {
        error!("replay remap desync: {}", err);
        if self.on_desync == DesyncPolicy::Abort {
            panic!("replay remap desync: {err}");
        }
    }

    /// Live handle for a trace-time input.
    fn live<H: TrackedHandle>(&self, trace: H) -> H {
        let key = key_of(trace);
        if key.is_null() || !self.tracked.tracks(key.ty) {
            return trace;
        }
        match self.remap.resolve(key) {
            Some(live) => H::from_raw(live),
            None => {
                self.fault(TrackingError::NotTracked {
                    key,
                    op: "resolve",
                });
                trace
            }
        }
    }

    fn live_all<H: TrackedHandle>(&self, trace: &[H]) -> Vec<H> {
        trace.iter().map(|&h| self.live(h)).collect()
    }

    /// Pop the next queued trace-time handle if it has type `ty`.
    fn take_pending(&self, call: &'static str, ty: HandleType) -> Option<HandleKey> {
        let mut pending = self.pending.lock();
        let front = pending.front().copied()?;
        if front.ty == ty {
            return pending.pop_front();
        }
        drop(pending);
        self.fault(TrackingError::UnexpectedType {
            expected: ty,
            found: front,
            op: call,
        });
        None
    }

    /// Bind a produced live handle and return its trace-time value.
    fn bind_output<H: TrackedHandle>(
        &self,
        call: &'static str,
        live: H,
        parent: Option<HandleKey>,
    ) -> H {
        let live_key = key_of(live);
        if live_key.is_null() || !self.tracked.tracks(live_key.ty) {
            return live;
        }
        let Some(trace) = self.take_pending(call, live_key.ty) else {
            return self.bind_unexpected(call, live, parent);
        };
        if let Err(e) = self.remap.bind(trace, live_key.raw, parent) {
            self.fault(e.with_op(call));
        }
        H::from_raw(trace.raw)
    }

    /// Bind a produced handle no trace-time value was queued for.
    ///
    /// The live handle stands for itself unless its value is already a
    /// trace-time key of the same type; then it stands in under a value
    /// taken from the top of the handle space.
    fn bind_unexpected<H: TrackedHandle>(
        &self,
        call: &'static str,
        live: H,
        parent: Option<HandleKey>,
    ) -> H {
        let live_key = key_of(live);
        if self.remap.bind(live_key, live_key.raw, parent).is_ok() {
            return live;
        }
        loop {
            let stand_in = HandleKey::new(
                live_key.ty,
                self.next_stand_in.fetch_sub(1, Ordering::Relaxed),
            );
            if self.remap.bind(stand_in, live_key.raw, parent).is_ok() {
                debug!(
                    "{}: {} is already a trace key, standing in as {}",
                    call, live_key, stand_in
                );
                return H::from_raw(stand_in.raw);
            }
        }
    }

    /// Like [`HandleRemapper::bind_output`] for handles a query may return
    /// more than once.
    fn bind_queried<H: TrackedHandle>(
        &self,
        call: &'static str,
        live: H,
        parent: Option<HandleKey>,
    ) -> H {
        let live_key = key_of(live);
        if live_key.is_null() || !self.tracked.tracks(live_key.ty) {
            return live;
        }
        let Some(existing) = self.remap.trace_of_live(live_key) else {
            return self.bind_output(call, live, parent);
        };
        let queued = {
            let mut pending = self.pending.lock();
            match pending.front().copied() {
                Some(front) if front.ty == live_key.ty => pending.pop_front(),
                _ => None,
            }
        };
        if let Some(queued) = queued {
            if queued != existing {
                self.fault(TrackingError::AlreadyTracked {
                    key: existing,
                    op: call,
                });
            }
        }
        H::from_raw(existing.raw)
    }

    fn unbind<H: TrackedHandle>(&self, call: &'static str, trace: H) {
        let key = key_of(trace);
        if key.is_null() || !self.tracked.tracks(key.ty) {
            return;
        }
        if let Err(e) = self.remap.release(key) {
            self.fault(e.with_op(call));
        }
    }

    fn unbind_children(&self, parent: HandleKey, ty: HandleType) {
        if !self.tracked.tracks(ty) {
            return;
        }
        for key in self.remap.children_of(parent, ty) {
            let _ = self.remap.release(key);
        }
    }

    fn bind_pipelines(&self, call: &'static str, device: vk::Device, result: PipelineResult) -> PipelineResult {
        let parent = Some(key_of(device));
        match result {
            Ok(pipelines) => Ok(pipelines
                .into_iter()
                .map(|p| self.bind_output(call, p, parent))
                .collect()),
            Err((pipelines, err)) => Err((
                pipelines
                    .into_iter()
                    .map(|p| self.bind_output(call, p, parent))
                    .collect(),
                err,
            )),
        }
    }
}

/// Create/destroy pairs of device children whose create info holds no handles.
macro_rules! plain_device_children {
    ($(($create:ident, $destroy:ident, $info:ident, $handle:ident)),+ $(,)?) => {
        $(
            unsafe fn $create(
                &self,
                next: &dyn Dispatch,
                device: vk::Device,
                create_info: &vk::$info<'_>,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) -> VkResult<vk::$handle> {
                let live = unsafe { next.$create(self.live(device), create_info, allocator) }?;
                Ok(self.bind_output(stringify!($create), live, Some(key_of(device))))
            }

            unsafe fn $destroy(
                &self,
                next: &dyn Dispatch,
                device: vk::Device,
                handle: vk::$handle,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) {
                let live = self.live(handle);
                unsafe { next.$destroy(self.live(device), live, allocator) };
                self.unbind(stringify!($destroy), handle);
            }
        )+
    };
}

/// Destroy calls that only need their handles translated.
macro_rules! device_destroys {
    ($(($destroy:ident, $handle:ident)),+ $(,)?) => {
        $(
            unsafe fn $destroy(
                &self,
                next: &dyn Dispatch,
                device: vk::Device,
                handle: vk::$handle,
                allocator: Option<&vk::AllocationCallbacks<'_>>,
            ) {
                let live = self.live(handle);
                unsafe { next.$destroy(self.live(device), live, allocator) };
                self.unbind(stringify!($destroy), handle);
            }
        )+
    };
}

impl Transform for HandleRemapper {
    // ── Instance ────────────────────────────────────────────

    unsafe fn create_instance(
        &self,
        next: &dyn Dispatch,
        create_info: &vk::InstanceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Instance> {
        let live = unsafe { next.create_instance(create_info, allocator) }?;
        Ok(self.bind_output("create_instance", live, None))
    }

    unsafe fn destroy_instance(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.destroy_instance(self.live(instance), allocator) };
        self.unbind_children(key_of(instance), HandleType::PhysicalDevice);
        self.unbind("destroy_instance", instance);
    }

    unsafe fn enumerate_physical_devices(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        let live = unsafe { next.enumerate_physical_devices(self.live(instance)) }?;
        let parent = Some(key_of(instance));
        Ok(live
            .into_iter()
            .map(|pd| self.bind_queried("enumerate_physical_devices", pd, parent))
            .collect())
    }

    unsafe fn get_physical_device_properties(
        &self,
        next: &dyn Dispatch,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        unsafe { next.get_physical_device_properties(self.live(physical_device)) }
    }

    unsafe fn get_physical_device_queue_family_properties(
        &self,
        next: &dyn Dispatch,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        unsafe { next.get_physical_device_queue_family_properties(self.live(physical_device)) }
    }

    unsafe fn get_physical_device_memory_properties(
        &self,
        next: &dyn Dispatch,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        unsafe { next.get_physical_device_memory_properties(self.live(physical_device)) }
    }

    unsafe fn create_headless_surface(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
        create_info: &vk::HeadlessSurfaceCreateInfoEXT<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SurfaceKHR> {
        let live =
            unsafe { next.create_headless_surface(self.live(instance), create_info, allocator) }?;
        Ok(self.bind_output("create_headless_surface", live, Some(key_of(instance))))
    }

    unsafe fn destroy_surface(
        &self,
        next: &dyn Dispatch,
        instance: vk::Instance,
        surface: vk::SurfaceKHR,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.destroy_surface(self.live(instance), self.live(surface), allocator) };
        self.unbind("destroy_surface", surface);
    }

    // ── Device / queue ──────────────────────────────────────

    unsafe fn create_device(
        &self,
        next: &dyn Dispatch,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Device> {
        let live =
            unsafe { next.create_device(self.live(physical_device), create_info, allocator) }?;
        Ok(self.bind_output("create_device", live, Some(key_of(physical_device))))
    }

    unsafe fn destroy_device(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.destroy_device(self.live(device), allocator) };
        self.unbind_children(key_of(device), HandleType::Queue);
        self.unbind("destroy_device", device);
    }

    unsafe fn get_device_queue(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        queue_family_index: u32,
        queue_index: u32,
    ) -> vk::Queue {
        let live =
            unsafe { next.get_device_queue(self.live(device), queue_family_index, queue_index) };
        self.bind_queried("get_device_queue", live, Some(key_of(device)))
    }

    unsafe fn device_wait_idle(&self, next: &dyn Dispatch, device: vk::Device) -> VkResult<()> {
        unsafe { next.device_wait_idle(self.live(device)) }
    }

    unsafe fn queue_submit(
        &self,
        next: &dyn Dispatch,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let arrays: Vec<(Vec<vk::Semaphore>, Vec<vk::CommandBuffer>, Vec<vk::Semaphore>)> = submits
            .iter()
            .map(|s| unsafe {
                (
                    self.live_all(raw_slice(s.p_wait_semaphores, s.wait_semaphore_count as usize)),
                    self.live_all(raw_slice(s.p_command_buffers, s.command_buffer_count as usize)),
                    self.live_all(raw_slice(
                        s.p_signal_semaphores,
                        s.signal_semaphore_count as usize,
                    )),
                )
            })
            .collect();
        let live_submits: Vec<vk::SubmitInfo<'_>> = submits
            .iter()
            .zip(&arrays)
            .map(|(s, (waits, buffers, signals))| {
                let mut live = *s;
                live.p_wait_semaphores = rebased(waits, s.p_wait_semaphores);
                live.p_command_buffers = rebased(buffers, s.p_command_buffers);
                live.p_signal_semaphores = rebased(signals, s.p_signal_semaphores);
                live
            })
            .collect();
        unsafe { next.queue_submit(self.live(queue), &live_submits, self.live(fence)) }
    }

    unsafe fn queue_wait_idle(&self, next: &dyn Dispatch, queue: vk::Queue) -> VkResult<()> {
        unsafe { next.queue_wait_idle(self.live(queue)) }
    }

    // ── Memory ──────────────────────────────────────────────

    unsafe fn allocate_memory(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DeviceMemory> {
        let live = unsafe { next.allocate_memory(self.live(device), allocate_info, allocator) }?;
        Ok(self.bind_output("allocate_memory", live, Some(key_of(device))))
    }

    unsafe fn free_memory(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        memory: vk::DeviceMemory,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.free_memory(self.live(device), self.live(memory), allocator) };
        self.unbind("free_memory", memory);
    }

    unsafe fn bind_buffer_memory(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe {
            next.bind_buffer_memory(
                self.live(device),
                self.live(buffer),
                self.live(memory),
                offset,
            )
        }
    }

    unsafe fn bind_image_memory(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        unsafe {
            next.bind_image_memory(self.live(device), self.live(image), self.live(memory), offset)
        }
    }

    unsafe fn get_buffer_memory_requirements(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        buffer: vk::Buffer,
    ) -> vk::MemoryRequirements {
        unsafe { next.get_buffer_memory_requirements(self.live(device), self.live(buffer)) }
    }

    unsafe fn get_image_memory_requirements(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        image: vk::Image,
    ) -> vk::MemoryRequirements {
        unsafe { next.get_image_memory_requirements(self.live(device), self.live(image)) }
    }

    // ── Device children ─────────────────────────────────────

    plain_device_children! {
        (create_buffer, destroy_buffer, BufferCreateInfo, Buffer),
        (create_image, destroy_image, ImageCreateInfo, Image),
        (create_sampler, destroy_sampler, SamplerCreateInfo, Sampler),
        (create_shader_module, destroy_shader_module, ShaderModuleCreateInfo, ShaderModule),
        (create_pipeline_cache, destroy_pipeline_cache, PipelineCacheCreateInfo, PipelineCache),
        (create_render_pass, destroy_render_pass, RenderPassCreateInfo, RenderPass),
        (create_fence, destroy_fence, FenceCreateInfo, Fence),
        (create_semaphore, destroy_semaphore, SemaphoreCreateInfo, Semaphore),
        (create_event, destroy_event, EventCreateInfo, Event),
        (create_query_pool, destroy_query_pool, QueryPoolCreateInfo, QueryPool),
    }

    device_destroys! {
        (destroy_buffer_view, BufferView),
        (destroy_image_view, ImageView),
        (destroy_pipeline_layout, PipelineLayout),
        (destroy_descriptor_set_layout, DescriptorSetLayout),
        (destroy_framebuffer, Framebuffer),
        (destroy_pipeline, Pipeline),
    }

    unsafe fn create_buffer_view(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::BufferViewCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::BufferView> {
        let mut info = *create_info;
        info.buffer = self.live(info.buffer);
        let live = unsafe { next.create_buffer_view(self.live(device), &info, allocator) }?;
        Ok(self.bind_output("create_buffer_view", live, Some(key_of(device))))
    }

    unsafe fn create_image_view(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::ImageViewCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::ImageView> {
        let mut info = *create_info;
        info.image = self.live(info.image);
        let live = unsafe { next.create_image_view(self.live(device), &info, allocator) }?;
        Ok(self.bind_output("create_image_view", live, Some(key_of(device))))
    }

    unsafe fn create_pipeline_layout(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::PipelineLayout> {
        let set_layouts = self.live_all(unsafe {
            raw_slice(create_info.p_set_layouts, create_info.set_layout_count as usize)
        });
        let mut info = *create_info;
        info.p_set_layouts = rebased(&set_layouts, create_info.p_set_layouts);
        let live = unsafe { next.create_pipeline_layout(self.live(device), &info, allocator) }?;
        Ok(self.bind_output("create_pipeline_layout", live, Some(key_of(device))))
    }

    unsafe fn create_framebuffer(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::FramebufferCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::Framebuffer> {
        let attachments = self.live_all(unsafe {
            raw_slice(create_info.p_attachments, create_info.attachment_count as usize)
        });
        let mut info = *create_info;
        info.render_pass = self.live(info.render_pass);
        info.p_attachments = rebased(&attachments, create_info.p_attachments);
        let live = unsafe { next.create_framebuffer(self.live(device), &info, allocator) }?;
        Ok(self.bind_output("create_framebuffer", live, Some(key_of(device))))
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
        let stages: Vec<Vec<vk::PipelineShaderStageCreateInfo<'_>>> = create_infos
            .iter()
            .map(|info| {
                unsafe { raw_slice(info.p_stages, info.stage_count as usize) }
                    .iter()
                    .map(|stage| self.live_stage(stage))
                    .collect()
            })
            .collect();
        let infos: Vec<vk::GraphicsPipelineCreateInfo<'_>> = create_infos
            .iter()
            .zip(&stages)
            .map(|(info, stages)| {
                let mut live = *info;
                live.p_stages = rebased(stages, info.p_stages);
                live.layout = self.live(info.layout);
                live.render_pass = self.live(info.render_pass);
                live.base_pipeline_handle = self.live(info.base_pipeline_handle);
                live
            })
            .collect();
        let result = unsafe {
            next.create_graphics_pipelines(
                self.live(device),
                self.live(pipeline_cache),
                &infos,
                allocator,
            )
        };
        self.bind_pipelines("create_graphics_pipelines", device, result)
    }

    unsafe fn create_compute_pipelines(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pipeline_cache: vk::PipelineCache,
        create_infos: &[vk::ComputePipelineCreateInfo<'_>],
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> PipelineResult {
        let infos: Vec<vk::ComputePipelineCreateInfo<'_>> = create_infos
            .iter()
            .map(|info| {
                let mut live = *info;
                live.stage = self.live_stage(&info.stage);
                live.layout = self.live(info.layout);
                live.base_pipeline_handle = self.live(info.base_pipeline_handle);
                live
            })
            .collect();
        let result = unsafe {
            next.create_compute_pipelines(
                self.live(device),
                self.live(pipeline_cache),
                &infos,
                allocator,
            )
        };
        self.bind_pipelines("create_compute_pipelines", device, result)
    }

    // ── Descriptors ─────────────────────────────────────────

    unsafe fn create_descriptor_set_layout(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::DescriptorSetLayoutCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DescriptorSetLayout> {
        let bindings =
            unsafe { raw_slice(create_info.p_bindings, create_info.binding_count as usize) };
        let samplers: Vec<Vec<vk::Sampler>> = bindings
            .iter()
            .map(|b| {
                if !has_immutable_samplers(b) {
                    return Vec::new();
                }
                self.live_all(unsafe {
                    raw_slice(b.p_immutable_samplers, b.descriptor_count as usize)
                })
            })
            .collect();
        let live_bindings: Vec<vk::DescriptorSetLayoutBinding<'_>> = bindings
            .iter()
            .zip(&samplers)
            .map(|(b, samplers)| {
                let mut live = *b;
                live.p_immutable_samplers = rebased(samplers, b.p_immutable_samplers);
                live
            })
            .collect();
        let mut info = *create_info;
        info.p_bindings = rebased(&live_bindings, create_info.p_bindings);
        let live =
            unsafe { next.create_descriptor_set_layout(self.live(device), &info, allocator) }?;
        Ok(self.bind_output("create_descriptor_set_layout", live, Some(key_of(device))))
    }

    unsafe fn create_descriptor_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::DescriptorPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::DescriptorPool> {
        let live =
            unsafe { next.create_descriptor_pool(self.live(device), create_info, allocator) }?;
        Ok(self.bind_output("create_descriptor_pool", live, Some(key_of(device))))
    }

    unsafe fn destroy_descriptor_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::DescriptorPool,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.destroy_descriptor_pool(self.live(device), self.live(pool), allocator) };
        if pool != vk::DescriptorPool::null() {
            self.unbind_children(key_of(pool), HandleType::DescriptorSet);
        }
        self.unbind("destroy_descriptor_pool", pool);
    }

    unsafe fn reset_descriptor_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::DescriptorPool,
        flags: vk::DescriptorPoolResetFlags,
    ) -> VkResult<()> {
        unsafe { next.reset_descriptor_pool(self.live(device), self.live(pool), flags) }?;
        self.unbind_children(key_of(pool), HandleType::DescriptorSet);
        Ok(())
    }

    unsafe fn allocate_descriptor_sets(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocate_info: &vk::DescriptorSetAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::DescriptorSet>> {
        let layouts = self.live_all(unsafe {
            raw_slice(
                allocate_info.p_set_layouts,
                allocate_info.descriptor_set_count as usize,
            )
        });
        let mut info = *allocate_info;
        info.descriptor_pool = self.live(allocate_info.descriptor_pool);
        info.p_set_layouts = rebased(&layouts, allocate_info.p_set_layouts);
        let live = unsafe { next.allocate_descriptor_sets(self.live(device), &info) }?;
        let parent = Some(key_of(allocate_info.descriptor_pool));
        Ok(live
            .into_iter()
            .map(|set| self.bind_output("allocate_descriptor_sets", set, parent))
            .collect())
    }

    unsafe fn free_descriptor_sets(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::DescriptorPool,
        descriptor_sets: &[vk::DescriptorSet],
    ) -> VkResult<()> {
        let live = self.live_all(descriptor_sets);
        let result =
            unsafe { next.free_descriptor_sets(self.live(device), self.live(pool), &live) };
        for &set in descriptor_sets {
            self.unbind("free_descriptor_sets", set);
        }
        result
    }

    unsafe fn update_descriptor_sets(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        writes: &[vk::WriteDescriptorSet<'_>],
        copies: &[vk::CopyDescriptorSet<'_>],
    ) {
        type Payloads = (
            Vec<vk::DescriptorImageInfo>,
            Vec<vk::DescriptorBufferInfo>,
            Vec<vk::BufferView>,
        );
        let payloads: Vec<Payloads> = writes
            .iter()
            .map(|w| {
                let count = w.descriptor_count as usize;
                match descriptor_payload(w.descriptor_type) {
                    Payload::Image => {
                        let images: Vec<vk::DescriptorImageInfo> = unsafe { raw_slice(w.p_image_info, count) }
                            .iter()
                            .map(|i| vk::DescriptorImageInfo {
                                sampler: self.live(i.sampler),
                                image_view: self.live(i.image_view),
                                image_layout: i.image_layout,
                            })
                            .collect();
                        (images, Vec::new(), Vec::new())
                    }
                    Payload::Buffer => {
                        let buffers: Vec<vk::DescriptorBufferInfo> = unsafe { raw_slice(w.p_buffer_info, count) }
                            .iter()
                            .map(|b| vk::DescriptorBufferInfo {
                                buffer: self.live(b.buffer),
                                offset: b.offset,
                                range: b.range,
                            })
                            .collect();
                        (Vec::new(), buffers, Vec::new())
                    }
                    Payload::TexelBuffer => {
                        let views = self.live_all(unsafe { raw_slice(w.p_texel_buffer_view, count) });
                        (Vec::new(), Vec::new(), views)
                    }
                    Payload::Other => (Vec::new(), Vec::new(), Vec::new()),
                }
            })
            .collect();
        let live_writes: Vec<vk::WriteDescriptorSet<'_>> = writes
            .iter()
            .zip(&payloads)
            .map(|(w, (images, buffers, texel_views))| {
                let mut live = *w;
                live.dst_set = self.live(w.dst_set);
                live.p_image_info = rebased(images, w.p_image_info);
                live.p_buffer_info = rebased(buffers, w.p_buffer_info);
                live.p_texel_buffer_view = rebased(texel_views, w.p_texel_buffer_view);
                live
            })
            .collect();
        let live_copies: Vec<vk::CopyDescriptorSet<'_>> = copies
            .iter()
            .map(|c| {
                let mut live = *c;
                live.src_set = self.live(c.src_set);
                live.dst_set = self.live(c.dst_set);
                live
            })
            .collect();
        unsafe { next.update_descriptor_sets(self.live(device), &live_writes, &live_copies) }
    }

    // ── Command buffers ─────────────────────────────────────

    unsafe fn create_command_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::CommandPoolCreateInfo<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::CommandPool> {
        let live = unsafe { next.create_command_pool(self.live(device), create_info, allocator) }?;
        Ok(self.bind_output("create_command_pool", live, Some(key_of(device))))
    }

    unsafe fn destroy_command_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::CommandPool,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.destroy_command_pool(self.live(device), self.live(pool), allocator) };
        if pool != vk::CommandPool::null() {
            self.unbind_children(key_of(pool), HandleType::CommandBuffer);
        }
        self.unbind("destroy_command_pool", pool);
    }

    unsafe fn reset_command_pool(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::CommandPool,
        flags: vk::CommandPoolResetFlags,
    ) -> VkResult<()> {
        unsafe { next.reset_command_pool(self.live(device), self.live(pool), flags) }
    }

    unsafe fn allocate_command_buffers(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> VkResult<Vec<vk::CommandBuffer>> {
        let mut info = *allocate_info;
        info.command_pool = self.live(allocate_info.command_pool);
        let live = unsafe { next.allocate_command_buffers(self.live(device), &info) }?;
        let parent = Some(key_of(allocate_info.command_pool));
        Ok(live
            .into_iter()
            .map(|cb| self.bind_output("allocate_command_buffers", cb, parent))
            .collect())
    }

    unsafe fn free_command_buffers(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        pool: vk::CommandPool,
        command_buffers: &[vk::CommandBuffer],
    ) {
        let live = self.live_all(command_buffers);
        unsafe { next.free_command_buffers(self.live(device), self.live(pool), &live) };
        for &buffer in command_buffers {
            self.unbind("free_command_buffers", buffer);
        }
    }

    unsafe fn begin_command_buffer(
        &self,
        next: &dyn Dispatch,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> VkResult<()> {
        let mut info = *begin_info;
        let inheritance = if begin_info.p_inheritance_info.is_null() {
            None
        } else {
            let mut inheritance = unsafe { *begin_info.p_inheritance_info };
            inheritance.render_pass = self.live(inheritance.render_pass);
            inheritance.framebuffer = self.live(inheritance.framebuffer);
            Some(inheritance)
        };
        if let Some(inheritance) = &inheritance {
            info.p_inheritance_info = inheritance;
        }
        unsafe { next.begin_command_buffer(self.live(command_buffer), &info) }
    }

    unsafe fn end_command_buffer(
        &self,
        next: &dyn Dispatch,
        command_buffer: vk::CommandBuffer,
    ) -> VkResult<()> {
        unsafe { next.end_command_buffer(self.live(command_buffer)) }
    }

    // ── Synchronization ─────────────────────────────────────

    unsafe fn wait_for_fences(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        let live = self.live_all(fences);
        unsafe { next.wait_for_fences(self.live(device), &live, wait_all, timeout) }
    }

    unsafe fn reset_fences(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        fences: &[vk::Fence],
    ) -> VkResult<()> {
        let live = self.live_all(fences);
        unsafe { next.reset_fences(self.live(device), &live) }
    }

    // ── Swapchain ───────────────────────────────────────────

    unsafe fn create_swapchain(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) -> VkResult<vk::SwapchainKHR> {
        let mut info = *create_info;
        info.surface = self.live(create_info.surface);
        info.old_swapchain = self.live(create_info.old_swapchain);
        let live = unsafe { next.create_swapchain(self.live(device), &info, allocator) }?;
        Ok(self.bind_output("create_swapchain", live, Some(key_of(device))))
    }

    unsafe fn destroy_swapchain(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        allocator: Option<&vk::AllocationCallbacks<'_>>,
    ) {
        unsafe { next.destroy_swapchain(self.live(device), self.live(swapchain), allocator) };
        if swapchain != vk::SwapchainKHR::null() {
            self.unbind_children(key_of(swapchain), HandleType::Image);
        }
        self.unbind("destroy_swapchain", swapchain);
    }

    unsafe fn get_swapchain_images(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
    ) -> VkResult<Vec<vk::Image>> {
        let live = unsafe { next.get_swapchain_images(self.live(device), self.live(swapchain)) }?;
        let parent = Some(key_of(swapchain));
        Ok(live
            .into_iter()
            .map(|image| self.bind_queried("get_swapchain_images", image, parent))
            .collect())
    }

    unsafe fn acquire_next_image(
        &self,
        next: &dyn Dispatch,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            next.acquire_next_image(
                self.live(device),
                self.live(swapchain),
                timeout,
                self.live(semaphore),
                self.live(fence),
            )
        }
    }

    unsafe fn queue_present(
        &self,
        next: &dyn Dispatch,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> VkResult<bool> {
        let waits = self.live_all(unsafe {
            raw_slice(
                present_info.p_wait_semaphores,
                present_info.wait_semaphore_count as usize,
            )
        });
        let swapchains = self.live_all(unsafe {
            raw_slice(present_info.p_swapchains, present_info.swapchain_count as usize)
        });
        let mut info = *present_info;
        info.p_wait_semaphores = rebased(&waits, present_info.p_wait_semaphores);
        info.p_swapchains = rebased(&swapchains, present_info.p_swapchains);
        unsafe { next.queue_present(self.live(queue), &info) }
    }
}

impl HandleRemapper {
    fn live_stage<'a>(
        &self,
        stage: &vk::PipelineShaderStageCreateInfo<'a>,
    ) -> vk::PipelineShaderStageCreateInfo<'a> {
        let mut live = *stage;
        live.module = self.live(stage.module);
        live
    }
}

/// Which array of a descriptor write carries the handles.
enum Payload {
    Image,
    Buffer,
    TexelBuffer,
    Other,
}

fn descriptor_payload(ty: vk::DescriptorType) -> Payload {
    match ty {
        vk::DescriptorType::SAMPLER
        | vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        | vk::DescriptorType::SAMPLED_IMAGE
        | vk::DescriptorType::STORAGE_IMAGE
        | vk::DescriptorType::INPUT_ATTACHMENT => Payload::Image,
        vk::DescriptorType::UNIFORM_BUFFER
        | vk::DescriptorType::STORAGE_BUFFER
        | vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        | vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Payload::Buffer,
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER | vk::DescriptorType::STORAGE_TEXEL_BUFFER => {
            Payload::TexelBuffer
        }
        _ => Payload::Other,
    }
}

/// Point a struct field at a translated copy of its array, keeping the
/// original pointer when the array is empty.
fn rebased<T>(translated: &[T], original: *const T) -> *const T {
    if translated.is_empty() {
        original
    } else {
        translated.as_ptr()
    }
}
