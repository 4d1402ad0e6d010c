//! In-memory [`GpuBackend`] that records every verb it receives.
//!
//! Handles are fabricated from a counter, host and device buffers are both
//! backed by byte vectors (copies execute when recorded), and fences follow
//! the Vulkan rules closely enough to catch scheduling bugs: submitting with
//! a pending or signaled fence panics, and so does waiting on a fence that
//! nothing will ever signal. Destroying an object twice, or one that was
//! never created, also panics.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
};

use ash::vk::{self, Handle};

use super::{
    AcquiredImage, BarrierMasks, DescriptorBinding, GpuBackend, GpuBuffer, GpuError, GpuImage,
    GraphicsPipeline, GraphicsPipelineDesc, ImageDesc, ImageDescriptorWrite, MemoryLocation,
    RenderingDesc, SubmitDesc, SwapchainImage,
};

const SWAPCHAIN_IMAGE_COUNT: usize = 3;
const DEVICE_ADDRESS_BASE: u64 = 0x1_0000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Image,
    Sampler,
    DescriptorSetLayout,
    DescriptorPool,
    Pipeline,
    Fence,
    Semaphore,
    CommandPool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateBuffer {
        buffer: vk::Buffer,
        name: String,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    },
    WriteBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        len: usize,
    },
    DestroyBuffer(vk::Buffer),
    CreateImage {
        image: vk::Image,
        name: String,
        format: vk::Format,
    },
    DestroyImage(vk::Image),
    CreateSampler(vk::Sampler),
    DestroySampler(vk::Sampler),
    CreateDescriptorSetLayout(vk::DescriptorSetLayout),
    DestroyDescriptorSetLayout(vk::DescriptorSetLayout),
    CreateDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorPool(vk::DescriptorPool),
    AllocateDescriptorSet(vk::DescriptorSet),
    WriteImageDescriptor {
        set: vk::DescriptorSet,
        array_element: u32,
        view: vk::ImageView,
    },
    CreatePipeline {
        pipeline: vk::Pipeline,
        name: String,
    },
    DestroyPipeline(vk::Pipeline),
    CreateFence {
        fence: vk::Fence,
        signaled: bool,
    },
    DestroyFence(vk::Fence),
    WaitForFence(vk::Fence),
    ResetFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateCommandPool(vk::CommandPool),
    DestroyCommandPool(vk::CommandPool),
    AllocateCommandBuffer(vk::CommandBuffer),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: Option<vk::Semaphore>,
        signal: Option<vk::Semaphore>,
        fence: vk::Fence,
    },
    Acquire {
        image_index: u32,
        signal: vk::Semaphore,
    },
    Present {
        image_index: u32,
        wait: vk::Semaphore,
    },
    WaitIdle,
    TransitionImage {
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        masks: BarrierMasks,
    },
    CopyBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
    },
    BeginRendering {
        cmd: vk::CommandBuffer,
        color_views: Vec<vk::ImageView>,
        depth_view: Option<vk::ImageView>,
    },
    EndRendering(vk::CommandBuffer),
    BindPipeline {
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    },
    BindDescriptorSet {
        cmd: vk::CommandBuffer,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    PushConstants {
        cmd: vk::CommandBuffer,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: Vec<u8>,
    },
    SetViewportAndScissor {
        cmd: vk::CommandBuffer,
        extent: vk::Extent2D,
    },
    BindVertexBuffer {
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
    },
    BindIndexBuffer {
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
    },
    Draw {
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
    },
}

#[derive(Debug, Default, Clone, Copy)]
struct FenceState {
    signaled: bool,
    pending: bool,
}

pub struct RecordingBackend {
    next_handle: Cell<u64>,
    events: RefCell<Vec<Event>>,
    live: RefCell<HashMap<u64, ResourceKind>>,
    created: RefCell<HashMap<ResourceKind, usize>>,
    destroyed: RefCell<HashMap<ResourceKind, usize>>,
    memory: RefCell<HashMap<vk::Buffer, (MemoryLocation, Vec<u8>)>>,
    fences: RefCell<HashMap<vk::Fence, FenceState>>,
    max_in_flight: Cell<usize>,
    swapchain_images: Vec<SwapchainImage>,
    swapchain_extent: vk::Extent2D,
    next_image: Cell<u32>,
    scripted_acquires: RefCell<VecDeque<Result<AcquiredImage, vk::Result>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::with_extent(vk::Extent2D {
            width: 800,
            height: 600,
        })
    }

    pub fn with_extent(swapchain_extent: vk::Extent2D) -> Self {
        let mut backend = Self {
            next_handle: Cell::new(1),
            events: RefCell::new(Vec::new()),
            live: RefCell::new(HashMap::new()),
            created: RefCell::new(HashMap::new()),
            destroyed: RefCell::new(HashMap::new()),
            memory: RefCell::new(HashMap::new()),
            fences: RefCell::new(HashMap::new()),
            max_in_flight: Cell::new(0),
            swapchain_images: Vec::new(),
            swapchain_extent,
            next_image: Cell::new(0),
            scripted_acquires: RefCell::new(VecDeque::new()),
        };

        backend.swapchain_images = (0..SWAPCHAIN_IMAGE_COUNT)
            .map(|_| SwapchainImage {
                image: vk::Image::from_raw(backend.fresh_raw()),
                view: vk::ImageView::from_raw(backend.fresh_raw()),
            })
            .collect();

        backend
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    /// Makes the next `acquire_next_image` calls return these results in order.
    pub fn script_acquire(&self, result: Result<AcquiredImage, vk::Result>) {
        self.scripted_acquires.borrow_mut().push_back(result);
    }

    /// Bytes currently held by a buffer.
    pub fn read_buffer(&self, buffer: vk::Buffer) -> Vec<u8> {
        self.memory
            .borrow()
            .get(&buffer)
            .map(|(_, bytes)| bytes.clone())
            .unwrap_or_else(|| panic!("read of unknown buffer {buffer:?}"))
    }

    pub fn created(&self, kind: ResourceKind) -> usize {
        self.created.borrow().get(&kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: ResourceKind) -> usize {
        self.destroyed.borrow().get(&kind).copied().unwrap_or(0)
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Highest number of submissions whose fence had not yet been waited on.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.get()
    }

    pub fn assert_all_released(&self) {
        let live = self.live.borrow();
        assert!(live.is_empty(), "leaked GPU objects: {:?}", live.values());
    }

    fn fresh_raw(&self) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        raw
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn track<H: Handle>(&self, kind: ResourceKind) -> H {
        let raw = self.fresh_raw();
        self.live.borrow_mut().insert(raw, kind);
        *self.created.borrow_mut().entry(kind).or_default() += 1;
        H::from_raw(raw)
    }

    fn untrack<H: Handle + std::fmt::Debug + Copy>(&self, handle: H, kind: ResourceKind) {
        match self.live.borrow_mut().remove(&handle.as_raw()) {
            Some(found) if found == kind => {}
            Some(found) => panic!("destroying {handle:?} as {kind:?}, but it is a {found:?}"),
            None => panic!("double destroy or unknown {kind:?} {handle:?}"),
        }
        *self.destroyed.borrow_mut().entry(kind).or_default() += 1;
    }

    fn pending_fences(&self) -> usize {
        self.fences.borrow().values().filter(|f| f.pending).count()
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for RecordingBackend {
    fn create_buffer(
        &self,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<GpuBuffer, GpuError> {
        if size == 0 {
            return Err(GpuError::CreateBufferFailed {
                name: name.to_string(),
                source: vk::Result::ERROR_VALIDATION_FAILED_EXT,
            });
        }

        let handle: vk::Buffer = self.track(ResourceKind::Buffer);
        self.memory
            .borrow_mut()
            .insert(handle, (location, vec![0; size as usize]));

        let device_address = usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS)
            .then(|| DEVICE_ADDRESS_BASE + handle.as_raw() * 0x1000);

        self.record(Event::CreateBuffer {
            buffer: handle,
            name: name.to_string(),
            size,
            usage,
        });

        Ok(GpuBuffer {
            handle,
            size,
            usage,
            location,
            device_address,
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let mut memory = self.memory.borrow_mut();
        let (location, bytes) = memory
            .get_mut(&buffer.handle)
            .unwrap_or_else(|| panic!("write to unknown buffer {:?}", buffer.handle));

        if *location == MemoryLocation::GpuOnly {
            return Err(GpuError::BufferNotMapped(buffer.handle));
        }

        let start = offset as usize;
        let end = start + data.len();
        if end > bytes.len() {
            return Err(GpuError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size: buffer.size,
            });
        }
        bytes[start..end].copy_from_slice(data);
        drop(memory);

        self.record(Event::WriteBuffer {
            buffer: buffer.handle,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        self.untrack(buffer.handle, ResourceKind::Buffer);
        self.memory.borrow_mut().remove(&buffer.handle);
        self.record(Event::DestroyBuffer(buffer.handle));
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> Result<GpuImage, GpuError> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(GpuError::CreateImageFailed {
                name: desc.name.to_string(),
                source: vk::Result::ERROR_VALIDATION_FAILED_EXT,
            });
        }

        let handle: vk::Image = self.track(ResourceKind::Image);
        let view = vk::ImageView::from_raw(self.fresh_raw());
        self.record(Event::CreateImage {
            image: handle,
            name: desc.name.to_string(),
            format: desc.format,
        });

        Ok(GpuImage {
            handle,
            view,
            format: desc.format,
            extent: desc.extent,
            aspect: desc.aspect,
        })
    }

    fn destroy_image(&self, image: GpuImage) {
        self.untrack(image.handle, ResourceKind::Image);
        self.record(Event::DestroyImage(image.handle));
    }

    fn create_sampler(&self, _filter: vk::Filter) -> Result<vk::Sampler, GpuError> {
        let sampler = self.track(ResourceKind::Sampler);
        self.record(Event::CreateSampler(sampler));
        Ok(sampler)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.untrack(sampler, ResourceKind::Sampler);
        self.record(Event::DestroySampler(sampler));
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[DescriptorBinding],
    ) -> Result<vk::DescriptorSetLayout, GpuError> {
        let layout = self.track(ResourceKind::DescriptorSetLayout);
        self.record(Event::CreateDescriptorSetLayout(layout));
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.untrack(layout, ResourceKind::DescriptorSetLayout);
        self.record(Event::DestroyDescriptorSetLayout(layout));
    }

    fn create_descriptor_pool(
        &self,
        _sizes: &[vk::DescriptorPoolSize],
        _max_sets: u32,
        _update_after_bind: bool,
    ) -> Result<vk::DescriptorPool, GpuError> {
        let pool = self.track(ResourceKind::DescriptorPool);
        self.record(Event::CreateDescriptorPool(pool));
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.untrack(pool, ResourceKind::DescriptorPool);
        self.record(Event::DestroyDescriptorPool(pool));
    }

    fn allocate_descriptor_set(
        &self,
        _pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, GpuError> {
        // Sets are freed with their pool.
        let set = vk::DescriptorSet::from_raw(self.fresh_raw());
        self.record(Event::AllocateDescriptorSet(set));
        Ok(set)
    }

    fn write_image_descriptor(&self, write: &ImageDescriptorWrite) {
        self.record(Event::WriteImageDescriptor {
            set: write.set,
            array_element: write.array_element,
            view: write.view,
        });
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<GraphicsPipeline, GpuError> {
        if desc.vertex_spirv.is_empty() || desc.fragment_spirv.is_empty() {
            return Err(GpuError::ShaderModuleCreationFailed {
                name: desc.name.to_string(),
                source: vk::Result::ERROR_INVALID_SHADER_NV,
            });
        }

        let pipeline: vk::Pipeline = self.track(ResourceKind::Pipeline);
        let layout = vk::PipelineLayout::from_raw(self.fresh_raw());
        self.record(Event::CreatePipeline {
            pipeline,
            name: desc.name.to_string(),
        });
        Ok(GraphicsPipeline { pipeline, layout })
    }

    fn destroy_graphics_pipeline(&self, pipeline: GraphicsPipeline) {
        self.untrack(pipeline.pipeline, ResourceKind::Pipeline);
        self.record(Event::DestroyPipeline(pipeline.pipeline));
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let fence = self.track(ResourceKind::Fence);
        self.fences.borrow_mut().insert(
            fence,
            FenceState {
                signaled,
                pending: false,
            },
        );
        self.record(Event::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.untrack(fence, ResourceKind::Fence);
        self.fences.borrow_mut().remove(&fence);
        self.record(Event::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        let mut fences = self.fences.borrow_mut();
        let state = fences
            .get_mut(&fence)
            .unwrap_or_else(|| panic!("wait on unknown fence {fence:?}"));

        if state.pending {
            // The simulated GPU finishes whatever was submitted the moment
            // someone waits for it.
            state.pending = false;
            state.signaled = true;
        } else if !state.signaled {
            panic!("waiting on fence {fence:?} that nothing will signal");
        }
        drop(fences);

        self.record(Event::WaitForFence(fence));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        let mut fences = self.fences.borrow_mut();
        let state = fences
            .get_mut(&fence)
            .unwrap_or_else(|| panic!("reset of unknown fence {fence:?}"));
        assert!(!state.pending, "resetting fence {fence:?} still in use");
        state.signaled = false;
        drop(fences);

        self.record(Event::ResetFence(fence));
        Ok(())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        let semaphore = self.track(ResourceKind::Semaphore);
        self.record(Event::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.untrack(semaphore, ResourceKind::Semaphore);
        self.record(Event::DestroySemaphore(semaphore));
    }

    fn create_command_pool(&self) -> Result<vk::CommandPool, GpuError> {
        let pool = self.track(ResourceKind::CommandPool);
        self.record(Event::CreateCommandPool(pool));
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.untrack(pool, ResourceKind::CommandPool);
        self.record(Event::DestroyCommandPool(pool));
    }

    fn allocate_command_buffer(
        &self,
        _pool: vk::CommandPool,
    ) -> Result<vk::CommandBuffer, GpuError> {
        let cmd = vk::CommandBuffer::from_raw(self.fresh_raw());
        self.record(Event::AllocateCommandBuffer(cmd));
        Ok(cmd)
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        self.record(Event::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _one_time_submit: bool,
    ) -> Result<(), GpuError> {
        self.record(Event::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), GpuError> {
        self.record(Event::EndCommandBuffer(cmd));
        Ok(())
    }

    fn submit(&self, submit: &SubmitDesc) -> Result<(), GpuError> {
        {
            let mut fences = self.fences.borrow_mut();
            let state = fences
                .get_mut(&submit.fence)
                .unwrap_or_else(|| panic!("submit with unknown fence {:?}", submit.fence));
            assert!(
                !state.pending && !state.signaled,
                "submit with fence {:?} that is not reset",
                submit.fence
            );
            state.pending = true;
        }

        let in_flight = self.pending_fences();
        if in_flight > self.max_in_flight.get() {
            self.max_in_flight.set(in_flight);
        }

        self.record(Event::Submit {
            command_buffer: submit.command_buffer,
            wait: submit.wait.map(|(semaphore, _)| semaphore),
            signal: submit.signal,
            fence: submit.fence,
        });
        Ok(())
    }

    fn acquire_next_image(&self, signal: vk::Semaphore) -> Result<AcquiredImage, GpuError> {
        let acquired = match self.scripted_acquires.borrow_mut().pop_front() {
            Some(scripted) => scripted.map_err(GpuError::AcquireImageFailed)?,
            None => {
                let index = self.next_image.get();
                self.next_image
                    .set((index + 1) % self.swapchain_images.len() as u32);
                AcquiredImage {
                    index,
                    suboptimal: false,
                }
            }
        };

        self.record(Event::Acquire {
            image_index: acquired.index,
            signal,
        });
        Ok(acquired)
    }

    fn present(&self, image_index: u32, wait: vk::Semaphore) -> Result<bool, GpuError> {
        self.record(Event::Present { image_index, wait });
        Ok(false)
    }

    fn swapchain_images(&self) -> &[SwapchainImage] {
        &self.swapchain_images
    }

    fn swapchain_format(&self) -> vk::Format {
        vk::Format::B8G8R8A8_SRGB
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        for state in self.fences.borrow_mut().values_mut() {
            if state.pending {
                state.pending = false;
                state.signaled = true;
            }
        }
        self.record(Event::WaitIdle);
        Ok(())
    }

    fn cmd_transition_image(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        _aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) {
        self.record(Event::TransitionImage {
            cmd,
            image,
            old_layout,
            new_layout,
            masks: BarrierMasks::for_transition(old_layout, new_layout),
        });
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: vk::DeviceSize,
    ) {
        {
            let mut memory = self.memory.borrow_mut();
            let bytes = memory
                .get(&src.handle)
                .map(|(_, bytes)| bytes[..size as usize].to_vec())
                .unwrap_or_else(|| panic!("copy from unknown buffer {:?}", src.handle));
            let (_, target) = memory
                .get_mut(&dst.handle)
                .unwrap_or_else(|| panic!("copy into unknown buffer {:?}", dst.handle));
            target[..size as usize].copy_from_slice(&bytes);
        }

        self.record(Event::CopyBuffer {
            cmd,
            src: src.handle,
            dst: dst.handle,
            size,
        });
    }

    fn cmd_copy_buffer_to_image(&self, cmd: vk::CommandBuffer, src: &GpuBuffer, dst: &GpuImage) {
        self.record(Event::CopyBufferToImage {
            cmd,
            src: src.handle,
            dst: dst.handle,
        });
    }

    fn cmd_begin_rendering(&self, cmd: vk::CommandBuffer, rendering: &RenderingDesc<'_>) {
        self.record(Event::BeginRendering {
            cmd,
            color_views: rendering
                .color_attachments
                .iter()
                .map(|attachment| attachment.view)
                .collect(),
            depth_view: rendering.depth_attachment.map(|depth| depth.view),
        });
    }

    fn cmd_end_rendering(&self, cmd: vk::CommandBuffer) {
        self.record(Event::EndRendering(cmd));
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: &GraphicsPipeline) {
        self.record(Event::BindPipeline {
            cmd,
            pipeline: pipeline.pipeline,
        });
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        self.record(Event::BindDescriptorSet {
            cmd,
            set_index,
            set,
        });
    }

    fn cmd_push_constants(
        &self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.record(Event::PushConstants {
            cmd,
            stages,
            offset,
            data: data.to_vec(),
        });
    }

    fn cmd_set_viewport_and_scissor(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(Event::SetViewportAndScissor { cmd, extent });
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) {
        self.record(Event::BindVertexBuffer {
            cmd,
            buffer: buffer.handle,
        });
    }

    fn cmd_bind_index_buffer(&self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) {
        self.record(Event::BindIndexBuffer {
            cmd,
            buffer: buffer.handle,
        });
    }

    fn cmd_draw(&self, cmd: vk::CommandBuffer, vertex_count: u32, instance_count: u32) {
        self.record(Event::Draw {
            cmd,
            vertex_count,
            instance_count,
        });
    }

    fn cmd_draw_indexed(&self, cmd: vk::CommandBuffer, index_count: u32, instance_count: u32) {
        self.record(Event::DrawIndexed {
            cmd,
            index_count,
            instance_count,
        });
    }
}
