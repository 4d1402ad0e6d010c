use std::ops::Deref;

use ash::vk;
use thiserror::Error;

use crate::{
    backend::{GpuBackend, GpuBuffer, GpuError, GpuImage, ImageDesc, MemoryLocation, SubmitDesc},
    config::ContextConfig,
    deletion_queue::DeletionQueue,
    frame::{FRAMES_IN_FLIGHT, FrameSlot},
};

#[derive(Debug, Error)]
pub enum DeviceContextError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error("Refusing to upload `{0}`: no data")]
    EmptyUpload(String),
}

struct ImmediateSubmit {
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

/// Everything needed to issue GPU work and present.
///
/// Owns the backend (device, swapchain, allocator), the depth target, one
/// [`FrameSlot`] per frame in flight, the command pool and the blocking
/// immediate-submit path. Every object created here registers its
/// destruction in the deletion queue at creation time; [`Self::cleanup`]
/// replays it once the device is idle.
pub struct DeviceContext<B: GpuBackend> {
    deletion_queue: DeletionQueue<B>,
    frames: [FrameSlot; FRAMES_IN_FLIGHT],
    command_pool: vk::CommandPool,
    immediate: ImmediateSubmit,
    depth_image: GpuImage,
    backend: B,
}

impl<B: GpuBackend> DeviceContext<B> {
    pub fn new(backend: B, config: &ContextConfig) -> Result<Self, DeviceContextError> {
        let mut deletion_queue = DeletionQueue::new();

        match Self::create_resources(&backend, config, &mut deletion_queue) {
            Ok((depth_image, frames, command_pool, immediate)) => {
                log::info!(
                    "Device context ready: {} frames in flight, {} swapchain images, {}x{}",
                    FRAMES_IN_FLIGHT,
                    backend.swapchain_images().len(),
                    backend.swapchain_extent().width,
                    backend.swapchain_extent().height
                );
                Ok(Self {
                    deletion_queue,
                    frames,
                    command_pool,
                    immediate,
                    depth_image,
                    backend,
                })
            }
            Err(e) => {
                log::error!("Device context initialisation failed: {e}");
                deletion_queue.flush(&backend);
                Err(e.into())
            }
        }
    }

    fn create_resources(
        backend: &B,
        config: &ContextConfig,
        deletion_queue: &mut DeletionQueue<B>,
    ) -> Result<
        (
            GpuImage,
            [FrameSlot; FRAMES_IN_FLIGHT],
            vk::CommandPool,
            ImmediateSubmit,
        ),
        GpuError,
    > {
        let depth_image = backend.create_image(&ImageDesc {
            name: "depth",
            format: config.depth_format,
            extent: backend.swapchain_extent(),
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        })?;
        deletion_queue.push(move |b: &B| b.destroy_image(depth_image));

        let mut sync = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for _ in 0..FRAMES_IN_FLIGHT {
            let image_available = backend.create_semaphore()?;
            deletion_queue.push(move |b: &B| b.destroy_semaphore(image_available));
            let render_finished = backend.create_semaphore()?;
            deletion_queue.push(move |b: &B| b.destroy_semaphore(render_finished));
            // Signaled so the first wait on every slot returns immediately.
            let render_fence = backend.create_fence(true)?;
            deletion_queue.push(move |b: &B| b.destroy_fence(render_fence));
            sync.push((image_available, render_finished, render_fence));
        }

        let command_pool = backend.create_command_pool()?;
        deletion_queue.push(move |b: &B| b.destroy_command_pool(command_pool));

        let mut frames = [FrameSlot::default(); FRAMES_IN_FLIGHT];
        for (frame, (image_available, render_finished, render_fence)) in
            frames.iter_mut().zip(sync)
        {
            *frame = FrameSlot {
                command_buffer: backend.allocate_command_buffer(command_pool)?,
                image_available,
                render_finished,
                render_fence,
            };
        }

        let immediate_pool = backend.create_command_pool()?;
        deletion_queue.push(move |b: &B| b.destroy_command_pool(immediate_pool));
        let immediate_fence = backend.create_fence(false)?;
        deletion_queue.push(move |b: &B| b.destroy_fence(immediate_fence));
        let immediate = ImmediateSubmit {
            command_buffer: backend.allocate_command_buffer(immediate_pool)?,
            fence: immediate_fence,
        };

        Ok((depth_image, frames, command_pool, immediate))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn frame(&self, index: usize) -> &FrameSlot {
        &self.frames[index]
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    pub fn depth_image(&self) -> GpuImage {
        self.depth_image
    }

    /// Records `record` into a one-shot command buffer, submits it and blocks
    /// until the GPU has finished. Load-time only.
    pub fn immediate_submit<F>(&self, record: F) -> Result<(), GpuError>
    where
        F: FnOnce(&B, vk::CommandBuffer),
    {
        let cmd = self.immediate.command_buffer;

        self.backend.reset_command_buffer(cmd)?;
        self.backend.begin_command_buffer(cmd, true)?;
        record(&self.backend, cmd);
        self.backend.end_command_buffer(cmd)?;

        self.backend.submit(&SubmitDesc {
            command_buffer: cmd,
            wait: None,
            signal: None,
            fence: self.immediate.fence,
        })?;
        self.backend.wait_for_fence(self.immediate.fence)?;
        self.backend.reset_fence(self.immediate.fence)
    }

    /// Copies `bytes` into a new device-local buffer through a staging buffer.
    /// The caller owns the returned buffer.
    pub fn upload_buffer(
        &self,
        name: &str,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> Result<GpuBuffer, DeviceContextError> {
        if bytes.is_empty() {
            return Err(DeviceContextError::EmptyUpload(name.to_string()));
        }
        let size = bytes.len() as vk::DeviceSize;

        let staging = self.backend.create_buffer(
            &format!("{name} (staging)"),
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let uploaded = self.backend.write_buffer(&staging, 0, bytes).and_then(|_| {
            let buffer = self.backend.create_buffer(
                name,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
            )?;
            match self.immediate_submit(|b, cmd| b.cmd_copy_buffer(cmd, &staging, &buffer, size)) {
                Ok(()) => Ok(buffer),
                Err(e) => {
                    self.backend.destroy_buffer(buffer);
                    Err(e)
                }
            }
        });

        self.backend.destroy_buffer(staging);
        Ok(uploaded?)
    }

    /// Creates a sampled image from tightly packed pixels and leaves it in
    /// `SHADER_READ_ONLY_OPTIMAL`. The caller owns the returned image.
    pub fn upload_image(
        &self,
        desc: &ImageDesc<'_>,
        pixels: &[u8],
    ) -> Result<GpuImage, DeviceContextError> {
        if pixels.is_empty() {
            return Err(DeviceContextError::EmptyUpload(desc.name.to_string()));
        }

        let staging = self.backend.create_buffer(
            &format!("{} (staging)", desc.name),
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let uploaded = self.backend.write_buffer(&staging, 0, pixels).and_then(|_| {
            let image = self.backend.create_image(&ImageDesc {
                usage: desc.usage | vk::ImageUsageFlags::TRANSFER_DST,
                ..*desc
            })?;
            let copied = self.immediate_submit(|b, cmd| {
                b.cmd_transition_image(
                    cmd,
                    image.handle,
                    image.aspect,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                b.cmd_copy_buffer_to_image(cmd, &staging, &image);
                b.cmd_transition_image(
                    cmd,
                    image.handle,
                    image.aspect,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            });
            match copied {
                Ok(()) => Ok(image),
                Err(e) => {
                    self.backend.destroy_image(image);
                    Err(e)
                }
            }
        });

        self.backend.destroy_buffer(staging);
        Ok(uploaded?)
    }

    /// Registers a teardown action to run during [`Self::cleanup`], after
    /// everything registered later.
    pub fn defer_destroy(&mut self, deletor: impl FnOnce(&B) + 'static) {
        self.deletion_queue.push(deletor);
    }

    /// Waits for the device to go idle, then releases every object this
    /// context created, newest first. Safe to call more than once.
    pub fn cleanup(&mut self) -> Result<(), GpuError> {
        if self.deletion_queue.is_empty() {
            return Ok(());
        }
        self.backend.wait_idle()?;
        self.deletion_queue.flush(&self.backend);
        log::info!("Device context cleaned up");
        Ok(())
    }
}

impl<B: GpuBackend> Deref for DeviceContext<B> {
    type Target = B;

    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl<B: GpuBackend> Drop for DeviceContext<B> {
    fn drop(&mut self) {
        if !self.deletion_queue.is_empty() {
            log::warn!("Device context dropped without cleanup; cleaning up now");
            if let Err(e) = self.cleanup() {
                log::error!("Cleanup during drop failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Event, RecordingBackend, ResourceKind};

    fn context() -> DeviceContext<RecordingBackend> {
        DeviceContext::new(RecordingBackend::new(), &ContextConfig::default()).unwrap()
    }

    #[test]
    fn creates_one_sync_set_per_frame_in_flight() {
        let ctx = context();

        assert_eq!(ctx.created(ResourceKind::Semaphore), 2 * FRAMES_IN_FLIGHT);
        assert_eq!(ctx.created(ResourceKind::Fence), FRAMES_IN_FLIGHT + 1);
        assert_eq!(ctx.created(ResourceKind::CommandPool), 2);
        assert_eq!(ctx.created(ResourceKind::Image), 1);
        assert_ne!(ctx.frame(0).render_fence, ctx.frame(1).render_fence);
        assert_ne!(ctx.frame(0).command_buffer, ctx.frame(1).command_buffer);
    }

    #[test]
    fn cleanup_releases_everything_exactly_once() {
        let mut ctx = context();
        let extra = ctx.create_sampler(vk::Filter::LINEAR).unwrap();
        ctx.defer_destroy(move |b| b.destroy_sampler(extra));

        ctx.cleanup().unwrap();
        ctx.cleanup().unwrap();

        ctx.assert_all_released();
        assert_eq!(ctx.destroyed(ResourceKind::Sampler), 1);
        assert_eq!(ctx.destroyed(ResourceKind::Fence), FRAMES_IN_FLIGHT + 1);

        let events = ctx.events();
        let wait_idle = events.iter().position(|e| *e == Event::WaitIdle).unwrap();
        let first_destroy = events
            .iter()
            .position(|e| matches!(e, Event::DestroySampler(_)))
            .unwrap();
        assert!(wait_idle < first_destroy);
        // Newest first: the sampler was registered last.
        assert!(matches!(
            events[wait_idle + 1..].first(),
            Some(Event::DestroySampler(_))
        ));
    }

    #[test]
    fn immediate_submit_blocks_until_the_fence_signals() {
        let mut ctx = context();
        ctx.clear_events();

        ctx.immediate_submit(|_, _| {}).unwrap();

        let events = ctx.events();
        let submit = events
            .iter()
            .position(|e| matches!(e, Event::Submit { .. }))
            .unwrap();
        let Event::Submit { fence, .. } = &events[submit] else {
            unreachable!()
        };
        let fence = *fence;
        assert_eq!(events[submit + 1], Event::WaitForFence(fence));
        assert_eq!(events[submit + 2], Event::ResetFence(fence));

        // The fence is reusable right away.
        ctx.immediate_submit(|_, _| {}).unwrap();
        ctx.cleanup().unwrap();
    }

    #[test]
    fn upload_buffer_stages_and_frees_the_staging_copy() {
        let mut ctx = context();
        let data: Vec<u8> = (0..64).collect();

        let buffer = ctx
            .upload_buffer("vertices", vk::BufferUsageFlags::VERTEX_BUFFER, &data)
            .unwrap();

        assert_eq!(buffer.size, 64);
        assert_eq!(buffer.location, MemoryLocation::GpuOnly);
        assert!(buffer.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert_eq!(ctx.read_buffer(buffer.handle), data);
        assert_eq!(ctx.created(ResourceKind::Buffer), 2);
        assert_eq!(ctx.destroyed(ResourceKind::Buffer), 1);

        ctx.destroy_buffer(buffer);
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn upload_image_transitions_to_shader_read() {
        let mut ctx = context();
        ctx.clear_events();

        let image = ctx
            .upload_image(
                &ImageDesc {
                    name: "checker",
                    format: vk::Format::R8G8B8A8_UNORM,
                    extent: vk::Extent2D {
                        width: 2,
                        height: 2,
                    },
                    usage: vk::ImageUsageFlags::SAMPLED,
                    aspect: vk::ImageAspectFlags::COLOR,
                },
                &[255; 16],
            )
            .unwrap();

        let layouts: Vec<_> = ctx
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::TransitionImage {
                    image: target,
                    new_layout,
                    ..
                } if target == image.handle => Some(new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            ]
        );

        ctx.destroy_image(image);
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn empty_uploads_are_rejected() {
        let ctx = context();
        assert!(matches!(
            ctx.upload_buffer("nothing", vk::BufferUsageFlags::INDEX_BUFFER, &[]),
            Err(DeviceContextError::EmptyUpload(_))
        ));
    }
}
