use ash::vk;
use thiserror::Error;

use crate::{
    backend::{GpuBackend, GpuError, SubmitDesc},
    context::DeviceContext,
    renderer::{FrameContext, FrameInfo, Renderer},
};

/// Shared by the device context (one sync set per slot) and the scheduler.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Per-slot synchronisation and recording state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub render_fence: vk::Fence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    WaitForSlot,
    Update,
    AcquireImage,
    RecordCommands,
    Submit,
    Present,
    Advance,
}

#[derive(Debug, Error)]
#[error("Frame {frame_number} failed during {phase:?}: {source}")]
pub struct FrameError {
    pub phase: FramePhase,
    pub frame_number: u64,
    pub source: GpuError,
}

/// Round-robin over [`FRAMES_IN_FLIGHT`] slots.
///
/// The fence wait at the start of every frame is the only backpressure: the
/// CPU can run at most `FRAMES_IN_FLIGHT` frames ahead of the GPU.
#[derive(Debug)]
pub struct FrameScheduler {
    frame_index: usize,
    frame_number: u64,
    phase: FramePhase,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            frame_index: 0,
            frame_number: 0,
            phase: FramePhase::WaitForSlot,
        }
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Phase the scheduler is in, or stopped in after a failed frame.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    fn enter(&mut self, phase: FramePhase) {
        self.phase = phase;
        log::trace!("frame {} slot {}: {:?}", self.frame_number, self.frame_index, phase);
    }

    fn fail(&self, source: GpuError) -> FrameError {
        log::error!(
            "Frame {} failed during {:?}: {source}",
            self.frame_number,
            self.phase
        );
        FrameError {
            phase: self.phase,
            frame_number: self.frame_number,
            source,
        }
    }

    pub fn draw_frame<B, R>(
        &mut self,
        ctx: &DeviceContext<B>,
        renderer: &mut R,
    ) -> Result<(), FrameError>
    where
        B: GpuBackend,
        R: Renderer<B>,
    {
        let slot = *ctx.frame(self.frame_index);
        let backend = ctx.backend();

        self.enter(FramePhase::WaitForSlot);
        backend
            .wait_for_fence(slot.render_fence)
            .map_err(|e| self.fail(e))?;

        self.enter(FramePhase::Update);
        let extent = backend.swapchain_extent();
        renderer
            .prepare(
                backend,
                &FrameInfo {
                    frame_index: self.frame_index,
                    frame_number: self.frame_number,
                    extent,
                },
            )
            .map_err(|e| self.fail(e))?;

        self.enter(FramePhase::AcquireImage);
        let acquired = backend
            .acquire_next_image(slot.image_available)
            .map_err(|e| self.fail(e))?;
        // The fence stays signaled until the frame is certain to submit.
        backend
            .reset_fence(slot.render_fence)
            .map_err(|e| self.fail(e))?;
        if acquired.suboptimal {
            log::warn!("Swapchain suboptimal on acquire (frame {})", self.frame_number);
        }
        let swapchain_image = backend.swapchain_images()[acquired.index as usize];

        self.enter(FramePhase::RecordCommands);
        let cmd = slot.command_buffer;
        backend
            .reset_command_buffer(cmd)
            .and_then(|_| backend.begin_command_buffer(cmd, true))
            .map_err(|e| self.fail(e))?;

        backend.cmd_transition_image(
            cmd,
            swapchain_image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        renderer.render(
            backend,
            &FrameContext {
                command_buffer: cmd,
                frame_index: self.frame_index,
                frame_number: self.frame_number,
                image_index: acquired.index,
                swapchain_image,
                extent,
            },
        );
        backend.cmd_transition_image(
            cmd,
            swapchain_image.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        backend.end_command_buffer(cmd).map_err(|e| self.fail(e))?;

        self.enter(FramePhase::Submit);
        backend
            .submit(&SubmitDesc {
                command_buffer: cmd,
                wait: Some((
                    slot.image_available,
                    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                )),
                signal: Some(slot.render_finished),
                fence: slot.render_fence,
            })
            .map_err(|e| self.fail(e))?;

        self.enter(FramePhase::Present);
        let suboptimal = backend
            .present(acquired.index, slot.render_finished)
            .map_err(|e| self.fail(e))?;
        if suboptimal {
            log::warn!("Swapchain suboptimal on present (frame {})", self.frame_number);
        }

        self.enter(FramePhase::Advance);
        self.frame_index = (self.frame_index + 1) % FRAMES_IN_FLIGHT;
        self.frame_number += 1;

        self.enter(FramePhase::WaitForSlot);
        Ok(())
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        backend::{
            AcquiredImage, GpuBuffer, MemoryLocation,
            recording::{Event, RecordingBackend},
        },
        config::ContextConfig,
    };

    /// Writes one uniform buffer per slot, like a real renderer would.
    struct UniformWriter {
        buffers: Vec<GpuBuffer>,
        prepared: Vec<(usize, u64)>,
    }

    impl UniformWriter {
        fn new(backend: &RecordingBackend) -> Self {
            let buffers = (0..FRAMES_IN_FLIGHT)
                .map(|i| {
                    backend
                        .create_buffer(
                            &format!("uniforms {i}"),
                            16,
                            vk::BufferUsageFlags::UNIFORM_BUFFER,
                            MemoryLocation::CpuToGpu,
                        )
                        .unwrap()
                })
                .collect();
            Self {
                buffers,
                prepared: Vec::new(),
            }
        }
    }

    impl Renderer<RecordingBackend> for UniformWriter {
        fn prepare(&mut self, backend: &RecordingBackend, frame: &FrameInfo) -> Result<(), GpuError> {
            self.prepared.push((frame.frame_index, frame.frame_number));
            backend.write_buffer(
                &self.buffers[frame.frame_index],
                0,
                &frame.frame_number.to_le_bytes(),
            )
        }

        fn render(&self, backend: &RecordingBackend, frame: &FrameContext) {
            backend.cmd_draw(frame.command_buffer, 3, 1);
        }
    }

    fn setup() -> (DeviceContext<RecordingBackend>, UniformWriter) {
        let ctx = DeviceContext::new(RecordingBackend::new(), &ContextConfig::default()).unwrap();
        let writer = UniformWriter::new(&ctx);
        ctx.clear_events();
        (ctx, writer)
    }

    #[test]
    fn slot_fences_are_waited_every_other_frame() {
        let (mut ctx, mut writer) = setup();
        let mut scheduler = FrameScheduler::new();
        let slot0_fence = ctx.frame(0).render_fence;

        for iteration in 0..(2 * FRAMES_IN_FLIGHT + 1) {
            ctx.clear_events();
            scheduler.draw_frame(&ctx, &mut writer).unwrap();

            let waited_slot0 = ctx
                .events()
                .contains(&Event::WaitForFence(slot0_fence));
            assert_eq!(waited_slot0, iteration % 2 == 0, "iteration {iteration}");
        }

        assert!(ctx.max_in_flight() <= FRAMES_IN_FLIGHT);
        assert_eq!(scheduler.frame_number(), 5);
        assert_eq!(scheduler.frame_index(), 1);
        assert_eq!(
            writer.prepared,
            vec![(0, 0), (1, 1), (0, 2), (1, 3), (0, 4)]
        );

        for buffer in writer.buffers.drain(..) {
            ctx.destroy_buffer(buffer);
        }
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn uniform_writes_never_race_the_gpu() {
        let (mut ctx, mut writer) = setup();
        let mut scheduler = FrameScheduler::new();

        for _ in 0..7 {
            scheduler.draw_frame(&ctx, &mut writer).unwrap();
        }

        let fence_of_buffer: HashMap<_, _> = writer
            .buffers
            .iter()
            .enumerate()
            .map(|(slot, buffer)| (buffer.handle, ctx.frame(slot).render_fence))
            .collect();

        let mut pending = HashMap::new();
        for event in ctx.events() {
            match event {
                Event::Submit { fence, .. } => {
                    pending.insert(fence, true);
                }
                Event::WaitForFence(fence) => {
                    pending.insert(fence, false);
                }
                Event::WriteBuffer { buffer, .. } => {
                    let fence = fence_of_buffer[&buffer];
                    assert!(
                        !pending.get(&fence).copied().unwrap_or(false),
                        "uniform buffer written while its slot was in flight"
                    );
                }
                _ => {}
            }
        }

        for buffer in writer.buffers.drain(..) {
            ctx.destroy_buffer(buffer);
        }
        ctx.cleanup().unwrap();
    }

    #[test]
    fn records_between_swapchain_transitions_and_submits_with_slot_sync() {
        let (mut ctx, mut writer) = setup();
        let mut scheduler = FrameScheduler::new();

        scheduler.draw_frame(&ctx, &mut writer).unwrap();

        let slot = *ctx.frame(0);
        let events = ctx.events();
        let layouts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::TransitionImage { new_layout, .. } => Some(*new_layout),
                _ => None,
            })
            .collect();
        assert_eq!(
            layouts,
            vec![
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::PRESENT_SRC_KHR
            ]
        );

        let draw = events
            .iter()
            .position(|e| matches!(e, Event::Draw { .. }))
            .unwrap();
        let submit = events
            .iter()
            .position(|e| matches!(e, Event::Submit { .. }))
            .unwrap();
        assert!(draw < submit);
        assert_eq!(
            events[submit],
            Event::Submit {
                command_buffer: slot.command_buffer,
                wait: Some(slot.image_available),
                signal: Some(slot.render_finished),
                fence: slot.render_fence,
            }
        );
        assert_eq!(
            events[submit + 1],
            Event::Present {
                image_index: 0,
                wait: slot.render_finished,
            }
        );

        for buffer in writer.buffers.drain(..) {
            ctx.destroy_buffer(buffer);
        }
        ctx.cleanup().unwrap();
    }

    #[test]
    fn suboptimal_acquire_keeps_drawing() {
        let (mut ctx, mut writer) = setup();
        let mut scheduler = FrameScheduler::new();
        ctx.script_acquire(Ok(AcquiredImage {
            index: 2,
            suboptimal: true,
        }));

        scheduler.draw_frame(&ctx, &mut writer).unwrap();

        assert!(ctx.events().contains(&Event::Present {
            image_index: 2,
            wait: ctx.frame(0).render_finished,
        }));

        for buffer in writer.buffers.drain(..) {
            ctx.destroy_buffer(buffer);
        }
        ctx.cleanup().unwrap();
    }

    #[test]
    fn failed_acquire_leaves_the_slot_fence_signaled() {
        let (mut ctx, mut writer) = setup();
        let mut scheduler = FrameScheduler::new();
        let slot0_fence = ctx.frame(0).render_fence;
        ctx.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        scheduler.draw_frame(&ctx, &mut writer).unwrap_err();
        assert!(!ctx.events().contains(&Event::ResetFence(slot0_fence)));

        // The same slot is retried, then both slots cycle normally.
        for _ in 0..3 {
            scheduler.draw_frame(&ctx, &mut writer).unwrap();
        }
        assert_eq!(scheduler.frame_number(), 3);
        assert_eq!(
            writer.prepared,
            vec![(0, 0), (0, 0), (1, 1), (0, 2)]
        );

        for buffer in writer.buffers.drain(..) {
            ctx.destroy_buffer(buffer);
        }
        ctx.cleanup().unwrap();
        ctx.assert_all_released();
    }

    #[test]
    fn failed_acquire_is_reported_with_its_phase() {
        let (mut ctx, mut writer) = setup();
        let mut scheduler = FrameScheduler::new();
        ctx.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));

        let error = scheduler.draw_frame(&ctx, &mut writer).unwrap_err();

        assert_eq!(error.phase, FramePhase::AcquireImage);
        assert_eq!(error.frame_number, 0);
        assert!(matches!(
            error.source,
            GpuError::AcquireImageFailed(vk::Result::ERROR_OUT_OF_DATE_KHR)
        ));
        assert_eq!(error.source.vk_result(), Some(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(!ctx.events().iter().any(|e| matches!(e, Event::Submit { .. })));
        assert_eq!(scheduler.frame_number(), 0);

        for buffer in writer.buffers.drain(..) {
            ctx.destroy_buffer(buffer);
        }
        ctx.cleanup().unwrap();
    }
}
