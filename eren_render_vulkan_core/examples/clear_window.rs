use eren_render_vulkan_core::{
    backend::{ColorAttachment, GpuBackend, GpuError, RenderingDesc},
    config::ContextConfig,
    context::DeviceContext,
    frame::FrameScheduler,
    renderer::{FrameContext, FrameInfo, Renderer},
    vulkan::VulkanBackend,
};
use eren_window::{
    error::handle_fatal_error,
    window::{WindowConfig, WindowEventHandler, WindowLifecycleManager, WindowSize},
};
use winit::window::Window;

/// Clears the swapchain image to a colour that drifts with the frame number.
struct ClearRenderer;

impl<B: GpuBackend> Renderer<B> for ClearRenderer {
    fn prepare(&mut self, _backend: &B, _frame: &FrameInfo) -> Result<(), GpuError> {
        Ok(())
    }

    fn render(&self, backend: &B, frame: &FrameContext) {
        let t = (frame.frame_number % 240) as f32 / 240.0;
        backend.cmd_begin_rendering(
            frame.command_buffer,
            &RenderingDesc {
                extent: frame.extent,
                color_attachments: &[ColorAttachment {
                    view: frame.swapchain_image.view,
                    clear: Some([0.1, 0.2 + 0.3 * t, 0.3, 1.0]),
                }],
                depth_attachment: None,
            },
        );
        backend.cmd_end_rendering(frame.command_buffer);
    }
}

struct ClearWindow {
    context: Option<DeviceContext<VulkanBackend>>,
    scheduler: FrameScheduler,
    renderer: ClearRenderer,
}

impl ClearWindow {
    fn shutdown(&mut self) {
        if let Some(mut context) = self.context.take() {
            if let Err(e) = context.cleanup() {
                log::error!("Cleanup failed: {e}");
            }
        }
    }
}

impl WindowEventHandler for ClearWindow {
    fn on_window_ready(&mut self, window: &Window) {
        let config = ContextConfig::from_env().with_application_name("clear_window");
        let backend = VulkanBackend::new(window, &config)
            .unwrap_or_else(|e| handle_fatal_error(e, "Failed to initialise Vulkan"));
        let context = DeviceContext::new(backend, &config)
            .unwrap_or_else(|e| handle_fatal_error(e, "Failed to create device context"));
        self.context = Some(context);
    }

    fn on_window_lost(&mut self) {
        self.shutdown();
    }

    fn on_window_resized(&mut self, size: WindowSize) {
        log::debug!("Window resized to {}x{}", size.width, size.height);
    }

    fn redraw(&mut self) {
        if let Some(context) = &self.context {
            if let Err(e) = self.scheduler.draw_frame(context, &mut self.renderer) {
                handle_fatal_error(e, "Failed to draw frame");
            }
        }
    }

    fn on_window_close_requested(&mut self) {
        self.shutdown();
    }
}

fn main() {
    env_logger::init();

    let handler = ClearWindow {
        context: None,
        scheduler: FrameScheduler::new(),
        renderer: ClearRenderer,
    };

    if let Err(e) = WindowLifecycleManager::new(
        WindowConfig {
            width: 800,
            height: 600,
            title: "Clear Window",
        },
        handler,
    )
    .start_event_loop()
    {
        handle_fatal_error(e, "Event loop failed");
    }
}
