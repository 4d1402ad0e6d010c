use std::path::PathBuf;

use eren_render_vulkan_core::descriptors::DEFAULT_BINDLESS_CAPACITY;

pub const PROJECT_ROOT_ENV: &str = "EREN_PROJECT_ROOT";

#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Directory holding `Shaders/`.
    pub project_root: PathBuf,
    pub clear_color: [f32; 4],
    /// Slots in the bindless texture array, render targets included.
    pub texture_capacity: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
            clear_color: [0.05, 0.05, 0.08, 1.0],
            texture_capacity: DEFAULT_BINDLESS_CAPACITY,
        }
    }
}

impl RendererConfig {
    /// Defaults, with `EREN_PROJECT_ROOT` overriding the shader root.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        match std::env::var_os(PROJECT_ROOT_ENV) {
            Some(root) if !root.is_empty() => config.project_root = PathBuf::from(root),
            _ => {}
        }
        log::debug!("Project root: {}", config.project_root.display());
        config
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }
}
