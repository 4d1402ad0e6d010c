pub mod backend;
pub mod config;
pub mod context;
pub mod deletion_queue;
pub mod descriptors;
pub mod frame;
pub mod renderer;
pub mod vulkan;

pub use ash::vk;
