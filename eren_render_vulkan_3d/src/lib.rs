pub mod assets;
pub mod config;
pub mod ids;
pub mod import;
pub mod material;
pub mod mesh;
pub mod pipeline;
pub mod renderer;
pub mod scene;
pub mod shader;
pub mod stages;
pub mod texture;

pub use renderer::{Engine3D, EngineError, Overlay, Renderer3D};
