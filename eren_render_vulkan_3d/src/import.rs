//! Turns interchange files into [`crate::assets::ImportedModel`] records.

pub mod gltf;

pub use self::gltf::{ImportError, import_gltf};
