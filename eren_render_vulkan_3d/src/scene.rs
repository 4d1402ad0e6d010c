use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::ids::{MaterialId, MeshId};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DirectionalLight {
    /// `xyz` points from the light towards the scene.
    pub direction: Vec4,
    /// `w` is the intensity.
    pub color: Vec4,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.3, -1.0, -0.4).normalize().extend(0.0),
            color: Vec4::new(1.0, 0.98, 0.92, 3.0),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// `w` is the radius of influence.
    pub position: Vec4,
    /// `w` is the intensity.
    pub color: Vec4,
}

impl PointLight {
    pub fn new(position: Vec3, radius: f32, color: Vec3, intensity: f32) -> Self {
        Self {
            position: position.extend(radius),
            color: color.extend(intensity),
        }
    }
}

/// Per-frame uniform block, one copy per frame-in-flight slot. Shaders
/// reach it through a device address pushed with every draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub camera_position: Vec4,
    pub sun: DirectionalLight,
    pub point_lights: vk::DeviceAddress,
    pub materials: vk::DeviceAddress,
    pub point_light_count: u32,
    pub _pad: [u32; 3],
}

impl SceneData {
    pub fn new(
        input: &FrameInput,
        materials: vk::DeviceAddress,
        point_lights: vk::DeviceAddress,
        point_light_count: u32,
    ) -> Self {
        Self {
            view: input.view,
            projection: input.projection,
            view_projection: input.projection * input.view,
            camera_position: input.camera_position.extend(1.0),
            sun: input.sun,
            point_lights,
            materials,
            point_light_count,
            _pad: [0; 3],
        }
    }
}

/// One mesh drawn with one material. Holds ids, never the resources.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderObject {
    pub mesh: MeshId,
    pub material: MaterialId,
    pub transform: Mat4,
}

/// Camera and lighting the application supplies for the next frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub sun: DirectionalLight,
}

impl FrameInput {
    /// Right-handed perspective camera with Vulkan's downward Y.
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, aspect: f32) -> Self {
        let mut projection = Mat4::perspective_rh(fov_y, aspect, 0.1, 1000.0);
        projection.y_axis.y *= -1.0;

        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            projection,
            camera_position: eye,
            sun: DirectionalLight::default(),
        }
    }
}

impl Default for FrameInput {
    fn default() -> Self {
        Self::look_at(Vec3::new(0.0, 1.5, 4.0), Vec3::ZERO, 60f32.to_radians(), 16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use std::mem::{offset_of, size_of};

    use super::*;

    #[test]
    fn scene_data_layout_is_stable() {
        assert_eq!(size_of::<SceneData>(), 272);
        assert_eq!(offset_of!(SceneData, camera_position), 192);
        assert_eq!(offset_of!(SceneData, sun), 208);
        assert_eq!(offset_of!(SceneData, point_lights), 240);
        assert_eq!(offset_of!(SceneData, materials), 248);
        assert_eq!(offset_of!(SceneData, point_light_count), 256);
        assert_eq!(size_of::<PointLight>(), 32);
    }

    #[test]
    fn scene_data_combines_view_and_projection() {
        let input = FrameInput::default();
        let data = SceneData::new(&input, 0x1000, 0x2000, 3);

        assert_eq!(data.view_projection, input.projection * input.view);
        assert_eq!(data.camera_position.w, 1.0);
        assert_eq!((data.materials, data.point_lights), (0x1000, 0x2000));
        assert_eq!(data.point_light_count, 3);
    }

    #[test]
    fn projection_flips_y_for_vulkan() {
        let input = FrameInput::look_at(Vec3::Z, Vec3::ZERO, 1.0, 1.0);
        assert!(input.projection.y_axis.y < 0.0);
    }
}
