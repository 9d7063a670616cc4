// Scene data fed to the frame loop: one triangle, its material and transform

use std::f32::consts::TAU;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
}

pub const TRIANGLE: [Vertex; 3] = [
    Vertex { position: [-0.5, -0.5, 0.0, 1.0] },
    Vertex { position: [0.0, 0.5, 0.0, 1.0] },
    Vertex { position: [0.5, -0.5, 0.0, 1.0] },
];

/// Pixel-stage constants (b0)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Material {
    pub color: Vec4,
}

/// Vertex-stage constants (b0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TransformationMatrix {
    pub wvp: Mat4,
}

/// Scale, Euler rotation (radians) and translation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: Vec3,
    pub rotate: Vec3,
    pub translate: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self { scale: Vec3::ONE, rotate: Vec3::ZERO, translate: Vec3::ZERO }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        // X first, then Y, then Z
        let rotation = Quat::from_rotation_z(self.rotate.z)
            * Quat::from_rotation_y(self.rotate.y)
            * Quat::from_rotation_x(self.rotate.x);
        Mat4::from_scale_rotation_translation(self.scale, rotation, self.translate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub transform: Transform,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Transform { translate: Vec3::new(0.0, 0.0, -5.0), ..Transform::default() },
            fov_y: 0.45,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn view(&self) -> Mat4 {
        self.transform.matrix().inverse()
    }

    pub fn projection(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_lh(self.fov_y, aspect_ratio, self.near, self.far)
    }
}

#[derive(Debug, Clone)]
pub struct SceneState {
    pub vertices: [Vertex; 3],
    pub material: Material,
    pub transform: Transform,
    pub camera: Camera,
    /// Radians added to the Y rotation every frame
    pub rotation_speed: f32,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            vertices: TRIANGLE,
            material: Material { color: Vec4::new(1.0, 0.0, 0.0, 1.0) },
            transform: Transform::default(),
            camera: Camera::default(),
            rotation_speed: 0.03,
        }
    }
}

impl SceneState {
    pub fn advance(&mut self) {
        self.transform.rotate.y = (self.transform.rotate.y + self.rotation_speed).rem_euclid(TAU);
    }

    pub fn wvp(&self, aspect_ratio: f32) -> TransformationMatrix {
        let world = self.transform.matrix();
        TransformationMatrix {
            wvp: self.camera.projection(aspect_ratio) * self.camera.view() * world,
        }
    }
}
