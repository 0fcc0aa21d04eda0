//! Camera model and per-pixel ray generation.

use glam::{EulerRot, Quat, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use voxtrace_core::constants::COMPONENTS_PER_PIXEL;
use voxtrace_core::math::Ray;

use crate::error::{RenderError, Result};

/// How image coordinates map to ray directions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Projection {
    /// Perspective projection through a single point.
    #[default]
    Pinhole,
    /// Parallel rays from a rectangle `parallel_width` units tall.
    Parallel,
    /// Angle proportional to the distance from the image center.
    Fisheye,
    /// Equirectangular: horizontal and vertical angles map linearly.
    Panoramic,
}

/// Scene camera.
///
/// Angles are in radians except `fov`, the vertical field of view in degrees.
/// With zero yaw, pitch, and roll the camera looks down -Z with +Y up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub fov: f32,
    pub projection: Projection,
    pub parallel_width: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            fov: 70.0,
            projection: Projection::Pinhole,
            parallel_width: 16.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    /// Turn to face `target`, clearing roll.
    #[must_use]
    pub fn looking_at(mut self, target: Vec3) -> Self {
        let dir = (target - self.position).normalize_or_zero();
        if dir != Vec3::ZERO {
            self.pitch = dir.y.clamp(-1.0, 1.0).asin();
            self.yaw = (-dir.x).atan2(-dir.z);
            self.roll = 0.0;
        }
        self
    }

    #[must_use]
    pub fn with_fov(mut self, fov: f32) -> Self {
        self.fov = fov;
        self
    }

    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_euler(EulerRot::YXZ, self.yaw, self.pitch, self.roll)
    }

    /// Unit view direction.
    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }

    fn validate(&self) -> Result<()> {
        let angles = [self.yaw, self.pitch, self.roll, self.fov];
        if !self.position.is_finite() || angles.iter().any(|a| !a.is_finite()) {
            return Err(RenderError::Camera(format!(
                "non-finite camera state {self:?}"
            )));
        }
        match self.projection {
            Projection::Pinhole if !(self.fov > 0.0 && self.fov < 180.0) => Err(
                RenderError::Camera(format!("pinhole fov {} outside (0, 180)", self.fov)),
            ),
            Projection::Parallel
                if !(self.parallel_width > 0.0 && self.parallel_width.is_finite()) =>
            {
                Err(RenderError::Camera(format!(
                    "parallel width {} is not a positive finite number",
                    self.parallel_width
                )))
            }
            Projection::Fisheye | Projection::Panoramic if self.fov <= 0.0 => Err(
                RenderError::Camera(format!("fov {} is not positive", self.fov)),
            ),
            _ => Ok(()),
        }
    }

    /// Ray through normalized image coordinates `(u, v)` in `[-1, 1]`,
    /// `u` to the right and `v` downward, on an image of the given aspect.
    pub fn ray(&self, u: f32, v: f32, aspect: f32) -> Ray {
        let rotation = self.orientation();
        let half_fov = self.fov.to_radians() * 0.5;
        let x = u * aspect;
        let y = -v;

        match self.projection {
            Projection::Pinhole => {
                let scale = half_fov.tan();
                let dir = Vec3::new(x * scale, y * scale, -1.0).normalize();
                Ray::new(self.position, rotation * dir)
            }
            Projection::Parallel => {
                let half = self.parallel_width * 0.5;
                let offset = rotation * Vec3::new(x * half, y * half, 0.0);
                Ray::new(self.position + offset, rotation * Vec3::NEG_Z)
            }
            Projection::Fisheye => {
                let r = x.hypot(y);
                let theta = r * half_fov;
                let dir = if r > 0.0 {
                    let s = theta.sin() / r;
                    Vec3::new(x * s, y * s, -theta.cos())
                } else {
                    Vec3::NEG_Z
                };
                Ray::new(self.position, rotation * dir)
            }
            Projection::Panoramic => {
                let ax = x * half_fov;
                let ay = y * half_fov;
                let dir = Vec3::new(ax.sin() * ay.cos(), ay.sin(), -ax.cos() * ay.cos());
                Ray::new(self.position, rotation * dir)
            }
        }
    }
}

/// Per-pixel ray origins and directions, three `f32` per pixel, row-major
/// with the top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraRays {
    width: u32,
    height: u32,
    origins: Vec<f32>,
    directions: Vec<f32>,
}

impl CameraRays {
    /// Generate one ray per pixel, rows in parallel.
    pub fn generate(camera: &Camera, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::Camera(format!(
                "image size {width}x{height} has no pixels"
            )));
        }
        camera.validate()?;

        let row_len = width as usize * COMPONENTS_PER_PIXEL;
        let len = row_len * height as usize;
        let mut origins = vec![0.0_f32; len];
        let mut directions = vec![0.0_f32; len];
        let aspect = width as f32 / height as f32;

        origins
            .par_chunks_mut(row_len)
            .zip(directions.par_chunks_mut(row_len))
            .enumerate()
            .for_each(|(row, (origin_row, dir_row))| {
                let v = ((row as f32 + 0.5) / height as f32).mul_add(2.0, -1.0);
                for (col, (origin, dir)) in origin_row
                    .chunks_exact_mut(COMPONENTS_PER_PIXEL)
                    .zip(dir_row.chunks_exact_mut(COMPONENTS_PER_PIXEL))
                    .enumerate()
                {
                    let u = ((col as f32 + 0.5) / width as f32).mul_add(2.0, -1.0);
                    let ray = camera.ray(u, v, aspect);
                    origin.copy_from_slice(&ray.origin.to_array());
                    dir.copy_from_slice(&ray.direction.to_array());
                }
            });

        tracing::debug!(width, height, "Generated camera rays");
        Ok(Self {
            width,
            height,
            origins,
            directions,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Origins; the kernel's `rayPos` argument.
    pub fn origins(&self) -> &[f32] {
        &self.origins
    }

    /// Directions; the kernel's `rayDir` argument.
    pub fn directions(&self) -> &[f32] {
        &self.directions
    }

    pub fn ray(&self, pixel: usize) -> Option<Ray> {
        let start = pixel.checked_mul(COMPONENTS_PER_PIXEL)?;
        let origin = self.origins.get(start..start + COMPONENTS_PER_PIXEL)?;
        let dir = self.directions.get(start..start + COMPONENTS_PER_PIXEL)?;
        Some(Ray::new(Vec3::from_slice(origin), Vec3::from_slice(dir)))
    }
}
