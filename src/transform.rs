// src/transform.rs
use nalgebra::{Matrix3, Rotation3, Vector3};
use tracing::info;

use crate::config::SensorPlacement;

/// Maps sensor-space joint coordinates into the room frame.
///
/// The rotation is cached and only rebuilt by [`CoordinateTransformer::recalibrate`].
#[derive(Debug, Clone)]
pub struct CoordinateTransformer {
    translation: Vector3<f64>,
    rotation: Matrix3<f64>,
    tilt_degrees: f64,
    orientation_degrees: f64,
}

impl CoordinateTransformer {
    pub fn new(placement: &SensorPlacement) -> Self {
        let [x, y, z] = placement.position;
        Self {
            translation: Vector3::new(x, y, z),
            rotation: rotation_matrix(placement.tilt_degrees, placement.orientation_degrees),
            tilt_degrees: placement.tilt_degrees,
            orientation_degrees: placement.orientation_degrees,
        }
    }

    /// Sensor moved or was turned.
    pub fn recalibrate(&mut self, placement: &SensorPlacement) {
        let [x, y, z] = placement.position;
        self.translation = Vector3::new(x, y, z);

        if placement.tilt_degrees != self.tilt_degrees
            || placement.orientation_degrees != self.orientation_degrees
        {
            self.tilt_degrees = placement.tilt_degrees;
            self.orientation_degrees = placement.orientation_degrees;
            self.rotation = rotation_matrix(self.tilt_degrees, self.orientation_degrees);
        }

        info!(
            x, y, z,
            tilt = self.tilt_degrees,
            orientation = self.orientation_degrees,
            "sensor placement recalibrated"
        );
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (point - self.translation)
    }

    pub fn transform(&self, points: &[Vector3<f64>]) -> Vec<Vector3<f64>> {
        points.iter().map(|p| self.transform_point(p)).collect()
    }
}

/// Pitch by `tilt` around x first, then yaw by `orientation` around y.
fn rotation_matrix(tilt_degrees: f64, orientation_degrees: f64) -> Matrix3<f64> {
    let pitch = Rotation3::from_axis_angle(&Vector3::x_axis(), tilt_degrees.to_radians());
    let yaw = Rotation3::from_axis_angle(&Vector3::y_axis(), orientation_degrees.to_radians());
    (yaw * pitch).into_inner()
}
