// src/sampler.rs
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RoomGeometry;
use crate::skeleton::{Body, BodyId, FrameStore, Side};
use crate::transform::CoordinateTransformer;

/// Fewer frames than this in the window and the sampler uses the latest frame only.
pub const MIN_MEDIAN_FRAMES: usize = 3;

const PLANE_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wall {
    /// x = 0
    Left,
    /// x = width
    Right,
    /// z = 0
    Front,
    /// z = depth
    Back,
    /// y = 0
    Floor,
    /// y = height
    Ceiling,
}

impl Wall {
    pub fn as_str(&self) -> &'static str {
        match self {
            Wall::Left => "left",
            Wall::Right => "right",
            Wall::Front => "front",
            Wall::Back => "back",
            Wall::Floor => "floor",
            Wall::Ceiling => "ceiling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "left" => Some(Wall::Left),
            "right" => Some(Wall::Right),
            "front" => Some(Wall::Front),
            "back" => Some(Wall::Back),
            "floor" => Some(Wall::Floor),
            "ceiling" => Some(Wall::Ceiling),
            _ => None,
        }
    }
}

/// Room-space shoulder and wrist of the pointing arm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmPose {
    pub shoulder: Vector3<f64>,
    pub wrist: Vector3<f64>,
}

/// An aim ray projected onto the room boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSample {
    pub hit: Vector3<f64>,
    pub wall: Wall,
    /// Shoulder to hit point, meters.
    pub distance: f64,
    /// Device the sample belongs to; `None` for a query.
    pub label: Option<String>,
    pub shoulder: Vector3<f64>,
    pub wrist: Vector3<f64>,
}

impl FeatureSample {
    pub fn labeled(mut self, device_id: impl Into<String>) -> Self {
        self.label = Some(device_id.into());
        self
    }
}

/// Result of sampling. A ray that leaves the room without touching a usable
/// plane is `NoHit`, which can never reach the classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Hit(FeatureSample),
    NoHit(ArmPose),
}

impl Projection {
    pub fn is_hit(&self) -> bool {
        matches!(self, Projection::Hit(_))
    }

    pub fn into_sample(self) -> Option<FeatureSample> {
        match self {
            Projection::Hit(sample) => Some(sample),
            Projection::NoHit(_) => None,
        }
    }
}

pub struct AimSampler {
    room: RoomGeometry,
}

impl AimSampler {
    pub fn new(room: RoomGeometry) -> Self {
        Self { room }
    }

    pub fn room(&self) -> &RoomGeometry {
        &self.room
    }

    pub fn resize_room(&mut self, room: RoomGeometry) {
        self.room = room;
    }

    /// Samples the aim of `body`. `None` when the body is not in the current
    /// frame or has no complete arm.
    pub fn sample(
        &self,
        store: &FrameStore,
        transformer: &CoordinateTransformer,
        body: BodyId,
        windowed: bool,
    ) -> Option<Projection> {
        let latest = store.body(body)?;
        let side = pointing_side(latest)?;

        let (shoulders, wrists) = if windowed {
            (
                store.joint_history(body, side.shoulder()),
                store.joint_history(body, side.wrist()),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        let frames = shoulders.len().min(wrists.len());

        let (shoulder, wrist) = if frames >= MIN_MEDIAN_FRAMES {
            (median(&shoulders)?, median(&wrists)?)
        } else {
            latest.arm(side)?
        };

        let pose = match transformer.transform(&[shoulder, wrist]).as_slice() {
            [shoulder, wrist] => ArmPose {
                shoulder: *shoulder,
                wrist: *wrist,
            },
            _ => return None,
        };

        let projection = self.project(pose);
        debug!(
            body,
            arm = side.as_str(),
            frames,
            hit = projection.is_hit(),
            "aim sampled"
        );
        Some(projection)
    }

    /// Extends the shoulder-to-wrist ray and returns its first crossing of an
    /// enabled room plane that lies within the room extents.
    pub fn project(&self, pose: ArmPose) -> Projection {
        let origin = pose.shoulder;
        let direction = pose.wrist - pose.shoulder;
        if direction.norm() < PLANE_EPS {
            return Projection::NoHit(pose);
        }

        let extents = Vector3::new(self.room.width, self.room.height, self.room.depth);
        let mut planes = vec![
            (Wall::Left, 0, 0.0),
            (Wall::Right, 0, self.room.width),
            (Wall::Front, 2, 0.0),
            (Wall::Back, 2, self.room.depth),
        ];
        if self.room.include_floor {
            planes.push((Wall::Floor, 1, 0.0));
        }
        if self.room.include_ceiling {
            planes.push((Wall::Ceiling, 1, self.room.height));
        }

        let mut best: Option<(f64, Wall, Vector3<f64>)> = None;
        for (wall, axis, value) in planes {
            if direction[axis].abs() < PLANE_EPS {
                continue;
            }
            let t = (value - origin[axis]) / direction[axis];
            if t <= 0.0 {
                continue;
            }
            let point = origin + direction * t;
            let inside = (0..3).all(|i| {
                i == axis || (point[i] >= -PLANE_EPS && point[i] <= extents[i] + PLANE_EPS)
            });
            if inside && best.map_or(true, |(best_t, _, _)| t < best_t) {
                best = Some((t, wall, point));
            }
        }

        match best {
            Some((_, wall, point)) => {
                let hit = point.zip_map(&extents, |p, max| p.clamp(0.0, max));
                Projection::Hit(FeatureSample {
                    hit,
                    wall,
                    distance: (hit - origin).norm(),
                    label: None,
                    shoulder: pose.shoulder,
                    wrist: pose.wrist,
                })
            }
            None => Projection::NoHit(pose),
        }
    }
}

/// The more extended arm points; ties go to the right arm.
fn pointing_side(body: &Body) -> Option<Side> {
    let reach = |side: Side| body.arm(side).map(|(s, w)| (w - s).norm());
    match (reach(Side::Left), reach(Side::Right)) {
        (Some(left), Some(right)) if left > right => Some(Side::Left),
        (_, Some(_)) => Some(Side::Right),
        (Some(_), None) => Some(Side::Left),
        (None, None) => None,
    }
}

/// Component-wise median.
pub fn median(points: &[Vector3<f64>]) -> Option<Vector3<f64>> {
    if points.is_empty() {
        return None;
    }
    let axis = |i: usize| {
        let mut values: Vec<f64> = points.iter().map(|p| p[i]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        let mid = values.len() / 2;
        if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        }
    };
    Some(Vector3::new(axis(0), axis(1), axis(2)))
}
