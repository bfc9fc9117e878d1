// src/skeleton.rs
use nalgebra::Vector3;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

/// Transient identifier the sensor assigns to a visible body.
pub type BodyId = u64;

pub const DEFAULT_WINDOW_CAPACITY: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointType {
    Head,
    SpineShoulder,
    SpineBase,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn shoulder(self) -> JointType {
        match self {
            Side::Left => JointType::ShoulderLeft,
            Side::Right => JointType::ShoulderRight,
        }
    }

    pub fn wrist(self) -> JointType {
        match self {
            Side::Left => JointType::WristLeft,
            Side::Right => JointType::WristRight,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// One tracked body: sensor-space joint positions in meters, y pointing up.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub id: BodyId,
    pub joints: HashMap<JointType, Vector3<f64>>,
}

impl Body {
    pub fn new(id: BodyId) -> Self {
        Self {
            id,
            joints: HashMap::new(),
        }
    }

    pub fn with_joint(mut self, joint: JointType, position: Vector3<f64>) -> Self {
        self.joints.insert(joint, position);
        self
    }

    pub fn joint(&self, joint: JointType) -> Option<Vector3<f64>> {
        self.joints.get(&joint).copied()
    }

    /// Shoulder and wrist of one arm, if both are tracked.
    pub fn arm(&self, side: Side) -> Option<(Vector3<f64>, Vector3<f64>)> {
        Some((self.joint(side.shoulder())?, self.joint(side.wrist())?))
    }

    /// Whether the wrist of either arm is at least `margin` above its shoulder.
    pub fn arm_raised(&self, margin: f64) -> bool {
        [Side::Left, Side::Right].iter().any(|side| {
            self.arm(*side)
                .map(|(shoulder, wrist)| wrist.y > shoulder.y + margin)
                .unwrap_or(false)
        })
    }
}

/// Every body visible to the sensor at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonFrame {
    pub bodies: Vec<Body>,
    pub timestamp: f64,
}

impl SkeletonFrame {
    pub fn new(bodies: Vec<Body>, timestamp: f64) -> Self {
        Self { bodies, timestamp }
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.iter().find(|b| b.id == id)
    }

    pub fn ids(&self) -> HashSet<BodyId> {
        self.bodies.iter().map(|b| b.id).collect()
    }

    /// Drops jointless bodies, the sensor's reserved id 0, and repeated ids.
    fn sanitized(mut self) -> Self {
        let mut seen = HashSet::new();
        self.bodies
            .retain(|b| b.id != 0 && !b.joints.is_empty() && seen.insert(b.id));
        self
    }
}

/// Raised for every body that was present in the previous frame and is gone
/// from the new one. Carries the body's last known joints.
#[derive(Debug, Clone, PartialEq)]
pub struct UserLeft {
    pub body: Body,
}

impl UserLeft {
    pub fn body_id(&self) -> BodyId {
        self.body.id
    }
}

/// The latest frame plus a bounded rolling window for temporal filtering.
pub struct FrameStore {
    current: SkeletonFrame,
    window: VecDeque<SkeletonFrame>,
    capacity: usize,
    collect_window: bool,
}

impl FrameStore {
    pub fn new(capacity: usize, collect_window: bool) -> Self {
        Self {
            current: SkeletonFrame::default(),
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            collect_window,
        }
    }

    /// Replaces the current frame. Departure notifications are computed
    /// against the previous frame before it is overwritten.
    pub fn ingest(&mut self, frame: SkeletonFrame) -> Vec<UserLeft> {
        let frame = frame.sanitized();
        let now_seen = frame.ids();

        let left: Vec<UserLeft> = self
            .current
            .bodies
            .iter()
            .filter(|b| !now_seen.contains(&b.id))
            .map(|b| UserLeft { body: b.clone() })
            .collect();

        for event in &left {
            info!(body = event.body_id(), "body left the sensor view");
        }

        if frame.is_empty() {
            debug!("frame without bodies, not added to the window");
        } else if self.collect_window {
            self.window.push_back(frame.clone());
            while self.window.len() > self.capacity {
                self.window.pop_front();
            }
        }

        self.current = frame;
        left
    }

    pub fn current(&self) -> &SkeletonFrame {
        &self.current
    }

    pub fn body(&self, id: BodyId) -> Option<&Body> {
        self.current.body(id)
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_window_collection(&mut self, enabled: bool) {
        self.collect_window = enabled;
        if !enabled {
            self.window.clear();
        }
    }

    /// Positions of one joint of one body across the window, oldest first.
    pub fn joint_history(&self, id: BodyId, joint: JointType) -> Vec<Vector3<f64>> {
        self.window
            .iter()
            .filter_map(|frame| frame.body(id).and_then(|b| b.joint(joint)))
            .collect()
    }

    /// The body's poses across the window, oldest first.
    pub fn body_history(&self, id: BodyId) -> impl Iterator<Item = &Body> + '_ {
        self.window.iter().filter_map(move |frame| frame.body(id))
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY, true)
    }
}

#[cfg(test)]
pub(crate) fn make_body(id: BodyId, shoulder: Vector3<f64>, wrist: Vector3<f64>) -> Body {
    Body::new(id)
        .with_joint(JointType::Head, shoulder + Vector3::new(0.2, 0.3, 0.0))
        .with_joint(JointType::ShoulderRight, shoulder)
        .with_joint(JointType::WristRight, wrist)
        .with_joint(JointType::ShoulderLeft, shoulder + Vector3::new(0.4, 0.0, 0.0))
        .with_joint(JointType::WristLeft, shoulder + Vector3::new(0.4, -0.5, 0.0))
}
