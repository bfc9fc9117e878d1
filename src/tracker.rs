// src/tracker.rs
use tracing::{debug, info, warn};

use crate::error::{PointingError, PointingResult};
use crate::skeleton::{Body, BodyId, FrameStore};

/// A body that currently holds one of the tracking slots.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedSkeleton {
    pub id: BodyId,
    /// Tick of the last activation or aim sample.
    pub last_active: u64,
    pub actions: u64,
}

/// What the replacement strategy allows for a newcomer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Free,
    Evict(BodyId),
    Full,
}

pub trait ReplacementStrategy: Send + Sync {
    fn decide(&self, tracked: &[TrackedSkeleton], capacity: usize) -> Slot;
}

/// Hands the slot of the least recently active body to the newcomer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastRecentlyActive;

impl ReplacementStrategy for LeastRecentlyActive {
    fn decide(&self, tracked: &[TrackedSkeleton], capacity: usize) -> Slot {
        if tracked.len() < capacity {
            return Slot::Free;
        }
        tracked
            .iter()
            .min_by_key(|s| s.last_active)
            .map(|s| Slot::Evict(s.id))
            .unwrap_or(Slot::Full)
    }
}

pub trait GestureStrategy: Send + Sync {
    /// Picks the untracked body, if any, that performed the activation gesture.
    fn decide(&self, candidates: &[&Body], store: &FrameStore) -> Option<BodyId>;
}

/// One arm held above shoulder height for a number of consecutive frames.
#[derive(Debug, Clone, Copy)]
pub struct RaisedArmGesture {
    pub dwell_frames: usize,
    pub margin: f64,
}

impl Default for RaisedArmGesture {
    fn default() -> Self {
        Self {
            dwell_frames: 3,
            margin: 0.05,
        }
    }
}

impl RaisedArmGesture {
    /// Consecutive most recent frames with an arm raised.
    fn dwell(&self, body: &Body, store: &FrameStore) -> usize {
        let history: Vec<&Body> = store.body_history(body.id).collect();
        if history.is_empty() {
            // window collection is off, only the live frame counts
            return usize::from(body.arm_raised(self.margin));
        }
        history
            .iter()
            .rev()
            .take_while(|b| b.arm_raised(self.margin))
            .count()
    }
}

impl GestureStrategy for RaisedArmGesture {
    fn decide(&self, candidates: &[&Body], store: &FrameStore) -> Option<BodyId> {
        let required = if store.window_len() == 0 {
            1
        } else {
            self.dwell_frames.max(1)
        };

        let mut best: Option<(usize, BodyId)> = None;
        for body in candidates {
            if !body.arm_raised(self.margin) {
                continue;
            }
            let dwell = self.dwell(body, store);
            if dwell >= required && best.map_or(true, |(d, _)| dwell > d) {
                best = Some((dwell, body.id));
            }
        }
        best.map(|(_, id)| id)
    }
}

/// A successful resolution. `evicted` names a body that lost its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub body: BodyId,
    pub evicted: Option<BodyId>,
}

/// Maps transient sensor bodies onto a bounded set of tracking slots.
pub struct IdentityTracker {
    tracked: Vec<TrackedSkeleton>,
    capacity: usize,
    replacement: Box<dyn ReplacementStrategy>,
    gesture: Box<dyn GestureStrategy>,
    tick: u64,
}

impl IdentityTracker {
    pub fn new(
        capacity: usize,
        replacement: Box<dyn ReplacementStrategy>,
        gesture: Box<dyn GestureStrategy>,
    ) -> Self {
        Self {
            tracked: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
            replacement,
            gesture,
            tick: 0,
        }
    }

    pub fn with_defaults(capacity: usize, dwell_frames: usize, margin: f64) -> Self {
        Self::new(
            capacity,
            Box::new(LeastRecentlyActive),
            Box::new(RaisedArmGesture {
                dwell_frames,
                margin,
            }),
        )
    }

    pub fn resolve(&mut self, store: &FrameStore, hint: Option<BodyId>) -> PointingResult<Resolution> {
        if let Some(id) = hint.filter(|id| self.is_tracked(*id)) {
            return Ok(Resolution {
                body: id,
                evicted: None,
            });
        }

        let frame = store.current();
        if frame.is_empty() {
            return Err(PointingError::NoBodiesInFrame);
        }

        let slot = self.replacement.decide(&self.tracked, self.capacity);

        let candidates: Vec<&Body> = frame
            .bodies
            .iter()
            .filter(|b| !self.is_tracked(b.id))
            .collect();
        let chosen = self
            .gesture
            .decide(&candidates, store)
            .ok_or(PointingError::NoGestureFound)?;

        let evicted = match slot {
            Slot::Free => None,
            Slot::Evict(victim) => {
                self.forget(victim);
                info!(body = victim, "tracking slot handed over");
                Some(victim)
            }
            Slot::Full => {
                warn!(body = chosen, "gesture found but no tracking slot may be replaced");
                return Err(PointingError::NoGestureFound);
            }
        };

        self.tick += 1;
        self.tracked.push(TrackedSkeleton {
            id: chosen,
            last_active: self.tick,
            actions: 0,
        });
        info!(body = chosen, tracked = self.tracked.len(), "body tracked");

        Ok(Resolution {
            body: chosen,
            evicted,
        })
    }

    /// Records activity for a tracked body.
    pub fn touch(&mut self, id: BodyId) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(s) = self.tracked.iter_mut().find(|s| s.id == id) {
            s.last_active = tick;
            s.actions += 1;
        }
    }

    /// Frees the slot of `id`. Returns whether it was tracked.
    pub fn forget(&mut self, id: BodyId) -> bool {
        match self.tracked.iter().position(|s| s.id == id) {
            Some(pos) => {
                let slot = self.tracked.remove(pos);
                debug!(body = id, actions = slot.actions, "tracking slot released");
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, id: BodyId) -> bool {
        self.tracked.iter().any(|s| s.id == id)
    }

    pub fn tracked(&self) -> &[TrackedSkeleton] {
        &self.tracked
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
