// src/controller.rs
//! Entry points for the request handlers and the sensor feed.
//!
//! Lock order, outermost first: sessions, sensor, geometry, classifier.
//! Frame ingestion takes the sensor lock alone and releases it before
//! touching sessions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::Classifier;
use crate::config::{PipelineConfig, PointingConfig, RoomGeometry, SensorPlacement};
use crate::devices::Device;
use crate::error::{PointingError, PointingResult};
use crate::feed::{spawn_frame_pump, FrameReceiver};
use crate::sampler::{AimSampler, FeatureSample, Projection};
use crate::session::{Feedback, Notification, SessionRegistry, SessionState, TrackedSession};
use crate::skeleton::{BodyId, FrameStore, SkeletonFrame};
use crate::tracker::IdentityTracker;
use crate::transform::CoordinateTransformer;

const LEFT_ROOM: &str = "You left the room!";
const SLOT_TAKEN: &str = "Tracking was handed to another user.";

/// State shared between the frame feed and the request handlers.
pub struct SensorState {
    pub store: FrameStore,
    pub tracker: IdentityTracker,
}

struct Geometry {
    transformer: CoordinateTransformer,
    sampler: AimSampler,
}

/// The device offered to a user after pointing.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub device: Device,
    pub sample: FeatureSample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub body: Option<BodyId>,
    pub state: SessionState,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub classifications: u64,
    pub misclassifications: u64,
    pub samples: BTreeMap<String, usize>,
    /// Aim requests served per tracked body.
    pub actions: BTreeMap<BodyId, u64>,
}

pub struct PointingController {
    sessions: Mutex<SessionRegistry>,
    sensor: Mutex<SensorState>,
    geometry: RwLock<Geometry>,
    classifier: Mutex<Classifier>,
    pipeline: PipelineConfig,
    classifications: AtomicU64,
    misclassifications: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}

impl PointingController {
    pub fn new(config: &PointingConfig, classifier: Classifier) -> Self {
        let p = &config.pipeline;
        let tracker = IdentityTracker::with_defaults(p.tracking_capacity, p.gesture_dwell_frames, p.gesture_margin);
        Self::with_tracker(config, classifier, tracker)
    }

    /// Same as [`PointingController::new`] with custom tracking strategies.
    pub fn with_tracker(config: &PointingConfig, classifier: Classifier, tracker: IdentityTracker) -> Self {
        let p = &config.pipeline;
        Self {
            sessions: Mutex::new(SessionRegistry::new()),
            sensor: Mutex::new(SensorState {
                store: FrameStore::new(p.window_capacity, p.collect_window),
                tracker,
            }),
            geometry: RwLock::new(Geometry {
                transformer: CoordinateTransformer::new(&config.sensor),
                sampler: AimSampler::new(config.room.clone()),
            }),
            classifier: Mutex::new(classifier),
            pipeline: p.clone(),
            classifications: AtomicU64::new(0),
            misclassifications: AtomicU64::new(0),
        }
    }

    // ── Sensor side ────────────────────────────────────────────

    /// Stores a new frame and unbinds sessions whose body left. Returns the
    /// departed body ids.
    pub fn ingest(&self, frame: SkeletonFrame) -> Vec<BodyId> {
        let departed: Vec<BodyId> = {
            let mut sensor = lock(&self.sensor);
            let departed: Vec<BodyId> = sensor.store.ingest(frame).iter().map(|e| e.body_id()).collect();
            for body in &departed {
                sensor.tracker.forget(*body);
            }
            departed
        };

        if !departed.is_empty() {
            let mut sessions = lock(&self.sessions);
            for body in &departed {
                for session in sessions.bound_to(*body) {
                    self.release(session);
                    session.notify(LEFT_ROOM);
                    info!(client = %session.client, body, "user left, tracking stopped");
                }
            }
        }
        departed
    }

    /// Ingests every frame delivered through `rx` on a tokio task.
    pub fn spawn_feed(self: &Arc<Self>, rx: FrameReceiver) -> JoinHandle<usize> {
        let controller = Arc::clone(self);
        spawn_frame_pump(rx, move |frame| {
            controller.ingest(frame);
        })
    }

    // ── Sessions ───────────────────────────────────────────────

    pub fn register(&self, client: &str) -> PointingResult<Uuid> {
        let mut sessions = lock(&self.sessions);
        Ok(sessions.register(client)?.id)
    }

    /// Destroys the session, freeing its tracking slot and withdrawing any
    /// provisional sample it still holds.
    pub fn unregister(&self, client: &str) -> PointingResult<()> {
        let mut sessions = lock(&self.sessions);
        let mut session = sessions.unregister(client)?;
        if let Some(body) = session.body {
            lock(&self.sensor).tracker.forget(body);
        }
        self.release(&mut session);
        Ok(())
    }

    /// Unbinds `session`, withdrawing the provisional sample of a selection
    /// it was still waiting on.
    fn release(&self, session: &mut TrackedSession) {
        if let Some((device, seq)) = session.unbind() {
            lock(&self.classifier).withdraw_sample(&device, seq);
            debug!(client = %session.client, device = %device, "pending selection dropped");
        }
    }

    /// Binds the user to the body performing the activation gesture.
    pub fn activate(&self, client: &str) -> PointingResult<BodyId> {
        let mut sessions = lock(&self.sessions);
        let hint = sessions.get(client)?.body;

        let resolution = {
            let mut sensor = lock(&self.sensor);
            let SensorState { store, tracker } = &mut *sensor;
            match tracker.resolve(store, hint) {
                Ok(resolution) => resolution,
                Err(e) => {
                    info!(client, reason = %e, "activation failed");
                    return Err(e);
                }
            }
        };

        if let Some(evicted) = resolution.evicted {
            for other in sessions.bound_to(evicted) {
                self.release(other);
                other.notify(SLOT_TAKEN);
                info!(client = %other.client, body = evicted, "tracking slot lost");
            }
        }

        let session = sessions.get_mut(client)?;
        session.bind(resolution.body);
        info!(client, body = resolution.body, "gesture control active");
        Ok(resolution.body)
    }

    /// Stops gesture control for the user without removing the session.
    pub fn deactivate(&self, client: &str) -> PointingResult<()> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(client)?;
        if let Some(body) = session.body {
            lock(&self.sensor).tracker.forget(body);
        }
        self.release(session);
        info!(client, "gesture control deactivated");
        Ok(())
    }

    pub fn session(&self, client: &str) -> PointingResult<TrackedSession> {
        lock(&self.sessions).get(client).cloned()
    }

    pub fn session_state(&self, client: &str) -> PointingResult<SessionState> {
        Ok(lock(&self.sessions).get(client)?.state())
    }

    /// Status poll. Never settles a pending selection.
    pub fn take_notifications(&self, client: &str) -> PointingResult<SessionStatus> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(client)?;
        Ok(SessionStatus {
            body: session.body,
            state: session.state(),
            notifications: session.take_notifications(),
        })
    }

    // ── Pointing ───────────────────────────────────────────────

    pub fn select_device(&self, client: &str) -> PointingResult<Selection> {
        let selection = self.select(client)?;
        info!(client, device = %selection.device.id, "device selected");
        Ok(selection)
    }

    /// Like [`PointingController::select_device`], for clients polling continuously.
    pub fn poll_device(&self, client: &str) -> PointingResult<Selection> {
        let selection = self.select(client)?;
        debug!(client, device = %selection.device.id, "device polled");
        Ok(selection)
    }

    fn select(&self, client: &str) -> PointingResult<Selection> {
        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(client)?;
        let body = tracked_body(session)?;

        let sample = self.aim(body)?;

        let mut classifier = lock(&self.classifier);
        // a previous offer nobody acted on is dropped before the new one is made
        if let Some((stale, seq)) = session.disarm() {
            classifier.withdraw_sample(&stale, seq);
        }

        let device_id = classifier.classify(&sample)?;
        let device = classifier.catalog().require(&device_id)?.clone();
        let sample = sample.labeled(device_id.as_str());

        let contribution = if self.pipeline.reinforce_on_select {
            classifier.add_sample(&device_id, sample.clone()).ok()
        } else {
            None
        };
        session.arm(device_id, sample.clone(), contribution);
        self.classifications.fetch_add(1, Ordering::Relaxed);

        Ok(Selection { device, sample })
    }

    /// A control command for `device` (or for no device) from `client`.
    /// The pending selection, if any, is confirmed or corrected.
    pub fn control_device(&self, client: &str, device: Option<&str>) -> PointingResult<Feedback> {
        if let Some(id) = device {
            lock(&self.classifier).catalog().require(id)?;
        }

        let mut sessions = lock(&self.sessions);
        let session = sessions.get_mut(client)?;
        let feedback = session.resolve_feedback(device);

        match &feedback {
            Feedback::None => {}
            Feedback::Confirmed { device } => {
                info!(client, device = %device, "classification confirmed");
            }
            Feedback::Corrected { device: wrong, contribution } => {
                if let Some(seq) = contribution {
                    lock(&self.classifier).withdraw_sample(wrong, *seq);
                }
                self.misclassifications.fetch_add(1, Ordering::Relaxed);
                warn!(client, classified = %wrong, chosen = ?device, "classification corrected");
            }
        }
        Ok(feedback)
    }

    /// Records the user's current aim as a calibration sample for `device_id`.
    pub fn collect_sample(&self, client: &str, device_id: &str) -> PointingResult<FeatureSample> {
        lock(&self.classifier).catalog().require(device_id)?;

        let sessions = lock(&self.sessions);
        let body = tracked_body(sessions.get(client)?)?;
        let sample = self.aim(body)?.labeled(device_id);

        lock(&self.classifier).add_sample(device_id, sample.clone())?;
        info!(client, device = device_id, "calibration sample collected");
        Ok(sample)
    }

    /// Room-space sample of `body`'s aim from the latest frame data.
    fn aim(&self, body: BodyId) -> PointingResult<FeatureSample> {
        let projection = {
            let mut sensor = lock(&self.sensor);
            if sensor.store.current().is_empty() {
                return Err(PointingError::NoBodiesInFrame);
            }
            let geometry = read(&self.geometry);
            let projection = geometry
                .sampler
                .sample(&sensor.store, &geometry.transformer, body, self.pipeline.windowed_sampling)
                .ok_or(PointingError::BodyNotVisible(body))?;
            sensor.tracker.touch(body);
            projection
        };

        match projection {
            Projection::Hit(sample) => Ok(sample),
            Projection::NoHit(pose) => {
                debug!(body, shoulder = ?pose.shoulder, wrist = ?pose.wrist, "aim ray misses every wall");
                Err(PointingError::NoHit)
            }
        }
    }

    // ── Configuration and devices ──────────────────────────────

    pub fn recalibrate(&self, placement: &SensorPlacement) {
        write(&self.geometry).transformer.recalibrate(placement);
    }

    /// Turns the rolling frame window on or off. Off, sampling and the
    /// activation gesture use the live frame only.
    pub fn set_window_collection(&self, enabled: bool) {
        lock(&self.sensor).store.set_window_collection(enabled);
        info!(enabled, "frame window collection changed");
    }

    pub fn resize_room(&self, room: RoomGeometry) {
        info!(width = room.width, height = room.height, depth = room.depth, "room resized");
        write(&self.geometry).sampler.resize_room(room);
    }

    /// Adds a device. Without an explicit id one is generated from `kind`.
    pub fn add_device(&self, kind: &str, id: Option<&str>, name: &str) -> PointingResult<Device> {
        let mut classifier = lock(&self.classifier);
        let catalog = classifier.catalog_mut();
        let id = match id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => catalog.next_id(kind),
        };
        Ok(catalog.add(id, name)?.clone())
    }

    pub fn remove_device(&self, device_id: &str) -> PointingResult<()> {
        lock(&self.classifier).remove_device(device_id)
    }

    pub fn list_devices(&self) -> Vec<Device> {
        lock(&self.classifier).catalog().list().to_vec()
    }

    /// Drops every training sample of one device.
    pub fn reset_device_samples(&self, device_id: &str) -> PointingResult<usize> {
        lock(&self.classifier).clear_device(device_id)
    }

    pub fn stats(&self) -> Stats {
        let actions = lock(&self.sensor)
            .tracker
            .tracked()
            .iter()
            .map(|s| (s.id, s.actions))
            .collect();
        Stats {
            classifications: self.classifications.load(Ordering::Relaxed),
            misclassifications: self.misclassifications.load(Ordering::Relaxed),
            samples: lock(&self.classifier).training().counts(),
            actions,
        }
    }
}

fn tracked_body(session: &TrackedSession) -> PointingResult<BodyId> {
    session
        .body
        .filter(|_| session.tracking)
        .ok_or_else(|| PointingError::NotTracking(session.client.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::hit_sample;
    use crate::devices::DeviceCatalog;
    use crate::feed::frame_feed;
    use crate::skeleton::{make_body, Body};
    use crate::store::NullSampleStore;
    use nalgebra::Vector3;

    const CLIENT: &str = "192.168.0.20";
    const SHOULDER: [f64; 3] = [2.5, 1.4, 2.5];

    fn controller() -> PointingController {
        controller_with(PointingConfig::default())
    }

    /// Lamp trained on the back wall, fan low on the left.
    fn controller_with(mut config: PointingConfig) -> PointingController {
        config.room = RoomGeometry {
            width: 5.0,
            height: 3.0,
            depth: 5.0,
            include_floor: false,
            include_ceiling: false,
        };

        let mut catalog = DeviceCatalog::new();
        catalog.add("lamp", "Lamp").unwrap();
        catalog.add("fan", "Fan").unwrap();
        let mut classifier = Classifier::new(catalog, Box::new(NullSampleStore));
        classifier.add_sample("lamp", hit_sample(2.5, 1.4, 5.0)).unwrap();
        classifier.add_sample("fan", hit_sample(0.0, 1.5, 1.0)).unwrap();

        PointingController::new(&config, classifier)
    }

    fn shoulder() -> Vector3<f64> {
        Vector3::new(SHOULDER[0], SHOULDER[1], SHOULDER[2])
    }

    /// Right arm straight up.
    fn raising(id: BodyId) -> Body {
        make_body(id, shoulder(), shoulder() + Vector3::new(0.0, 0.6, 0.0))
    }

    /// Right arm toward the back wall.
    fn pointing_back(id: BodyId) -> Body {
        make_body(id, shoulder(), shoulder() + Vector3::new(0.0, 0.0, 0.6))
    }

    /// Same, standing at `x`.
    fn pointing_back_at(id: BodyId, x: f64) -> Body {
        let s = Vector3::new(x, SHOULDER[1], SHOULDER[2]);
        make_body(id, s, s + Vector3::new(0.0, 0.0, 0.6))
    }

    fn arm_down(id: BodyId) -> Body {
        make_body(id, shoulder(), shoulder() + Vector3::new(0.0, -0.5, 0.1))
    }

    fn lamp_hits(c: &PointingController) -> Vec<f64> {
        lock(&c.classifier).training().samples("lamp").map(|s| s.hit.x).collect()
    }

    fn feed(c: &PointingController, body: Body, times: usize) {
        for _ in 0..times {
            c.ingest(SkeletonFrame::new(vec![body.clone()], 0.0));
        }
    }

    fn armed_with_lamp() -> PointingController {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        assert_eq!(c.activate(CLIENT).unwrap(), 7);
        feed(&c, pointing_back(7), 12);

        let selection = c.select_device(CLIENT).unwrap();
        assert_eq!(selection.device.id, "lamp");
        assert!(selection.sample.hit.z > 4.99 && selection.sample.hit.z <= 5.0);
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::ArmedSelection);
        c
    }

    #[test]
    fn test_activation_failures_are_distinct() {
        let c = controller();
        c.register(CLIENT).unwrap();
        assert_eq!(c.activate(CLIENT), Err(PointingError::NoBodiesInFrame));
        feed(&c, pointing_back(7), 3);
        assert_eq!(c.activate(CLIENT), Err(PointingError::NoGestureFound));
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Registered);
    }

    #[test]
    fn test_unknown_client() {
        let c = controller();
        assert_eq!(
            c.activate("nobody"),
            Err(PointingError::SessionNotFound("nobody".into()))
        );
        assert_eq!(
            c.select_device("nobody").err(),
            Some(PointingError::SessionNotFound("nobody".into()))
        );
    }

    #[test]
    fn test_select_requires_tracking() {
        let c = controller();
        c.register(CLIENT).unwrap();
        assert_eq!(
            c.select_device(CLIENT).err(),
            Some(PointingError::NotTracking(CLIENT.into()))
        );
    }

    #[test]
    fn test_confirmation_scenario() {
        let c = armed_with_lamp();
        let session = c.session(CLIENT).unwrap();
        assert_eq!(session.last_device.as_deref(), Some("lamp"));
        assert!(!session.device_id_checked);
        let before = c.stats().samples;

        let feedback = c.control_device(CLIENT, Some("lamp")).unwrap();
        assert_eq!(feedback, Feedback::Confirmed { device: "lamp".into() });

        let session = c.session(CLIENT).unwrap();
        assert!(session.device_id_checked);
        assert_eq!(c.stats().samples, before);
        assert_eq!(c.stats().misclassifications, 0);
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Tracking);
    }

    #[test]
    fn test_correction_scenario() {
        let c = armed_with_lamp();
        let lamp_before = c.stats().samples["lamp"];

        let feedback = c.control_device(CLIENT, Some("fan")).unwrap();
        assert!(matches!(
            feedback,
            Feedback::Corrected { ref device, contribution: Some(_) } if device == "lamp"
        ));

        let stats = c.stats();
        assert_eq!(stats.samples["lamp"], lamp_before - 1);
        assert_eq!(stats.misclassifications, 1);
        let session = c.session(CLIENT).unwrap();
        assert!(session.last_device.is_none());
        assert!(session.last_sample.is_none());
        assert!(session.device_id_checked);

        // one wrong guess is corrected once
        assert_eq!(c.control_device(CLIENT, Some("lamp")).unwrap(), Feedback::None);
        assert_eq!(c.stats().misclassifications, 1);
    }

    #[test]
    fn test_status_poll_does_not_resolve() {
        let c = armed_with_lamp();
        c.take_notifications(CLIENT).unwrap();
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::ArmedSelection);
    }

    #[test]
    fn test_control_with_no_device_corrects() {
        let c = armed_with_lamp();
        assert!(matches!(
            c.control_device(CLIENT, None).unwrap(),
            Feedback::Corrected { .. }
        ));
    }

    #[test]
    fn test_control_unknown_device() {
        let c = armed_with_lamp();
        assert_eq!(
            c.control_device(CLIENT, Some("radio")),
            Err(PointingError::DeviceNotFound("radio".into()))
        );
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::ArmedSelection);
    }

    #[test]
    fn test_repeated_polls_hold_one_provisional_sample() {
        let c = armed_with_lamp();
        let lamp_after_first = c.stats().samples["lamp"];
        c.poll_device(CLIENT).unwrap();
        c.poll_device(CLIENT).unwrap();
        assert_eq!(c.stats().samples["lamp"], lamp_after_first);
        assert_eq!(c.stats().classifications, 3);
        assert_eq!(c.stats().actions, BTreeMap::from([(7, 3)]));
    }

    #[test]
    fn test_pointing_up_is_no_hit() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();
        feed(&c, raising(7), 5);

        let before = c.stats();
        assert_eq!(c.select_device(CLIENT).err(), Some(PointingError::NoHit));
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Tracking);
        let after = c.stats();
        assert_eq!(after.samples, before.samples);
        assert_eq!(after.classifications, before.classifications);
        // the request still counts against the body's slot
        assert_eq!(after.actions[&7], before.actions[&7] + 1);
    }

    #[test]
    fn test_no_training_data_leaves_state() {
        let mut config = PointingConfig::default();
        config.pipeline.windowed_sampling = false;
        let mut catalog = DeviceCatalog::new();
        catalog.add("lamp", "Lamp").unwrap();
        let c = PointingController::new(&config, Classifier::new(catalog, Box::new(NullSampleStore)));
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();
        feed(&c, pointing_back(7), 1);

        assert_eq!(c.select_device(CLIENT).err(), Some(PointingError::NoTrainingData));
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Tracking);
    }

    #[test]
    fn test_user_left_unbinds_session() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();

        let departed = c.ingest(SkeletonFrame::default());
        assert_eq!(departed, vec![7]);

        let status = c.take_notifications(CLIENT).unwrap();
        assert_eq!(status.body, None);
        assert_eq!(status.state, SessionState::Registered);
        assert_eq!(status.notifications.len(), 1);
        assert_eq!(status.notifications[0].message, LEFT_ROOM);
        assert!(lock(&c.sensor).tracker.tracked().is_empty());
    }

    #[test]
    fn test_activation_is_idempotent() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        assert_eq!(c.activate(CLIENT).unwrap(), 7);
        assert_eq!(c.activate(CLIENT).unwrap(), 7);
    }

    #[test]
    fn test_eviction_notifies_previous_owner() {
        let mut config = PointingConfig::default();
        config.pipeline.tracking_capacity = 1;
        let c = PointingController::new(
            &config,
            Classifier::new(DeviceCatalog::new(), Box::new(NullSampleStore)),
        );
        c.register("a").unwrap();
        c.register("b").unwrap();

        let still = make_body(8, shoulder(), shoulder() + Vector3::new(0.0, -0.5, 0.1));
        for _ in 0..3 {
            c.ingest(SkeletonFrame::new(vec![raising(7), still.clone()], 0.0));
        }
        assert_eq!(c.activate("a").unwrap(), 7);

        let lowered = make_body(7, shoulder(), shoulder() + Vector3::new(0.0, -0.5, 0.1));
        for _ in 0..3 {
            c.ingest(SkeletonFrame::new(vec![lowered.clone(), raising(8)], 0.0));
        }
        assert_eq!(c.activate("b").unwrap(), 8);

        let status = c.take_notifications("a").unwrap();
        assert_eq!(status.state, SessionState::Registered);
        assert_eq!(status.notifications[0].message, SLOT_TAKEN);
    }

    #[test]
    fn test_collect_sample() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();
        feed(&c, pointing_back(7), 12);

        let sample = c.collect_sample(CLIENT, "fan").unwrap();
        assert_eq!(sample.label.as_deref(), Some("fan"));
        assert_eq!(c.stats().samples["fan"], 2);
        assert_eq!(
            c.collect_sample(CLIENT, "radio").err(),
            Some(PointingError::DeviceNotFound("radio".into()))
        );
        // collecting is not a control command
        assert_eq!(c.stats().classifications, 0);
    }

    #[test]
    fn test_correction_withdraws_only_its_own_sample() {
        let c = controller();
        c.register("a").unwrap();
        c.register("b").unwrap();

        for _ in 0..3 {
            c.ingest(SkeletonFrame::new(vec![raising(7), arm_down(8)], 0.0));
        }
        assert_eq!(c.activate("a").unwrap(), 7);
        for _ in 0..3 {
            c.ingest(SkeletonFrame::new(vec![pointing_back_at(7, 1.0), raising(8)], 0.0));
        }
        assert_eq!(c.activate("b").unwrap(), 8);
        for _ in 0..12 {
            c.ingest(SkeletonFrame::new(
                vec![pointing_back_at(7, 1.0), pointing_back_at(8, 4.0)],
                0.0,
            ));
        }

        assert_eq!(c.select_device("a").unwrap().device.id, "lamp");
        assert_eq!(c.select_device("b").unwrap().device.id, "lamp");
        assert_eq!(lamp_hits(&c), vec![2.5, 1.0, 4.0]);

        // a meant the fan; b's selection is still pending and keeps its sample
        c.control_device("a", Some("fan")).unwrap();
        assert_eq!(lamp_hits(&c), vec![2.5, 4.0]);
        assert_eq!(c.session_state("b").unwrap(), SessionState::ArmedSelection);

        c.control_device("b", Some("lamp")).unwrap();
        assert_eq!(lamp_hits(&c), vec![2.5, 4.0]);
    }

    #[test]
    fn test_leaving_drops_pending_selection() {
        let c = armed_with_lamp();
        c.ingest(SkeletonFrame::default());

        let session = c.session(CLIENT).unwrap();
        assert_eq!(session.state(), SessionState::Registered);
        assert!(session.last_sample.is_none());
        assert_eq!(lamp_hits(&c), vec![2.5]);

        assert_eq!(c.control_device(CLIENT, Some("fan")).unwrap(), Feedback::None);
        assert_eq!(c.stats().misclassifications, 0);
    }

    #[test]
    fn test_eviction_drops_pending_selection() {
        let mut config = PointingConfig::default();
        config.pipeline.tracking_capacity = 1;
        let c = controller_with(config);
        c.register("a").unwrap();
        c.register("b").unwrap();

        for _ in 0..3 {
            c.ingest(SkeletonFrame::new(vec![raising(7), arm_down(8)], 0.0));
        }
        c.activate("a").unwrap();
        for _ in 0..12 {
            c.ingest(SkeletonFrame::new(vec![pointing_back(7), arm_down(8)], 0.0));
        }
        c.select_device("a").unwrap();
        assert_eq!(lamp_hits(&c).len(), 2);

        for _ in 0..3 {
            c.ingest(SkeletonFrame::new(vec![pointing_back(7), raising(8)], 0.0));
        }
        assert_eq!(c.activate("b").unwrap(), 8);

        assert_eq!(c.session_state("a").unwrap(), SessionState::Registered);
        assert_eq!(lamp_hits(&c), vec![2.5]);
    }

    #[test]
    fn test_deactivate_drops_pending_selection() {
        let c = armed_with_lamp();
        c.deactivate(CLIENT).unwrap();
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Registered);
        assert_eq!(lamp_hits(&c), vec![2.5]);
    }

    #[test]
    fn test_window_collection_toggle() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 2);
        assert_eq!(c.activate(CLIENT), Err(PointingError::NoGestureFound));

        // without a window the live frame alone counts
        c.set_window_collection(false);
        assert_eq!(lock(&c.sensor).store.window_len(), 0);
        feed(&c, raising(7), 1);
        assert_eq!(c.activate(CLIENT).unwrap(), 7);
    }

    #[test]
    fn test_unregister_withdraws_pending_sample() {
        let c = armed_with_lamp();
        let lamp = c.stats().samples["lamp"];
        c.unregister(CLIENT).unwrap();
        assert_eq!(c.stats().samples["lamp"], lamp - 1);
        assert!(lock(&c.sensor).tracker.tracked().is_empty());
    }

    #[test]
    fn test_deactivate_frees_slot() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();
        c.deactivate(CLIENT).unwrap();
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Registered);
        assert!(!lock(&c.sensor).tracker.is_tracked(7));
    }

    #[test]
    fn test_device_management() {
        let c = controller();
        let added = c.add_device("Plugwise", None, "Heater").unwrap();
        assert_eq!(added.id, "Plugwise_1");
        assert_eq!(c.list_devices().len(), 3);
        assert_eq!(c.reset_device_samples("lamp").unwrap(), 1);
        c.remove_device("fan").unwrap();
        assert_eq!(c.list_devices().len(), 2);
        assert!(!c.stats().samples.contains_key("fan"));
    }

    #[test]
    fn test_recalibration_moves_the_room_frame() {
        let c = controller();
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();
        feed(&c, pointing_back(7), 12);

        // turned half way round, the same joints land behind the room
        c.recalibrate(&SensorPlacement {
            position: [0.0, 0.0, 0.0],
            tilt_degrees: 0.0,
            orientation_degrees: 180.0,
        });
        assert_eq!(c.select_device(CLIENT).err(), Some(PointingError::NoHit));
    }

    #[tokio::test]
    async fn test_feed_drives_ingestion() {
        let c = Arc::new(controller());
        c.register(CLIENT).unwrap();
        let (tx, rx) = frame_feed();
        let pump = c.spawn_feed(rx);

        tx.deliver(SkeletonFrame::new(vec![raising(7)], 0.0));
        for _ in 0..100 {
            if lock(&c.sensor).store.body(7).is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(lock(&c.sensor).store.body(7).is_some());

        drop(tx);
        assert_eq!(pump.await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_selection_races_frame_delivery() {
        let c = Arc::new(controller());
        c.register(CLIENT).unwrap();
        feed(&c, raising(7), 3);
        c.activate(CLIENT).unwrap();

        let (tx, rx) = frame_feed();
        let pump = c.spawn_feed(rx);
        let selector = {
            let c = Arc::clone(&c);
            tokio::task::spawn_blocking(move || {
                (0..300)
                    .map(|_| c.select_device(CLIENT).map(|s| s.device.id))
                    .collect::<Vec<_>>()
            })
        };

        let aside = make_body(7, shoulder(), shoulder() + Vector3::new(0.05, 0.0, 0.55));
        for i in 0..100 {
            let body = if i % 2 == 0 { pointing_back(7) } else { aside.clone() };
            tx.deliver(SkeletonFrame::new(vec![body], i as f64));
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        // the user walks out while requests may still be in flight
        tx.deliver(SkeletonFrame::default());
        for _ in 0..100 {
            if c.session_state(CLIENT).unwrap() == SessionState::Registered {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let results = selector.await.unwrap();
        drop(tx);
        pump.await.unwrap();

        assert_eq!(results.len(), 300);
        for result in &results {
            match result {
                Ok(device) => assert_eq!(device, "lamp"),
                Err(e) => assert!(
                    matches!(
                        e,
                        PointingError::NoHit
                            | PointingError::NotTracking(_)
                            | PointingError::NoBodiesInFrame
                            | PointingError::BodyNotVisible(7)
                    ),
                    "unexpected failure {e:?}"
                ),
            }
        }
        assert_eq!(c.session_state(CLIENT).unwrap(), SessionState::Registered);
        assert_eq!(lamp_hits(&c), vec![2.5]);
    }
}
