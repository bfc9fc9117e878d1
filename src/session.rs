// src/session.rs
use chrono::{DateTime, Local};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::error::{PointingError, PointingResult};
use crate::sampler::FeatureSample;
use crate::skeleton::BodyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    Tracking,
    ArmedSelection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub at: DateTime<Local>,
    pub message: String,
}

/// How a control command settled the pending classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    /// Nothing was waiting for feedback.
    None,
    /// The user controlled the offered device.
    Confirmed { device: String },
    /// The user controlled something else. `contribution` is the sequence
    /// number of the classified sample when it went into the training set
    /// during this interaction.
    Corrected { device: String, contribution: Option<u64> },
}

/// Application state of one registered user, keyed by client address.
#[derive(Debug, Clone)]
pub struct TrackedSession {
    pub client: String,
    pub id: Uuid,
    pub body: Option<BodyId>,
    pub tracking: bool,
    pub last_device: Option<String>,
    /// Present only while `device_id_checked` is false.
    pub last_sample: Option<FeatureSample>,
    pub device_id_checked: bool,
    contribution: Option<u64>,
    notifications: Vec<Notification>,
}

impl TrackedSession {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            id: Uuid::new_v4(),
            body: None,
            tracking: false,
            last_device: None,
            last_sample: None,
            device_id_checked: true,
            contribution: None,
            notifications: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if !self.tracking || self.body.is_none() {
            SessionState::Registered
        } else if self.is_armed() {
            SessionState::ArmedSelection
        } else {
            SessionState::Tracking
        }
    }

    pub fn is_armed(&self) -> bool {
        !self.device_id_checked && self.last_sample.is_some()
    }

    pub fn bind(&mut self, body: BodyId) {
        self.body = Some(body);
        self.tracking = true;
    }

    /// Loses the body. A pending selection goes with it; the returned
    /// device and sequence number name its provisional sample, if any.
    #[must_use]
    pub fn unbind(&mut self) -> Option<(String, u64)> {
        self.body = None;
        self.tracking = false;
        self.disarm()
    }

    /// Offers `device` to the user and waits for the next control command.
    /// `contribution` is the sequence number of the sample added to the
    /// training set for this selection.
    pub fn arm(&mut self, device: impl Into<String>, sample: FeatureSample, contribution: Option<u64>) {
        self.last_device = Some(device.into());
        self.last_sample = Some(sample);
        self.device_id_checked = false;
        self.contribution = contribution;
    }

    /// Drops a pending selection without judging it. Returns the device and
    /// sequence number of the provisional sample to withdraw, if any.
    pub fn disarm(&mut self) -> Option<(String, u64)> {
        if !self.is_armed() {
            return None;
        }
        let contribution = self.contribution.take();
        self.last_sample = None;
        self.device_id_checked = true;
        let device = self.last_device.take()?;
        contribution.map(|seq| (device, seq))
    }

    /// Settles the pending classification against the device the user chose
    /// to control (`None` for no device).
    pub fn resolve_feedback(&mut self, target: Option<&str>) -> Feedback {
        if !self.is_armed() {
            return Feedback::None;
        }
        let Some(offered) = self.last_device.clone() else {
            return Feedback::None;
        };

        if target == Some(offered.as_str()) {
            self.device_id_checked = true;
            self.last_sample = None;
            self.contribution = None;
            return Feedback::Confirmed { device: offered };
        }

        let contribution = self.contribution.take();
        self.last_device = None;
        self.last_sample = None;
        self.device_id_checked = true;
        Feedback::Corrected {
            device: offered,
            contribution,
        }
    }

    pub fn notify(&mut self, message: impl Into<String>) {
        self.notifications.push(Notification {
            at: Local::now(),
            message: message.into(),
        });
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, TrackedSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: &str) -> PointingResult<&mut TrackedSession> {
        if self.sessions.contains_key(client) {
            return Err(PointingError::SessionExists(client.to_string()));
        }
        let session = TrackedSession::new(client);
        info!(client, session = %session.id, "session registered");
        Ok(self.sessions.entry(client.to_string()).or_insert(session))
    }

    pub fn unregister(&mut self, client: &str) -> PointingResult<TrackedSession> {
        let session = self
            .sessions
            .remove(client)
            .ok_or_else(|| PointingError::SessionNotFound(client.to_string()))?;
        info!(client, session = %session.id, "session removed");
        Ok(session)
    }

    pub fn get(&self, client: &str) -> PointingResult<&TrackedSession> {
        self.sessions
            .get(client)
            .ok_or_else(|| PointingError::SessionNotFound(client.to_string()))
    }

    pub fn get_mut(&mut self, client: &str) -> PointingResult<&mut TrackedSession> {
        self.sessions
            .get_mut(client)
            .ok_or_else(|| PointingError::SessionNotFound(client.to_string()))
    }

    /// Sessions bound to `body`.
    pub fn bound_to(&mut self, body: BodyId) -> impl Iterator<Item = &mut TrackedSession> + '_ {
        self.sessions
            .values_mut()
            .filter(move |s| s.body == Some(body))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
