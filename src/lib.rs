// src/lib.rs
//! Select room devices by pointing at them.
//!
//! Skeleton frames from a depth sensor flow through [`skeleton::FrameStore`];
//! users bind to a body with an activation gesture ([`tracker`]), their arm is
//! projected onto the room walls ([`transform`], [`sampler`]) and the wall hit
//! point is matched against trained device positions ([`classifier`]).
//! [`controller::PointingController`] ties the pieces together for request
//! handlers.

pub mod classifier;
pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod feed;
pub mod sampler;
pub mod session;
pub mod skeleton;
pub mod store;
pub mod tracker;
pub mod transform;

pub use classifier::Classifier;
pub use config::PointingConfig;
pub use controller::{PointingController, Selection, SessionStatus, Stats};
pub use error::{PointingError, PointingResult};
pub use session::{Feedback, SessionState};
pub use skeleton::{Body, BodyId, JointType, SkeletonFrame};
