// src/main.rs
//! Demo driver: a simulated sensor feeds one user who calibrates two devices,
//! then selects and controls them.

use anyhow::Result;
use nalgebra::Vector3;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use point_control::devices::DeviceCatalog;
use point_control::feed::{frame_feed, FrameSender};
use point_control::store::{CsvSampleStore, NullSampleStore, SampleStore};
use point_control::{Body, BodyId, Classifier, JointType, PointingConfig, PointingController, SkeletonFrame};

const CLIENT: &str = "127.0.0.1";
const USER: BodyId = 1;
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Generates sensor frames for one standing user with a slight sway.
struct SimulatedSensor {
    sim_time: f64,
}

impl SimulatedSensor {
    fn new() -> Self {
        Self { sim_time: 0.0 }
    }

    fn frame(&mut self, aim: Vector3<f64>) -> SkeletonFrame {
        let t = self.sim_time;
        self.sim_time += FRAME_INTERVAL.as_secs_f64();

        let sway = Vector3::new(0.01 * t.sin(), 0.0, 0.01 * (t * 0.7).cos());
        let right_shoulder = Vector3::new(2.3, 1.45, 2.0) + sway;
        let left_shoulder = Vector3::new(2.7, 1.45, 2.0) + sway;
        let right_wrist = right_shoulder + aim.normalize() * 0.6;

        let body = Body::new(USER)
            .with_joint(JointType::Head, Vector3::new(2.5, 1.75, 2.0) + sway)
            .with_joint(JointType::SpineShoulder, Vector3::new(2.5, 1.4, 2.0) + sway)
            .with_joint(JointType::SpineBase, Vector3::new(2.5, 0.9, 2.0) + sway)
            .with_joint(JointType::ShoulderRight, right_shoulder)
            .with_joint(JointType::ElbowRight, (right_shoulder + right_wrist) / 2.0)
            .with_joint(JointType::WristRight, right_wrist)
            .with_joint(JointType::ShoulderLeft, left_shoulder)
            .with_joint(JointType::ElbowLeft, left_shoulder + Vector3::new(0.02, -0.28, 0.0))
            .with_joint(JointType::WristLeft, left_shoulder + Vector3::new(0.03, -0.5, 0.05));

        SkeletonFrame::new(vec![body], t)
    }

    async fn play(&mut self, tx: &FrameSender, aim: Vector3<f64>, frames: usize) {
        for _ in 0..frames {
            tx.deliver(self.frame(aim));
            tokio::time::sleep(FRAME_INTERVAL).await;
        }
    }
}

fn report<T: std::fmt::Debug>(step: &str, result: point_control::PointingResult<T>) -> Option<T> {
    match result {
        Ok(value) => {
            println!("{:<24} {:?}", step, value);
            Some(value)
        }
        Err(e) => {
            println!("{:<24} failed: {} ({})", step, e, e.guidance());
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(PointingConfig::default_path);
    let config = PointingConfig::load(&config_path)?;

    let store: Box<dyn SampleStore> = match &config.samples_path {
        Some(path) => Box::new(CsvSampleStore::new(path)),
        None => Box::new(NullSampleStore),
    };
    let mut catalog = DeviceCatalog::new();
    catalog.add("lamp", "Floor lamp")?;
    catalog.add("fan", "Desk fan")?;
    let mut classifier = Classifier::new(catalog, store);
    classifier.seed()?;

    let controller = Arc::new(PointingController::new(&config, classifier));
    let (tx, rx) = frame_feed();
    let pump = controller.spawn_feed(rx);
    let mut sensor = SimulatedSensor::new();

    let raise = Vector3::new(0.0, 1.0, 0.0);
    let at_lamp = Vector3::new(0.3, 0.1, 1.0);
    let at_fan = Vector3::new(-1.0, 0.0, 0.4);

    report("register", controller.register(CLIENT));
    sensor.play(&tx, raise, 10).await;
    report("activate", controller.activate(CLIENT));

    sensor.play(&tx, at_lamp, 15).await;
    report("collect lamp", controller.collect_sample(CLIENT, "lamp").map(|s| s.hit));
    sensor.play(&tx, at_fan, 15).await;
    report("collect fan", controller.collect_sample(CLIENT, "fan").map(|s| s.hit));

    sensor.play(&tx, at_lamp, 15).await;
    if let Some(selection) = report("select", controller.select_device(CLIENT).map(|s| s.device)) {
        report("control", controller.control_device(CLIENT, Some(selection.id.as_str())));
    }

    sensor.play(&tx, at_fan, 15).await;
    report("select", controller.select_device(CLIENT).map(|s| s.device));
    // the user meant the lamp after all
    report("control", controller.control_device(CLIENT, Some("lamp")));

    sensor.play(&tx, raise, 15).await;
    report("select (arm up)", controller.select_device(CLIENT).map(|s| s.device));

    tx.deliver(SkeletonFrame::new(Vec::new(), sensor.sim_time));
    tokio::time::sleep(FRAME_INTERVAL).await;
    report("status", controller.take_notifications(CLIENT));

    drop(tx);
    let consumed = pump.await?;
    let stats = controller.stats();
    info!(
        frames = consumed,
        classifications = stats.classifications,
        misclassifications = stats.misclassifications,
        "demo finished"
    );
    println!("samples per device: {:?}", stats.samples);
    Ok(())
}
