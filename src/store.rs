// src/store.rs
use anyhow::{Context, Result};
use chrono::Local;
use csv::{ReaderBuilder, WriterBuilder};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::sampler::{FeatureSample, Wall};

/// Durable home of the labeled training samples. The classifier calls it on
/// every mutation; errors are logged by the caller, never propagated.
pub trait SampleStore: Send {
    fn load(&self) -> Result<Vec<FeatureSample>>;
    fn append(&mut self, sample: &FeatureSample) -> Result<()>;
    /// Removes the `index`-th stored sample of `device_id`, counted in
    /// insertion order. An index past the end is ignored.
    fn remove(&mut self, device_id: &str, index: usize) -> Result<()>;
    fn clear_device(&mut self, device_id: &str) -> Result<()>;
}

/// Keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSampleStore;

impl SampleStore for NullSampleStore {
    fn load(&self) -> Result<Vec<FeatureSample>> {
        Ok(Vec::new())
    }

    fn append(&mut self, _sample: &FeatureSample) -> Result<()> {
        Ok(())
    }

    fn remove(&mut self, _device_id: &str, _index: usize) -> Result<()> {
        Ok(())
    }

    fn clear_device(&mut self, _device_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SampleRecord {
    recorded_at: String,
    device: String,
    wall: String,
    hit_x: f64,
    hit_y: f64,
    hit_z: f64,
    distance: f64,
    shoulder_x: f64,
    shoulder_y: f64,
    shoulder_z: f64,
    wrist_x: f64,
    wrist_y: f64,
    wrist_z: f64,
}

impl SampleRecord {
    fn from_sample(sample: &FeatureSample) -> Option<Self> {
        Some(Self {
            recorded_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            device: sample.label.clone()?,
            wall: sample.wall.as_str().to_string(),
            hit_x: sample.hit.x,
            hit_y: sample.hit.y,
            hit_z: sample.hit.z,
            distance: sample.distance,
            shoulder_x: sample.shoulder.x,
            shoulder_y: sample.shoulder.y,
            shoulder_z: sample.shoulder.z,
            wrist_x: sample.wrist.x,
            wrist_y: sample.wrist.y,
            wrist_z: sample.wrist.z,
        })
    }

    fn into_sample(self) -> Option<FeatureSample> {
        Some(FeatureSample {
            hit: Vector3::new(self.hit_x, self.hit_y, self.hit_z),
            wall: Wall::parse(&self.wall)?,
            distance: self.distance,
            label: Some(self.device),
            shoulder: Vector3::new(self.shoulder_x, self.shoulder_y, self.shoulder_z),
            wrist: Vector3::new(self.wrist_x, self.wrist_y, self.wrist_z),
        })
    }
}

/// One CSV row per labeled sample, in insertion order.
pub struct CsvSampleStore {
    path: PathBuf,
}

impl CsvSampleStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_records(&self) -> Result<Vec<SampleRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut reader = ReaderBuilder::new().from_reader(file);
        let mut records = Vec::new();
        for row in reader.deserialize() {
            records.push(row.context("Malformed sample row")?);
        }
        Ok(records)
    }

    fn write_records(&self, records: &[SampleRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)
            .with_context(|| format!("Failed to rewrite {}", self.path.display()))?;
        let mut writer = WriterBuilder::new().from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl SampleStore for CsvSampleStore {
    fn load(&self) -> Result<Vec<FeatureSample>> {
        let records = self.read_records()?;
        let total = records.len();
        let samples: Vec<FeatureSample> = records
            .into_iter()
            .filter_map(SampleRecord::into_sample)
            .collect();
        debug!(path = %self.path.display(), loaded = samples.len(), skipped = total - samples.len(), "samples loaded");
        Ok(samples)
    }

    fn append(&mut self, sample: &FeatureSample) -> Result<()> {
        let record = SampleRecord::from_sample(sample).context("Cannot persist an unlabeled sample")?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let is_new = !self.path.exists() || std::fs::metadata(&self.path)?.len() == 0;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;

        let mut writer = WriterBuilder::new().has_headers(is_new).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    fn remove(&mut self, device_id: &str, index: usize) -> Result<()> {
        let mut records = self.read_records()?;
        let row = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.device == device_id)
            .nth(index)
            .map(|(row, _)| row);
        if let Some(row) = row {
            records.remove(row);
            self.write_records(&records)?;
        }
        Ok(())
    }

    fn clear_device(&mut self, device_id: &str) -> Result<()> {
        let mut records = self.read_records()?;
        records.retain(|r| r.device != device_id);
        self.write_records(&records)
    }
}
