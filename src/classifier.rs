// src/classifier.rs
use nalgebra::Vector3;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::devices::DeviceCatalog;
use crate::error::{PointingError, PointingResult};
use crate::sampler::FeatureSample;
use crate::store::SampleStore;

#[derive(Debug, Clone)]
struct Entry {
    /// Global insertion counter, used to break distance ties.
    seq: u64,
    sample: FeatureSample,
    /// Whether the sample has a row in the sample store.
    persisted: bool,
}

/// Labeled samples per device, each sequence in insertion order.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    by_device: BTreeMap<String, Vec<Entry>>,
    next_seq: u64,
}

impl TrainingSet {
    /// Appends a sample and returns its sequence number.
    pub fn push(&mut self, device_id: &str, sample: FeatureSample) -> u64 {
        self.insert(device_id, sample, true)
    }

    fn insert(&mut self, device_id: &str, sample: FeatureSample, persisted: bool) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.by_device
            .entry(device_id.to_string())
            .or_default()
            .push(Entry { seq, sample, persisted });
        seq
    }

    pub fn pop(&mut self, device_id: &str) -> Option<FeatureSample> {
        let pos = self.last_position(device_id)?;
        self.remove_at(device_id, pos).map(|(sample, _)| sample)
    }

    /// Removes the sample pushed with sequence number `seq`.
    pub fn remove(&mut self, device_id: &str, seq: u64) -> Option<FeatureSample> {
        let pos = self.position(device_id, seq)?;
        self.remove_at(device_id, pos).map(|(sample, _)| sample)
    }

    fn position(&self, device_id: &str, seq: u64) -> Option<usize> {
        self.by_device.get(device_id)?.iter().position(|e| e.seq == seq)
    }

    fn last_position(&self, device_id: &str) -> Option<usize> {
        self.by_device.get(device_id)?.len().checked_sub(1)
    }

    /// Removes the entry at `pos` of the device's sequence, together with
    /// its row index among the device's stored samples (`None` when the
    /// sample never reached the store).
    fn remove_at(&mut self, device_id: &str, pos: usize) -> Option<(FeatureSample, Option<usize>)> {
        let entries = self.by_device.get_mut(device_id)?;
        if pos >= entries.len() {
            return None;
        }
        let row = entries[..pos].iter().filter(|e| e.persisted).count();
        let entry = entries.remove(pos);
        Some((entry.sample, entry.persisted.then_some(row)))
    }

    pub fn clear(&mut self, device_id: &str) -> usize {
        self.by_device
            .remove(device_id)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    /// Device of the closest sample and its distance. Equal distances go to
    /// the sample inserted first.
    pub fn nearest(&self, point: &Vector3<f64>) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64, u64)> = None;
        for (device, entries) in &self.by_device {
            for entry in entries {
                let d = (entry.sample.hit - point).norm();
                let closer = match best {
                    None => true,
                    Some((_, best_d, best_seq)) => d < best_d || (d == best_d && entry.seq < best_seq),
                };
                if closer {
                    best = Some((device.as_str(), d, entry.seq));
                }
            }
        }
        best.map(|(device, d, _)| (device, d))
    }

    pub fn samples(&self, device_id: &str) -> impl Iterator<Item = &FeatureSample> + '_ {
        self.by_device
            .get(device_id)
            .into_iter()
            .flat_map(|entries| entries.iter().map(|e| &e.sample))
    }

    pub fn count(&self, device_id: &str) -> usize {
        self.by_device.get(device_id).map_or(0, Vec::len)
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.by_device
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(device, entries)| (device.clone(), entries.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_device.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// k=1 nearest neighbour over wall hit points.
pub struct Classifier {
    training: TrainingSet,
    catalog: DeviceCatalog,
    store: Box<dyn SampleStore>,
}

impl Classifier {
    pub fn new(catalog: DeviceCatalog, store: Box<dyn SampleStore>) -> Self {
        Self {
            training: TrainingSet::default(),
            catalog,
            store,
        }
    }

    /// Fills the training set from the store without writing back to it.
    /// Samples for devices missing from the catalog are skipped.
    pub fn seed(&mut self) -> anyhow::Result<usize> {
        let mut seeded = 0;
        for sample in self.store.load()? {
            let Some(device) = sample.label.clone() else {
                continue;
            };
            if !self.catalog.contains(&device) {
                warn!(device = %device, "persisted sample for unknown device skipped");
                continue;
            }
            self.training.push(&device, sample);
            seeded += 1;
        }
        info!(samples = seeded, "training set seeded");
        Ok(seeded)
    }

    pub fn classify(&self, sample: &FeatureSample) -> PointingResult<String> {
        let (device, distance) = self
            .training
            .nearest(&sample.hit)
            .ok_or(PointingError::NoTrainingData)?;
        debug!(device, distance, "sample classified");
        Ok(device.to_string())
    }

    /// Adds a labeled sample and returns the sequence number that
    /// [`Classifier::withdraw_sample`] takes.
    pub fn add_sample(&mut self, device_id: &str, sample: FeatureSample) -> PointingResult<u64> {
        self.catalog.require(device_id)?;
        let sample = sample.labeled(device_id);

        let persisted = match self.store.append(&sample) {
            Ok(()) => true,
            Err(e) => {
                warn!(device = device_id, error = %e, "failed to persist added sample, kept in memory only");
                false
            }
        };
        let seq = self.training.insert(device_id, sample, persisted);
        debug!(device = device_id, seq, count = self.training.count(device_id), "sample added");
        Ok(seq)
    }

    /// Drops the most recent sample of `device_id`. Nothing happens when the
    /// device has no samples.
    pub fn remove_last_sample(&mut self, device_id: &str) -> Option<FeatureSample> {
        let pos = self.training.last_position(device_id)?;
        self.remove_entry(device_id, pos)
    }

    /// Drops exactly the sample added under `seq`, wherever it sits in the
    /// device's sequence. Nothing happens when it is already gone.
    pub fn withdraw_sample(&mut self, device_id: &str, seq: u64) -> Option<FeatureSample> {
        let pos = self.training.position(device_id, seq)?;
        self.remove_entry(device_id, pos)
    }

    fn remove_entry(&mut self, device_id: &str, pos: usize) -> Option<FeatureSample> {
        let (removed, row) = self.training.remove_at(device_id, pos)?;
        match row {
            Some(row) => {
                if let Err(e) = self.store.remove(device_id, row) {
                    warn!(device = device_id, error = %e, "failed to persist sample removal");
                }
            }
            None => debug!(device = device_id, "removed sample was never persisted"),
        }
        debug!(device = device_id, count = self.training.count(device_id), "sample removed");
        Some(removed)
    }

    pub fn clear_device(&mut self, device_id: &str) -> PointingResult<usize> {
        self.catalog.require(device_id)?;
        let cleared = self.training.clear(device_id);
        if let Err(e) = self.store.clear_device(device_id) {
            warn!(device = device_id, error = %e, "failed to persist cleared samples");
        }
        info!(device = device_id, cleared, "device samples reset");
        Ok(cleared)
    }

    /// Removes the device from the catalog together with its samples.
    pub fn remove_device(&mut self, device_id: &str) -> PointingResult<()> {
        self.clear_device(device_id)?;
        self.catalog.remove(device_id)?;
        Ok(())
    }

    pub fn training(&self) -> &TrainingSet {
        &self.training
    }

    pub fn sample_count(&self, device_id: &str) -> usize {
        self.training.count(device_id)
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut DeviceCatalog {
        &mut self.catalog
    }
}

#[cfg(test)]
pub(crate) fn hit_sample(x: f64, y: f64, z: f64) -> FeatureSample {
    use crate::sampler::Wall;
    FeatureSample {
        hit: Vector3::new(x, y, z),
        wall: Wall::Back,
        distance: 1.0,
        label: None,
        shoulder: Vector3::new(x, 1.4, 1.0),
        wrist: Vector3::new(x, 1.3, 1.5),
    }
}
