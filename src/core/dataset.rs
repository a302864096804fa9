//! Ordered, immutable collection of observations.
//!
//! Ordering contract: `group_by` and `unique` return groups in the order in
//! which each distinct key is first encountered. Nothing here sorts; callers
//! that need numeric order sort explicitly.

use std::sync::Arc;

use crate::core::observation::{NoiseType, Observation, Polarity};

#[derive(Debug, Clone, Default)]
pub struct Dataset {
    rows: Arc<[Observation]>,
}

impl Dataset {
    pub fn new(rows: Vec<Observation>) -> Self {
        Self { rows: rows.into() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.rows.iter()
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn filter<P>(&self, pred: P) -> Dataset
    where
        P: Fn(&Observation) -> bool,
    {
        Dataset::new(self.rows.iter().filter(|o| pred(o)).cloned().collect())
    }

    /// Split into sub-datasets by key, in first-seen key order.
    pub fn group_by<K, F>(&self, key: F) -> Vec<(K, Dataset)>
    where
        K: PartialEq,
        F: Fn(&Observation) -> K,
    {
        let mut keys: Vec<K> = Vec::new();
        let mut buckets: Vec<Vec<Observation>> = Vec::new();
        for obs in self.rows.iter() {
            let k = key(obs);
            match keys.iter().position(|existing| *existing == k) {
                Some(i) => buckets[i].push(obs.clone()),
                None => {
                    keys.push(k);
                    buckets.push(vec![obs.clone()]);
                }
            }
        }
        keys.into_iter()
            .zip(buckets)
            .map(|(k, rows)| (k, Dataset::new(rows)))
            .collect()
    }

    /// Distinct key values in first-seen order.
    pub fn unique<K, F>(&self, key: F) -> Vec<K>
    where
        K: PartialEq,
        F: Fn(&Observation) -> K,
    {
        let mut out: Vec<K> = Vec::new();
        for obs in self.rows.iter() {
            let k = key(obs);
            if !out.contains(&k) {
                out.push(k);
            }
        }
        out
    }

    pub fn subjects(&self) -> Vec<String> {
        self.unique(|o| o.subject.clone())
    }

    pub fn by_subject(&self) -> Vec<(String, Dataset)> {
        self.group_by(|o| o.subject.clone())
    }

    pub fn by_grating(&self) -> Vec<(f64, Dataset)> {
        self.group_by(|o| o.grating_freq)
    }

    pub fn with_noise_type(&self, noise_type: NoiseType) -> Dataset {
        self.filter(|o| o.noise_type == noise_type)
    }

    pub fn with_polarity(&self, polarity: Polarity) -> Dataset {
        self.filter(|o| o.polarity == polarity)
    }

    pub fn match_lums(&self) -> Vec<f64> {
        self.rows.iter().map(|o| o.match_lum).collect()
    }

    /// The single subject carried by every row, if there is exactly one.
    pub fn single_subject(&self) -> Option<&str> {
        let first = self.rows.first()?;
        self.rows
            .iter()
            .all(|o| o.subject == first.subject)
            .then_some(first.subject.as_str())
    }

    /// Concatenate, preserving the order of `self` then `other`.
    pub fn join(&self, other: &Dataset) -> Dataset {
        let mut rows = self.rows.to_vec();
        rows.extend(other.rows.iter().cloned());
        Dataset::new(rows)
    }
}

impl FromIterator<Observation> for Dataset {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        Dataset::new(iter.into_iter().collect())
    }
}
