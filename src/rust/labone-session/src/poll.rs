// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Bounded polling of subscribed paths with partial-result accumulation.

use std::fmt::Write;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use labone_log::{diagnostic, warn};

use crate::node::{ImpedanceSample, NodeData, NodePath};
use crate::session::{PollResult, Session};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Wall-clock bound for the whole acquisition.
    pub timeout: Duration,
    /// Recording time of a single poll.
    pub recording: Duration,
    /// How long a single poll waits for the first data.
    pub poll_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            timeout: Duration::from_secs(10),
            recording: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// How many samples a path delivered compared to the expected count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathShortfall {
    pub path: NodePath,
    pub obtained: usize,
    pub expected: usize,
}

pub(crate) fn format_shortfall(shortfall: &[PathShortfall]) -> String {
    let mut msg = String::new();
    for entry in shortfall {
        let _ = writeln!(
            msg,
            "Path {}: Got {} of {} samples",
            entry.path, entry.obtained, entry.expected
        );
    }
    msg
}

#[derive(Debug, Default)]
struct PathChunks {
    chunks: Vec<NodeData>,
    obtained: usize,
}

/// Collects chunks per subscribed path until each reached a target length.
///
/// Data for paths that were not registered is ignored.
#[derive(Debug)]
pub struct Accumulator {
    target: usize,
    paths: IndexMap<NodePath, PathChunks>,
}

impl Accumulator {
    pub fn new(paths: &[NodePath], target: usize) -> Self {
        Accumulator {
            target,
            paths: paths
                .iter()
                .map(|p| (p.clone(), PathChunks::default()))
                .collect(),
        }
    }

    pub fn extend(&mut self, dataset: PollResult) {
        for (path, chunks) in dataset {
            let Some(entry) = self.paths.get_mut(&path) else {
                continue;
            };
            for chunk in chunks {
                entry.obtained += chunk.len();
                entry.chunks.push(chunk);
            }
            diagnostic!(
                "{}: {} of {} samples",
                path,
                entry.obtained,
                self.target
            );
        }
    }

    pub fn obtained(&self, path: &NodePath) -> usize {
        self.paths.get(path).map_or(0, |p| p.obtained)
    }

    pub fn is_complete(&self) -> bool {
        self.paths.values().all(|p| p.obtained >= self.target)
    }

    pub fn shortfall(&self) -> Vec<PathShortfall> {
        self.paths
            .iter()
            .filter(|(_, chunks)| chunks.obtained < self.target)
            .map(|(path, chunks)| PathShortfall {
                path: path.clone(),
                obtained: chunks.obtained,
                expected: self.target,
            })
            .collect()
    }

    /// Concatenate the vector chunks of every path.
    pub fn into_vectors(self) -> Result<IndexMap<NodePath, Vec<f64>>> {
        self.paths
            .into_iter()
            .map(|(path, entry)| {
                let mut flat = Vec::with_capacity(entry.obtained);
                for chunk in entry.chunks {
                    match chunk {
                        NodeData::Vector(v) => flat.extend(v),
                        other => {
                            return Err(anyhow::anyhow!(
                                "Expected vector data on {path}, got {}",
                                other.kind()
                            )
                            .into());
                        }
                    }
                }
                Ok((path, flat))
            })
            .collect()
    }

    /// Concatenate the impedance samples of every path.
    pub fn into_impedance(self) -> Result<IndexMap<NodePath, Vec<ImpedanceSample>>> {
        self.paths
            .into_iter()
            .map(|(path, entry)| {
                let mut flat = Vec::with_capacity(entry.obtained);
                for chunk in entry.chunks {
                    match chunk {
                        NodeData::Impedance(v) => flat.extend(v),
                        other => {
                            return Err(anyhow::anyhow!(
                                "Expected impedance samples on {path}, got {}",
                                other.kind()
                            )
                            .into());
                        }
                    }
                }
                Ok((path, flat))
            })
            .collect()
    }
}

/// Poll `paths` until each delivered at least `num_samples` samples.
///
/// The paths must already be subscribed. Fails with
/// [`Error::AcquisitionTimeout`] listing every incomplete path once
/// `settings.timeout` has elapsed; partial data is never returned.
pub fn acquisition_poll<S: Session + ?Sized>(
    session: &mut S,
    paths: &[NodePath],
    num_samples: usize,
    settings: &PollSettings,
) -> Result<IndexMap<NodePath, Vec<f64>>> {
    let mut accumulator = Accumulator::new(paths, num_samples);
    let start = Instant::now();
    while !accumulator.is_complete() {
        if start.elapsed() >= settings.timeout {
            let shortfall = accumulator.shortfall();
            for entry in &shortfall {
                warn!(
                    "Path {}: Got {} of {} samples",
                    entry.path,
                    entry.obtained,
                    entry.expected
                );
            }
            return Err(Error::AcquisitionTimeout {
                timeout: settings.timeout,
                shortfall,
            });
        }
        let dataset = session.poll(settings.recording, settings.poll_timeout)?;
        accumulator.extend(dataset);
    }
    accumulator.into_vectors()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedSession;
    use proptest::prelude::*;

    fn monitor_paths() -> Vec<NodePath> {
        vec![
            NodePath::parse("/dev2266/qas/0/monitor/inputs/0/wave").unwrap(),
            NodePath::parse("/dev2266/qas/0/monitor/inputs/1/wave").unwrap(),
        ]
    }

    fn fast_settings(timeout: Duration) -> PollSettings {
        PollSettings {
            timeout,
            recording: Duration::from_millis(1),
            poll_timeout: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_chunks_concatenated_in_order() {
        let paths = monitor_paths();
        let mut session = SimulatedSession::new();
        session.push_stream(&paths[0], NodeData::Vector(vec![1.0, 2.0]));
        session.push_stream(&paths[0], NodeData::Vector(vec![3.0, 4.0]));
        session.push_stream(&paths[1], NodeData::Vector(vec![5.0, 6.0, 7.0, 8.0]));
        session.subscribe(&paths).unwrap();

        let data =
            acquisition_poll(&mut session, &paths, 4, &fast_settings(Duration::from_secs(5)))
                .unwrap();
        assert_eq!(data[&paths[0]], vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(data[&paths[1]], vec![5.0, 6.0, 7.0, 8.0]);
        assert_eq!(
            data.keys().collect::<Vec<_>>(),
            paths.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_timeout_reports_every_incomplete_path() {
        let paths = monitor_paths();
        let mut session = SimulatedSession::new();
        session.push_stream(&paths[0], NodeData::Vector(vec![0.5; 10]));
        session.push_stream(&paths[1], NodeData::Vector(vec![0.5; 3]));
        session.subscribe(&paths).unwrap();

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let err = acquisition_poll(&mut session, &paths, 10, &fast_settings(timeout)).unwrap_err();
        assert!(start.elapsed() < timeout + Duration::from_millis(500));
        match err {
            Error::AcquisitionTimeout { shortfall, .. } => {
                assert_eq!(
                    shortfall,
                    vec![PathShortfall {
                        path: paths[1].clone(),
                        obtained: 3,
                        expected: 10
                    }]
                );
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_silent_path_times_out_like_slow_one() {
        let paths = monitor_paths();
        let mut session = SimulatedSession::new();
        session.subscribe(&paths).unwrap();
        let err = acquisition_poll(
            &mut session,
            &paths,
            1,
            &fast_settings(Duration::from_millis(20)),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Did not get all results within 0.0 s"));
        assert!(msg.contains("inputs/0/wave: Got 0 of 1 samples"));
        assert!(msg.contains("inputs/1/wave: Got 0 of 1 samples"));
    }

    #[test]
    fn test_unsubscribed_data_ignored() {
        let paths = monitor_paths();
        let mut accumulator = Accumulator::new(&paths[..1], 2);
        let mut dataset = PollResult::new();
        dataset.insert(paths[1].clone(), vec![NodeData::Vector(vec![1.0, 2.0])]);
        accumulator.extend(dataset);
        assert!(!accumulator.is_complete());
        assert_eq!(accumulator.obtained(&paths[1]), 0);
    }

    #[test]
    fn test_mixed_data_kinds_rejected() {
        let paths = monitor_paths();
        let mut accumulator = Accumulator::new(&paths[..1], 1);
        let mut dataset = PollResult::new();
        dataset.insert(paths[0].clone(), vec![NodeData::Demod(vec![])]);
        accumulator.extend(dataset);
        assert!(accumulator.into_vectors().is_err());
    }

    proptest! {
        #[test]
        fn accumulated_vector_equals_concatenated_chunks(
            chunks in proptest::collection::vec(proptest::collection::vec(-1.0f64..1.0, 0..8), 1..12)
        ) {
            let path = NodePath::parse("/dev1/qas/0/result/data/0/wave").unwrap();
            let expected: Vec<f64> = chunks.iter().flatten().copied().collect();
            let mut accumulator = Accumulator::new(std::slice::from_ref(&path), expected.len());
            for chunk in chunks {
                let mut dataset = PollResult::new();
                dataset.insert(path.clone(), vec![NodeData::Vector(chunk)]);
                accumulator.extend(dataset);
            }
            prop_assert!(accumulator.is_complete());
            let data = accumulator.into_vectors().unwrap();
            prop_assert_eq!(&data[&path], &expected);
        }
    }
}
