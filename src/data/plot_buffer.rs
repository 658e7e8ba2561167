//! Rolling sample window for live plotting.
//!
//! Holds up to three series (x, y, z). Scalar samples go to the first series.
//! Each series keeps at most `max_points` samples, oldest dropped first, and
//! is keyed `0..len` when plotted.

use std::collections::VecDeque;

use crate::protocol::telemetry::Telemetry;

/// Smallest allowed window.
pub const MIN_PLOT_POINTS: usize = 100;

/// Largest allowed window.
pub const MAX_PLOT_POINTS: usize = 500;

/// Default window.
pub const DEFAULT_PLOT_POINTS: usize = 200;

/// A plot series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Axis {
    /// First series, also used for scalar samples.
    X,
    /// Second series.
    Y,
    /// Third series.
    Z,
}

impl Axis {
    /// All series in order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Bounded history of decoded samples.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotBuffer {
    max_points: usize,
    series: [VecDeque<i16>; 3],
}

impl Default for PlotBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_PLOT_POINTS)
    }
}

impl PlotBuffer {
    /// Create a buffer; `max_points` is clamped to the allowed range.
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.clamp(MIN_PLOT_POINTS, MAX_PLOT_POINTS),
            series: Default::default(),
        }
    }

    /// Current window size.
    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Change the window size, trimming the oldest samples if it shrinks.
    pub fn set_max_points(&mut self, max_points: usize) {
        self.max_points = max_points.clamp(MIN_PLOT_POINTS, MAX_PLOT_POINTS);
        for axis in Axis::ALL {
            self.trim(axis);
        }
    }

    /// Append a scalar sample.
    pub fn push_scalar(&mut self, value: i16) {
        self.push(Axis::X, value);
    }

    /// Append an (x, y, z) sample.
    pub fn push_triple(&mut self, [x, y, z]: [i16; 3]) {
        self.push(Axis::X, x);
        self.push(Axis::Y, y);
        self.push(Axis::Z, z);
    }

    /// Append every sample of a decoded payload; text is ignored.
    ///
    /// Returns the number of readings added.
    pub fn extend(&mut self, telemetry: &Telemetry) -> usize {
        match telemetry {
            Telemetry::Text(_) => 0,
            Telemetry::Scalar(values) => {
                values.iter().for_each(|v| self.push_scalar(*v));
                values.len()
            }
            Telemetry::Triaxial(values) => {
                values.iter().for_each(|v| self.push_triple(*v));
                values.len()
            }
        }
    }

    /// Samples of a series.
    pub fn values(&self, axis: Axis) -> impl Iterator<Item = i16> + '_ {
        self.series[axis.index()].iter().copied()
    }

    /// `(index, value)` pairs of a series, keyed `0..len`.
    pub fn points(&self, axis: Axis) -> Vec<(f64, f64)> {
        self.values(axis)
            .enumerate()
            .map(|(i, v)| (i as f64, f64::from(v)))
            .collect()
    }

    /// Number of samples in a series.
    pub fn len(&self, axis: Axis) -> usize {
        self.series[axis.index()].len()
    }

    /// Check if every series is empty.
    pub fn is_empty(&self) -> bool {
        self.series.iter().all(VecDeque::is_empty)
    }

    /// Smallest and largest sample across all series.
    pub fn bounds(&self) -> Option<(i16, i16)> {
        let mut all = self.series.iter().flatten().copied();
        let first = all.next()?;
        Some(all.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.series.iter_mut().for_each(VecDeque::clear);
    }

    fn push(&mut self, axis: Axis, value: i16) {
        self.series[axis.index()].push_back(value);
        self.trim(axis);
    }

    fn trim(&mut self, axis: Axis) {
        let series = &mut self.series[axis.index()];
        while series.len() > self.max_points {
            series.pop_front();
        }
    }
}
