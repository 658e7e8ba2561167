//! Data structures for decoded telemetry.

pub mod plot_buffer;

pub use plot_buffer::{Axis, PlotBuffer, DEFAULT_PLOT_POINTS, MAX_PLOT_POINTS, MIN_PLOT_POINTS};
