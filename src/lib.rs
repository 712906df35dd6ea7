//! Source parametrisation engine for 3-D spectral-line data cubes.
//!
//! Turns a list of candidate detections inside an intensity cube plus an
//! integer source-mask cube into a catalogue of physical measurements per
//! detection: position, flux, spectral line widths, elliptical shape and an
//! optional Busy Function fit of the integrated spectrum. Detection and
//! persistence are external; the engine operates purely in memory.

pub mod busyfit;
pub mod catalog;
pub mod cube;
pub mod ellipse;
pub mod mask_optimization;
pub mod measurement;
pub mod metadata;
pub mod parametrization;
pub mod pipeline;
pub mod region;
pub mod source;
pub mod unit;

pub use busyfit::{BusyFit, BusyFitError, BusyFitResult, FitQuality, TroughOrder};
pub use catalog::SourceCatalog;
pub use cube::{Cube, CubeError, ElementKind};
pub use mask_optimization::{MaskOptimizationError, MaskOptimizer};
pub use measurement::{Measurement, MeasurementError, UnitStandard};
pub use metadata::{MetaData, MetaValue};
pub use parametrization::{ParametrizationError, Parametrizer};
pub use pipeline::{Pipeline, PipelineError, PipelineSummary};
pub use source::Source;
pub use unit::{Unit, UnitError, UnitFormat};
