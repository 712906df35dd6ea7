//! Catalogue-wide measurement run
//!
//! Processes every source in a catalogue in ascending ID order: optional
//! mask optimisation first, then parametrisation with the optional Busy
//! Function fit. A failure on one source is logged and the run continues
//! with the next.

use thiserror::Error;

use crate::busyfit::TroughOrder;
use crate::catalog::SourceCatalog;
use crate::cube::Cube;
use crate::mask_optimization::MaskOptimizer;
use crate::parametrization::Parametrizer;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("mask and data cube have different sizes")]
    SizeMismatch,
}

/// Counts of per-source outcomes of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub measured: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Pipeline {
    do_mask_optimization: bool,
    do_busy_fit: bool,
    trough_order: TroughOrder,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            do_mask_optimization: true,
            do_busy_fit: true,
            trough_order: TroughOrder::Parabolic,
        }
    }
}

impl Pipeline {
    pub fn new(do_mask_optimization: bool, do_busy_fit: bool, trough_order: TroughOrder) -> Self {
        Self {
            do_mask_optimization,
            do_busy_fit,
            trough_order,
        }
    }

    /// Measure every catalogued source, mutating the mask cube and the
    /// catalogue in place.
    pub fn run(
        &self,
        data: &Cube<'_, f32>,
        mask: &mut Cube<'_, i32>,
        catalog: &mut SourceCatalog,
    ) -> Result<PipelineSummary, PipelineError> {
        if !data.same_shape(mask) {
            return Err(PipelineError::SizeMismatch);
        }

        let optimizer = MaskOptimizer::default();
        let parametrizer = Parametrizer::new(self.do_busy_fit, self.trough_order);
        let mut summary = PipelineSummary::default();

        for id in catalog.sorted_ids() {
            let Some(source) = catalog.source_mut(id) else {
                continue;
            };

            if self.do_mask_optimization {
                log::info!("mask optimisation of source {id}");
                if let Err(error) = optimizer.optimize(data, mask, source) {
                    log::error!("mask optimisation failed for source {id}: {error}");
                }
            }

            log::info!("parametrisation of source {id}");
            match parametrizer.parametrize(data, mask, source) {
                Ok(()) => summary.measured += 1,
                Err(error) => {
                    log::error!("parametrisation failed for source {id}: {error}");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use crate::unit::Unit;

    #[test]
    fn failures_do_not_stop_the_run() {
        let mut data = Cube::<f32>::zeros(20, 20, 20).unwrap();
        let mut mask = Cube::<i32>::zeros(20, 20, 20).unwrap();
        data.set(10, 10, 5, 5.0).unwrap();
        mask.set(10, 10, 5, 1).unwrap();

        let mut catalog = SourceCatalog::new();
        let mut good = Source::new(1, "good");
        good.set_value("X", 10.0, Unit::dimensionless());
        good.set_value("Y", 10.0, Unit::dimensionless());
        good.set_value("Z", 5.0, Unit::dimensionless());
        catalog.insert(good);

        // Source 2 has no masked voxels and fails parametrisation.
        let mut empty = Source::new(2, "empty");
        empty.set_value("X", 3.0, Unit::dimensionless());
        empty.set_value("Y", 3.0, Unit::dimensionless());
        empty.set_value("Z", 3.0, Unit::dimensionless());
        catalog.insert(empty);

        let summary = Pipeline::new(false, false, TroughOrder::Parabolic)
            .run(&data, &mut mask, &mut catalog)
            .unwrap();

        assert_eq!(
            summary,
            PipelineSummary {
                measured: 1,
                failed: 1
            }
        );
        assert_eq!(catalog.source(1).unwrap().value_of("F_PEAK"), 5.0);
        assert!(!catalog.source(2).unwrap().is_defined("F_PEAK"));
    }

    #[test]
    fn mismatched_cubes_rejected() {
        let data = Cube::<f32>::zeros(10, 10, 10).unwrap();
        let mut mask = Cube::<i32>::zeros(10, 10, 8).unwrap();
        let mut catalog = SourceCatalog::new();

        assert_eq!(
            Pipeline::default().run(&data, &mut mask, &mut catalog),
            Err(PipelineError::SizeMismatch)
        );
    }
}
