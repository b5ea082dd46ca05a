use std::sync::Mutex;

use candle_core::{DType, Result, Tensor};

use super::config::ConcatMode;

/// Observed value range of a tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    fn merge(self, other: ValueRange) -> ValueRange {
        ValueRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Joins the upsampled coarse feature with a level's own projection along
/// the channel axis.
pub trait ConcatStrategy: Send + Sync + std::fmt::Debug {
    fn concat(&self, level: usize, tensors: &[&Tensor]) -> Result<Tensor>;

    /// Ranges recorded per level so far; empty when the strategy records none.
    fn ranges(&self) -> Vec<Option<ValueRange>> {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainConcat;

impl ConcatStrategy for PlainConcat {
    fn concat(&self, _level: usize, tensors: &[&Tensor]) -> Result<Tensor> {
        Tensor::cat(tensors, 1)
    }
}

/// Concatenation that keeps the running min/max of every output, per level.
#[derive(Debug)]
pub struct CalibratingConcat {
    ranges: Mutex<Vec<Option<ValueRange>>>,
}

impl CalibratingConcat {
    pub fn new(num_levels: usize) -> Self {
        Self {
            ranges: Mutex::new(vec![None; num_levels]),
        }
    }
}

impl ConcatStrategy for CalibratingConcat {
    fn concat(&self, level: usize, tensors: &[&Tensor]) -> Result<Tensor> {
        let out = Tensor::cat(tensors, 1)?;
        let flat = out.to_dtype(DType::F32)?.flatten_all()?;
        let observed = ValueRange {
            min: flat.min(0)?.to_scalar::<f32>()?,
            max: flat.max(0)?.to_scalar::<f32>()?,
        };

        let mut ranges = self.ranges.lock().unwrap_or_else(|e| e.into_inner());
        if level >= ranges.len() {
            ranges.resize(level + 1, None);
        }
        ranges[level] = Some(match ranges[level] {
            Some(prev) => prev.merge(observed),
            None => observed,
        });
        Ok(out)
    }

    fn ranges(&self) -> Vec<Option<ValueRange>> {
        self.ranges
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub(crate) fn strategy_for(mode: ConcatMode, num_levels: usize) -> Box<dyn ConcatStrategy> {
    match mode {
        ConcatMode::Plain => Box::new(PlainConcat),
        ConcatMode::Calibrating => Box::new(CalibratingConcat::new(num_levels)),
    }
}
