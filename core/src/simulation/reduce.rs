use std::num::NonZeroUsize;

use ndarray::{Array, ArrayD, Dimension, IxDyn};
use tracing::{debug, instrument};

use super::Simulation;
use crate::{
    error::{Error, Result},
    step::OutputStep,
};

/// Per step result of a reduction: a scalar or an array of any shape.
pub trait ReduceOutput {
    fn shape(&self) -> Vec<usize>;

    /// Values in logical row major order.
    fn into_values(self) -> Vec<f64>;
}

impl ReduceOutput for f64 {
    fn shape(&self) -> Vec<usize> {
        Vec::new()
    }

    fn into_values(self) -> Vec<f64> {
        vec![self]
    }
}

impl ReduceOutput for f32 {
    fn shape(&self) -> Vec<usize> {
        Vec::new()
    }

    fn into_values(self) -> Vec<f64> {
        vec![self as f64]
    }
}

impl ReduceOutput for Vec<f64> {
    fn shape(&self) -> Vec<usize> {
        vec![self.len()]
    }

    fn into_values(self) -> Vec<f64> {
        self
    }
}

impl<D: Dimension> ReduceOutput for Array<f64, D> {
    fn shape(&self) -> Vec<usize> {
        Array::shape(self).to_vec()
    }

    fn into_values(self) -> Vec<f64> {
        self.iter().copied().collect()
    }
}

/// Collects per step results into one `(steps, shape...)` array.
struct Collector {
    expected: Option<Vec<usize>>,
    values: Vec<f64>,
    count: usize,
}

impl Collector {
    fn new(shape: Option<&[usize]>) -> Self {
        Self {
            expected: shape.map(<[usize]>::to_vec),
            values: Vec::new(),
            count: 0,
        }
    }

    fn push<R: ReduceOutput>(&mut self, position: usize, result: R) -> Result<()> {
        let found = result.shape();
        let expected = self.expected.get_or_insert_with(|| found.clone());
        if *expected != found {
            return Err(Error::ReduceShape {
                step: position,
                expected: expected.clone(),
                found,
            });
        }
        self.values.extend(result.into_values());
        self.count += 1;
        Ok(())
    }

    fn finish(self) -> Result<ArrayD<f64>> {
        let mut shape = vec![self.count];
        shape.extend(self.expected.unwrap_or_default());
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), self.values)?)
    }
}

impl Simulation {
    /// Applies `f` to every output in order and stacks the results.
    ///
    /// The result has shape `(len, shape...)`. Without `shape` it is taken from the result
    /// for the first output, every later result has to match it.
    #[instrument(skip(self, f), fields(steps = self.len()))]
    pub fn reduce<R, F>(&self, f: F, shape: Option<&[usize]>) -> Result<ArrayD<f64>>
    where
        R: ReduceOutput,
        F: Fn(&OutputStep) -> Result<R>,
    {
        let mut collector = Collector::new(shape);
        for step in self.iter() {
            let step = step?;
            collector.push(step.position(), f(&step)?)?;
        }
        collector.finish()
    }

    /// Like [`Simulation::reduce`], but spreads contiguous chunks of outputs over
    /// `workers` threads, all available cores if `None`.
    ///
    /// Every worker opens its own reader and mappings, results come back in step order.
    #[instrument(skip(self, f), fields(steps = self.len()))]
    pub fn reduce_parallel<R, F>(
        &self,
        f: F,
        shape: Option<&[usize]>,
        workers: Option<usize>,
    ) -> Result<ArrayD<f64>>
    where
        R: ReduceOutput + Send,
        F: Fn(&OutputStep) -> Result<R> + Sync,
    {
        let len = self.len();
        let workers = workers
            .or_else(|| std::thread::available_parallelism().ok().map(NonZeroUsize::get))
            .unwrap_or(1)
            .clamp(1, len.max(1));
        let chunk = (len + workers - 1) / workers.max(1);
        debug!(workers, chunk, "Starting parallel reduce");

        let f = &f;
        let chunks: Vec<Result<Vec<(usize, R)>>> = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..len)
                .step_by(chunk.max(1))
                .map(|start| {
                    let end = (start + chunk).min(len);
                    s.spawn(move |_| {
                        let sim = self.with_own_reader()?;
                        (start..end)
                            .map(|position| {
                                let step = sim.get(position as isize, false)?;
                                Ok((position, f(&step)?))
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect()
        })
        .unwrap_or_else(|e| std::panic::resume_unwind(e));

        let mut collector = Collector::new(shape);
        for chunk in chunks {
            for (position, result) in chunk? {
                collector.push(position, result)?;
            }
        }
        collector.finish()
    }
}
