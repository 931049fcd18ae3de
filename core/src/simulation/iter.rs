use std::sync::Arc;

use super::Simulation;
use crate::{
    error::{Error, Result},
    step::OutputStep,
};

/// Positions selected by `start..stop` every `step` on `len` outputs.
///
/// Follows range slicing: bounds are clamped, negative bounds count from the end and
/// a negative step runs backwards from `start`.
pub fn positions(
    len: usize,
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
) -> Result<Vec<usize>> {
    if step == 0 {
        return Err(Error::InvalidStep);
    }
    let len = len as isize;
    let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
    let clamp = |i: isize| {
        let i = if i < 0 { i + len } else { i };
        i.clamp(lower, upper)
    };

    let (start, stop) = if step > 0 {
        (start.map_or(lower, clamp), stop.map_or(upper, clamp))
    } else {
        (start.map_or(upper, clamp), stop.map_or(lower, clamp))
    };

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

/// Iterator over outputs of a [`Simulation`].
///
/// Steps are only kept in the simulation if asked for with [`StepIter::keep`], so
/// iterating a long run does not accumulate mapped data.
pub struct StepIter<'a> {
    sim: &'a Simulation,
    positions: std::vec::IntoIter<usize>,
    keep: bool,
}

impl<'a> StepIter<'a> {
    pub(crate) fn new(sim: &'a Simulation, positions: Vec<usize>) -> Self {
        Self {
            sim,
            positions: positions.into_iter(),
            keep: false,
        }
    }

    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Positions still to come.
    pub fn positions(&self) -> &[usize] {
        self.positions.as_slice()
    }
}

impl Iterator for StepIter<'_> {
    type Item = Result<Arc<OutputStep>>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.positions.next()?;
        Some(self.sim.get(position as isize, self.keep))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.positions.size_hint()
    }
}

impl ExactSizeIterator for StepIter<'_> {}

impl DoubleEndedIterator for StepIter<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        let position = self.positions.next_back()?;
        Some(self.sim.get(position as isize, self.keep))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn range_slicing() {
        assert_eq!(positions(5, None, None, 1).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(positions(5, Some(1), Some(4), 2).unwrap(), vec![1, 3]);
        assert_eq!(positions(5, Some(-2), None, 1).unwrap(), vec![3, 4]);
        assert_eq!(positions(5, None, Some(100), 3).unwrap(), vec![0, 3]);
        assert_eq!(positions(5, Some(-100), Some(2), 1).unwrap(), vec![0, 1]);
        assert_eq!(positions(5, Some(4), Some(1), 1).unwrap(), Vec::<usize>::new());
        assert_eq!(positions(5, None, None, -1).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(positions(5, Some(3), Some(0), -2).unwrap(), vec![3, 1]);
        assert_eq!(positions(5, Some(100), None, -2).unwrap(), vec![4, 2, 0]);
        assert!(matches!(positions(5, None, None, 0), Err(Error::InvalidStep)));
    }

    proptest! {
        #[test]
        fn positions_match_std_ranges(
            len in 0usize..20,
            start in 0isize..25,
            stop in 0isize..25,
            step in 1usize..5,
        ) {
            let expected: Vec<usize> = (start as usize..(stop as usize).min(len))
                .step_by(step)
                .collect();
            prop_assert_eq!(
                positions(len, Some(start), Some(stop), step as isize).unwrap(),
                expected
            );
        }
    }
}
