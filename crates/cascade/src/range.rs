use crate::error::{Error, Result};

/// Custom step function: `(start, end, count, index) -> sample`.
pub type StepFn = fn(f64, f64, usize, usize) -> f64;

/// How samples are spread between the bounds of a [`ValueRange`].
#[derive(Debug, Clone, Copy)]
pub enum Spacing {
    /// Equal arithmetic steps.
    Linear,
    /// Equal geometric steps. Both bounds must be strictly positive.
    Logarithmic,
    /// User supplied sampling formula.
    Custom(StepFn),
}

impl PartialEq for Spacing {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Linear, Self::Linear) | (Self::Logarithmic, Self::Logarithmic) => true,
            (Self::Custom(a), Self::Custom(b)) => core::ptr::fn_addr_eq(*a, *b),
            _ => false,
        }
    }
}

/// A deterministic one-dimensional sample generator over `[start, end]`.
///
/// A non-degenerate range with `count` steps yields `count + 1` samples,
/// index `0` being `start` and index `count` being exactly `end`. A
/// degenerate range (`start == end`) repeats `start` exactly `count` times,
/// or forever when no count is given.
///
/// Samples are computed from their index, never by accumulating steps, so
/// two ranges with the same parameters always agree bit for bit.
///
/// # Example
///
/// ```
/// use cascade::ValueRange;
///
/// let range = ValueRange::linear(0.0, 10.0, 2).unwrap();
/// assert_eq!(range.samples().collect::<Vec<_>>(), [0.0, 5.0, 10.0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueRange {
    start: f64,
    end: f64,
    count: Option<usize>,
    spacing: Spacing,
}

impl ValueRange {
    /// Creates a range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when:
    /// - a bound is not finite,
    /// - `count` is zero or absent on a non-degenerate range,
    /// - a logarithmic range has a non-positive bound.
    pub fn new(start: f64, end: f64, count: Option<usize>, spacing: Spacing) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(Error::config(format!(
                "range bounds must be finite (got {start}..{end})"
            )));
        }
        if start != end && matches!(count, None | Some(0)) {
            return Err(Error::config(format!(
                "range {start}..{end} needs a non-zero step count"
            )));
        }
        if matches!(spacing, Spacing::Logarithmic) && (start <= 0.0 || end <= 0.0) {
            return Err(Error::config(format!(
                "logarithmic range {start}..{end} needs strictly positive bounds"
            )));
        }
        Ok(Self {
            start,
            end,
            count,
            spacing,
        })
    }

    pub fn linear(start: f64, end: f64, count: usize) -> Result<Self> {
        Self::new(start, end, Some(count), Spacing::Linear)
    }

    pub fn logarithmic(start: f64, end: f64, count: usize) -> Result<Self> {
        Self::new(start, end, Some(count), Spacing::Logarithmic)
    }

    /// A constant repeated `repeat` times.
    pub fn constant(value: f64, repeat: usize) -> Result<Self> {
        Self::new(value, value, Some(repeat), Spacing::Linear)
    }

    /// A constant with no repeat bound.
    pub fn unbounded_constant(value: f64) -> Result<Self> {
        Self::new(value, value, None, Spacing::Linear)
    }

    pub const fn start(&self) -> f64 {
        self.start
    }

    pub const fn end(&self) -> f64 {
        self.end
    }

    /// The configured step (or repeat) count.
    pub const fn count(&self) -> Option<usize> {
        self.count
    }

    pub const fn spacing(&self) -> Spacing {
        self.spacing
    }

    pub fn is_degenerate(&self) -> bool {
        self.start == self.end
    }

    /// Number of samples, `None` for an unbounded constant.
    pub fn len(&self) -> Option<usize> {
        let count = self.count?;
        if self.is_degenerate() {
            Some(count)
        } else {
            Some(count + 1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Returns the `index`-th sample.
    ///
    /// Indices past the last sample are not checked; callers iterate within
    /// [`ValueRange::len`].
    pub fn value(&self, index: usize) -> f64 {
        if self.is_degenerate() {
            return self.start;
        }
        // Non-degenerate ranges always carry a non-zero count.
        let count = self.count.unwrap_or(1);
        if index == count {
            return self.end;
        }
        let (i, n) = (index as f64, count as f64);
        match self.spacing {
            Spacing::Linear => self.start + i * (self.end - self.start) / n,
            Spacing::Logarithmic => {
                let (lo, hi) = (self.start.ln(), self.end.ln());
                (lo + i * (hi - lo) / n).exp()
            }
            Spacing::Custom(step) => step(self.start, self.end, count, index),
        }
    }

    /// Same spacing, new bounds and count.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ValueRange::new`].
    pub fn with_bounds(&self, start: f64, end: f64, count: usize) -> Result<Self> {
        Self::new(start, end, Some(count), self.spacing)
    }

    /// Iterates over every sample. Unbounded constants never end.
    pub fn samples(&self) -> Samples {
        Samples {
            range: *self,
            index: 0,
        }
    }
}

/// Iterator returned by [`ValueRange::samples`].
#[derive(Debug, Clone)]
pub struct Samples {
    range: ValueRange,
    index: usize,
}

impl Iterator for Samples {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if let Some(len) = self.range.len() {
            if self.index >= len {
                return None;
            }
        }
        let v = self.range.value(self.index);
        self.index += 1;
        Some(v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.range.len() {
            Some(len) => {
                let rest = len.saturating_sub(self.index);
                (rest, Some(rest))
            }
            None => (usize::MAX, None),
        }
    }
}
