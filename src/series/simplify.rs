//! Curve simplification for rendering.
//!
//! Ramer-Douglas-Peucker on axis-normalized coordinates, with a binary search
//! over the tolerance to land the output near a target point count. When the
//! search can only produce too few points the curve is stride-sampled instead.

use crate::series::sample::TimeValue;

/// Upper bound on tolerance bisection steps
pub const MAX_SEARCH_ITERATIONS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimplifyOptions {
    /// Inputs at or above this length are simplified
    pub max_points: usize,
    /// Floor below which stride sampling is used instead
    pub min_points: usize,
}

impl Default for SimplifyOptions {
    fn default() -> Self {
        Self {
            max_points: 1000,
            min_points: 200,
        }
    }
}

impl SimplifyOptions {
    pub fn new(max_points: usize, min_points: usize) -> Self {
        Self {
            max_points,
            min_points,
        }
        .normalized()
    }

    /// Options for a render target of `max_points`, keeping at least a fifth of it.
    pub fn for_target(max_points: usize) -> Self {
        Self::new(max_points, max_points / 5)
    }

    fn normalized(self) -> Self {
        let max_points = self.max_points.max(2);
        Self {
            max_points,
            min_points: self.min_points.clamp(2, max_points),
        }
    }
}

/// Reduce `samples` to roughly `options.max_points` points.
///
/// Inputs shorter than `max_points` are returned unchanged. The first and last
/// samples are always kept and the output preserves input order.
pub fn simplify_to_max_points<T>(samples: &[T], options: SimplifyOptions) -> Vec<T>
where
    T: TimeValue + Clone,
{
    let options = options.normalized();
    if samples.len() < options.max_points {
        return samples.to_vec();
    }

    let curve = NormalizedCurve::new(samples);
    let mut low_epsilon = 0.0;
    let mut low_len = samples.len();
    let mut high_epsilon = 1.0;
    let mut high = curve.keep(high_epsilon);

    for _ in 0..MAX_SEARCH_ITERATIONS {
        let center = low_epsilon + (high_epsilon - low_epsilon) / 2.0;
        let kept = curve.keep(center);
        if kept.len() == low_len {
            break;
        }

        if kept.len() < options.max_points {
            high_epsilon = center;
            high = kept;
        } else {
            low_epsilon = center;
            low_len = kept.len();
        }

        if high.len() / 10 == options.max_points / 10 {
            break;
        }
    }

    if high.len() < options.min_points {
        return stride_sample(samples, options.min_points);
    }

    high.into_iter().map(|index| samples[index].clone()).collect()
}

/// One Douglas-Peucker pass at a tolerance given in normalized units.
pub fn simplify<T>(samples: &[T], epsilon: f64) -> Vec<T>
where
    T: TimeValue + Clone,
{
    NormalizedCurve::new(samples)
        .keep(epsilon)
        .into_iter()
        .map(|index| samples[index].clone())
        .collect()
}

/// Evenly spaced selection of `count` samples, first and last included.
pub fn stride_sample<T: Clone>(samples: &[T], count: usize) -> Vec<T> {
    let len = samples.len();
    let count = count.max(2);
    if len <= count {
        return samples.to_vec();
    }

    let step = len as f64 / count as f64;
    let mut out = Vec::with_capacity(count);
    out.push(samples[0].clone());
    for i in 1..count - 1 {
        out.push(samples[(i as f64 * step) as usize].clone());
    }
    out.push(samples[len - 1].clone());
    out
}

/// Coordinates scaled so both axes span `[0, 1]`.
struct NormalizedCurve {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl NormalizedCurve {
    fn new<T: TimeValue>(samples: &[T]) -> Self {
        let (x_min, x_max) = bounds(samples.iter().map(TimeValue::time));
        let (y_min, y_max) = bounds(samples.iter().map(TimeValue::value));
        Self {
            xs: samples
                .iter()
                .map(|s| normalize(s.time(), x_min, x_max))
                .collect(),
            ys: samples
                .iter()
                .map(|s| normalize(s.value(), y_min, y_max))
                .collect(),
        }
    }

    /// Indices retained at `epsilon`, ascending.
    fn keep(&self, epsilon: f64) -> Vec<usize> {
        let n = self.xs.len();
        if n <= 2 {
            return (0..n).collect();
        }

        let epsilon_sq = epsilon * epsilon;
        let mut keep = vec![false; n];
        keep[0] = true;
        keep[n - 1] = true;

        let mut stack = vec![(0usize, n - 1)];
        while let Some((first, last)) = stack.pop() {
            if last <= first + 1 {
                continue;
            }

            let mut max_sq = 0.0;
            let mut index = first;
            for i in first + 1..last {
                let distance = segment_distance_sq(
                    (self.xs[i], self.ys[i]),
                    (self.xs[first], self.ys[first]),
                    (self.xs[last], self.ys[last]),
                );
                if distance > max_sq {
                    max_sq = distance;
                    index = i;
                }
            }

            if max_sq > epsilon_sq {
                keep[index] = true;
                stack.push((first, index));
                stack.push((index, last));
            }
        }

        keep.iter()
            .enumerate()
            .filter_map(|(i, kept)| kept.then_some(i))
            .collect()
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
            (min.min(v), max.max(v))
        })
}

#[inline]
fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range > 0.0 && range.is_finite() {
        (value - min) / range
    } else {
        0.0
    }
}

/// Squared distance from `p` to segment `a..b`.
#[inline]
fn segment_distance_sq(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (mut x, mut y) = a;
    let mut dx = b.0 - x;
    let mut dy = b.1 - y;

    if dx != 0.0 || dy != 0.0 {
        let t = ((p.0 - x) * dx + (p.1 - y) * dy) / (dx * dx + dy * dy);
        if t > 1.0 {
            x = b.0;
            y = b.1;
        } else if t > 0.0 {
            x += dx * t;
            y += dy * t;
        }
    }

    dx = p.0 - x;
    dy = p.1 - y;
    dx * dx + dy * dy
}
