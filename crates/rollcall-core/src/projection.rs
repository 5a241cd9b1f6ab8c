//! PCA projection fitted on registry descriptors.
//!
//! Principal axes come from power iteration with deflation on the sample
//! covariance, so no LAPACK backend is needed.

use crate::types::Descriptor;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

const MAX_ITERATIONS: usize = 200;
const TOLERANCE: f64 = 1e-9;
const MIN_EIGENVALUE: f64 = 1e-12;

/// Linear map `x ↦ W (x - mean)`, `W` being `components × input_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    mean: Vec<f32>,
    components: Vec<Vec<f32>>,
}

impl Projection {
    /// Fit up to `n_components` axes. Returns `None` when the samples are
    /// empty, have inconsistent dimensions, or carry no variance.
    pub fn fit(samples: &[Descriptor], n_components: usize) -> Option<Self> {
        let dim = samples.first()?.dim();
        if dim == 0 || n_components == 0 || samples.iter().any(|s| s.dim() != dim) {
            return None;
        }

        let flat: Vec<f64> = samples
            .iter()
            .flat_map(|s| s.values.iter().map(|&v| v as f64))
            .collect();
        let data = Array2::from_shape_vec((samples.len(), dim), flat).ok()?;
        let mean = data.mean_axis(Axis(0))?;
        let centered = &data - &mean;
        let denom = (samples.len().max(2) - 1) as f64;
        let mut covariance = centered.t().dot(&centered) / denom;

        let mut components = Vec::with_capacity(n_components.min(dim));
        for k in 0..n_components.min(dim) {
            let (eigenvalue, axis) = dominant_axis(&covariance, k);
            if eigenvalue <= MIN_EIGENVALUE {
                break;
            }
            // Deflate so the next iteration finds the next axis.
            let outer = outer(&axis);
            covariance = covariance - outer * eigenvalue;
            components.push(axis.iter().map(|&v| v as f32).collect());
        }

        if components.is_empty() {
            return None;
        }

        Some(Self {
            mean: mean.iter().map(|&v| v as f32).collect(),
            components,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    pub fn output_dim(&self) -> usize {
        self.components.len()
    }

    pub fn apply(&self, descriptor: &Descriptor) -> Descriptor {
        let centered: Vec<f32> = descriptor
            .values
            .iter()
            .zip(self.mean.iter())
            .map(|(v, m)| v - m)
            .collect();
        let values = self
            .components
            .iter()
            .map(|axis| axis.iter().zip(centered.iter()).map(|(a, c)| a * c).sum())
            .collect();
        Descriptor {
            values,
            model_version: descriptor.model_version.clone(),
        }
    }
}

fn dominant_axis(matrix: &Array2<f64>, seed: usize) -> (f64, Array1<f64>) {
    let dim = matrix.nrows();
    // Deterministic, non-symmetric start vector.
    let mut v = Array1::from_shape_fn(dim, |i| 1.0 + ((i + seed) as f64 * 0.618_033_988_7).fract());
    normalize(&mut v);

    for _ in 0..MAX_ITERATIONS {
        let mut next = matrix.dot(&v);
        if normalize(&mut next) == 0.0 {
            return (0.0, v);
        }
        let delta = (&next - &v).mapv(f64::abs).sum().min((&next + &v).mapv(f64::abs).sum());
        v = next;
        if delta < TOLERANCE {
            break;
        }
    }

    let eigenvalue = v.dot(&matrix.dot(&v));
    (eigenvalue, v)
}

fn normalize(v: &mut Array1<f64>) -> f64 {
    let norm = v.dot(&*v).sqrt();
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    norm
}

fn outer(v: &Array1<f64>) -> Array2<f64> {
    let column = v.view().insert_axis(Axis(1));
    let row = v.view().insert_axis(Axis(0));
    column.dot(&row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples_on_x_axis() -> Vec<Descriptor> {
        // Variance lives almost entirely along the first axis.
        (0..20)
            .map(|i| {
                let t = i as f32 - 10.0;
                Descriptor::new(vec![t, 0.01 * (i % 3) as f32, 5.0])
            })
            .collect()
    }

    #[test]
    fn test_fit_finds_dominant_axis() {
        let projection = Projection::fit(&samples_on_x_axis(), 1).unwrap();
        assert_eq!(projection.input_dim(), 3);
        assert_eq!(projection.output_dim(), 1);
        let axis = &projection.components[0];
        assert!(axis[0].abs() > 0.99, "axis = {axis:?}");
    }

    #[test]
    fn test_apply_preserves_pairwise_distance_on_dominant_axis() {
        let samples = samples_on_x_axis();
        let projection = Projection::fit(&samples, 2).unwrap();
        let a = projection.apply(&samples[0]);
        let b = projection.apply(&samples[10]);
        let original = samples[0].euclidean_distance(&samples[10]);
        assert!((a.euclidean_distance(&b) - original).abs() < 1e-2);
    }

    #[test]
    fn test_components_are_orthonormal() {
        let samples: Vec<Descriptor> = (0..30)
            .map(|i| {
                let t = i as f32;
                Descriptor::new(vec![t.sin() * 3.0, t.cos(), (t * 0.5).sin() * 2.0, 0.1 * t])
            })
            .collect();
        let projection = Projection::fit(&samples, 3).unwrap();
        for (i, a) in projection.components.iter().enumerate() {
            let norm: f32 = a.iter().map(|x| x * x).sum();
            assert!((norm - 1.0).abs() < 1e-3);
            for b in projection.components.iter().skip(i + 1) {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                assert!(dot.abs() < 1e-2, "dot = {dot}");
            }
        }
    }

    #[test]
    fn test_fit_rejects_constant_samples() {
        let samples = vec![Descriptor::new(vec![1.0, 2.0]); 5];
        assert!(Projection::fit(&samples, 2).is_none());
    }

    #[test]
    fn test_fit_rejects_mixed_dimensions() {
        let samples = vec![Descriptor::new(vec![1.0, 2.0]), Descriptor::new(vec![1.0])];
        assert!(Projection::fit(&samples, 1).is_none());
    }
}
