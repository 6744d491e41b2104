//! Chunk vector helpers: uint8 quantization, averaging, normalization.

use ndarray::{Array1, Array2, Axis};

/// Quantize a float32 vector to uint8 with a linear `scale`/`offset` pair.
///
/// `value ≈ byte * scale + offset`. A constant vector quantizes to zeros with
/// `scale = 0` so it dequantizes back to `offset` everywhere.
pub fn quantize_uint8(vector: &Array1<f32>) -> (Vec<u8>, f32, f32) {
    let (lo, hi) = vector
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    if hi - lo < 1e-9 {
        return (vec![0u8; vector.len()], 0.0, lo);
    }

    let scale = (hi - lo) / 255.0;
    let bytes = vector
        .iter()
        .map(|&v| ((v - lo) / scale).round().clamp(0.0, 255.0) as u8)
        .collect();
    (bytes, scale, lo)
}

pub fn dequantize_uint8(bytes: &[u8], scale: f32, offset: f32) -> Array1<f32> {
    bytes.iter().map(|&b| b as f32 * scale + offset).collect()
}

/// Element-wise mean of equally sized vectors. `None` for an empty input or
/// mismatched dimensions.
pub fn mean_vector(vectors: &[Array1<f32>]) -> Option<Array1<f32>> {
    let dim = vectors.first()?.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }
    let mut stacked = Array2::<f32>::zeros((vectors.len(), dim));
    for (i, v) in vectors.iter().enumerate() {
        stacked.row_mut(i).assign(v);
    }
    stacked.mean_axis(Axis(0))
}

/// Unit-length copy of `v`, or `None` for a (near) zero vector.
pub fn normalized(v: &Array1<f32>) -> Option<Array1<f32>> {
    let norm = v.dot(v).sqrt();
    (norm > 1e-9).then(|| v / norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_quantize_keeps_values_close() {
        let original = array![0.1, 0.5, -0.3, 0.8, -0.1];
        let (bytes, scale, offset) = quantize_uint8(&original);
        let restored = dequantize_uint8(&bytes, scale, offset);
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.01, "Values differ: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_constant_vector() {
        let (bytes, scale, offset) = quantize_uint8(&array![0.5, 0.5, 0.5]);
        assert_eq!(scale, 0.0);
        assert_eq!(offset, 0.5);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_mean_vector() {
        let mean = mean_vector(&[array![1.0, 0.0], array![0.0, 1.0]]).unwrap();
        assert_eq!(mean, array![0.5, 0.5]);
        assert!(mean_vector(&[]).is_none());
        assert!(mean_vector(&[array![1.0], array![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_normalized() {
        let n = normalized(&array![3.0, 4.0]).unwrap();
        assert!((n[0] - 0.6).abs() < 1e-6);
        assert!((n[1] - 0.8).abs() < 1e-6);
        assert!(normalized(&array![0.0, 0.0]).is_none());
    }
}
