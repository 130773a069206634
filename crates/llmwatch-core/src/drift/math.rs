//! Vector helpers

/// Euclidean norm
pub fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Component-wise mean of equally sized vectors. None when `vectors` is empty.
pub fn centroid<V: AsRef<[f64]>>(vectors: &[V]) -> Option<Vec<f64>> {
    let first = vectors.first()?.as_ref();
    let mut sum = vec![0.0; first.len()];
    for v in vectors {
        for (acc, x) in sum.iter_mut().zip(v.as_ref()) {
            *acc += x;
        }
    }
    let n = vectors.len() as f64;
    sum.iter_mut().for_each(|x| *x /= n);
    Some(sum)
}

/// Cosine distance `1 - cos(a, b)`, in [0, 2].
///
/// Undefined (None) when the lengths differ or either vector has zero norm.
pub fn cosine_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 || !na.is_finite() || !nb.is_finite() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let cos = (dot / (na * nb)).clamp(-1.0, 1.0);
    Some(1.0 - cos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_distances() {
        assert_eq!(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]), Some(0.0));
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 3.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((cosine_distance(&[1.0, 1.0], &[-1.0, -1.0]).unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_distances() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn test_centroid() {
        let c = centroid(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(c, vec![0.5, 0.5]);
        assert_eq!(centroid::<Vec<f64>>(&[]), None);
    }

    proptest! {
        #[test]
        fn distance_is_bounded_and_symmetric(
            a in prop::collection::vec(-100.0f64..100.0, 8),
            b in prop::collection::vec(-100.0f64..100.0, 8),
        ) {
            if let Some(d) = cosine_distance(&a, &b) {
                prop_assert!((0.0..=2.0).contains(&d));
                let back = cosine_distance(&b, &a).unwrap();
                prop_assert!((d - back).abs() < 1e-9);
            }
        }

        #[test]
        fn distance_ignores_scale(
            a in prop::collection::vec(0.1f64..10.0, 4),
            k in 0.5f64..20.0,
        ) {
            let scaled: Vec<f64> = a.iter().map(|x| x * k).collect();
            let d = cosine_distance(&a, &scaled).unwrap();
            prop_assert!(d.abs() < 1e-9);
        }
    }
}
