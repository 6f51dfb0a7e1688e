/// Quantile banding
///
/// Groups `(x, y)` pairs by a key derived from each pair and takes an upper
/// and a lower quantile of `y` per group. The two curves together bound a
/// banding region over the key axis.
///
/// Keys are compared with exact `==`. Raw cadence rarely repeats exactly, so
/// callers wanting buckets should pass `rounded_key`.

use std::cmp::Ordering;
use serde::Serialize;

use crate::error::Result;
use crate::series_stats;

/// Groups smaller than this are dropped unless the caller overrides it.
pub const DEFAULT_MIN_GROUP_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandPoint {
    pub key: f64,
    pub value: f64,
}

pub type QuantileBand = Vec<BandPoint>;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct QuantileBands {
    pub upper: QuantileBand,
    pub lower: QuantileBand,
}

impl QuantileBands {
    pub fn is_empty(&self) -> bool {
        self.upper.is_empty()
    }
}

/// Groups on the pair's x value unchanged.
pub fn exact_key(pair: &(f64, f64)) -> f64 {
    pair.0
}

/// Groups on x rounded to the nearest multiple of `step`.
pub fn rounded_key(step: f64) -> impl Fn(&(f64, f64)) -> f64 {
    move |pair: &(f64, f64)| {
        if step > 0.0 {
            (pair.0 / step).round() * step
        } else {
            pair.0.round()
        }
    }
}

pub fn bandify<F>(
    pairs: &[(f64, f64)],
    group_key: F,
    upper_quantile: f64,
    lower_quantile: f64,
    min_group_size: usize,
) -> Result<QuantileBands>
where
    F: Fn(&(f64, f64)) -> f64,
{
    let mut keyed: Vec<(f64, f64)> = pairs
        .iter()
        .filter(|pair| !pair.1.is_nan())
        .map(|pair| (group_key(pair), pair.1))
        .filter(|(key, _)| !key.is_nan())
        .collect();
    keyed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut bands = QuantileBands::default();
    let mut start = 0;
    while start < keyed.len() {
        let key = keyed[start].0;
        let end = keyed[start..]
            .iter()
            .position(|(k, _)| k.partial_cmp(&key) != Some(Ordering::Equal))
            .map_or(keyed.len(), |offset| start + offset);

        if end - start >= min_group_size.max(1) {
            let values: Vec<f64> = keyed[start..end].iter().map(|(_, v)| *v).collect();
            let upper = series_stats::quantile_at(&values, upper_quantile)?;
            let lower = series_stats::quantile_at(&values, lower_quantile)?;
            bands.upper.push(BandPoint { key, value: upper });
            bands.lower.push(BandPoint { key, value: lower });
        }
        start = end;
    }

    Ok(bands)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_groups_are_dropped() {
        let mut pairs: Vec<(f64, f64)> =
            (0..60).map(|i| (180.0, 1.0 + (i % 3) as f64 * 0.1)).collect();
        pairs.extend((0..10).map(|_| (181.0, 1.5)));

        let bands = bandify(&pairs, exact_key, 0.9, 0.1, DEFAULT_MIN_GROUP_SIZE).unwrap();
        assert_eq!(bands.upper.len(), 1);
        assert_eq!(bands.lower.len(), 1);
        assert_eq!(bands.upper[0].key, 180.0);
        assert_eq!(bands.lower[0].key, 180.0);
        assert!((bands.upper[0].value - 1.2).abs() < 1e-12);
        assert!((bands.lower[0].value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bands_sorted_by_key() {
        let pairs: Vec<(f64, f64)> = [176.0, 170.0, 173.0]
            .iter()
            .flat_map(|&k| (0..5).map(move |i| (k, k * 10.0 + i as f64)))
            .collect();
        let bands = bandify(&pairs, exact_key, 1.0, 0.0, 5).unwrap();

        let keys: Vec<f64> = bands.upper.iter().map(|p| p.key).collect();
        assert_eq!(keys, vec![170.0, 173.0, 176.0]);
        assert_eq!(bands.upper[0].value, 1704.0);
        assert_eq!(bands.lower[2].value, 1760.0);
    }

    #[test]
    fn test_rounded_key_buckets() {
        let pairs = vec![(170.2, 1.0), (169.8, 2.0), (170.4, 3.0), (172.6, 4.0)];

        let exact = bandify(&pairs, exact_key, 0.5, 0.5, 2).unwrap();
        assert!(exact.is_empty());

        let rounded = bandify(&pairs, rounded_key(1.0), 1.0, 0.0, 2).unwrap();
        assert_eq!(rounded.upper.len(), 1);
        assert_eq!(rounded.upper[0].key, 170.0);
        assert_eq!(rounded.upper[0].value, 3.0);
        assert_eq!(rounded.lower[0].value, 1.0);

        let coarse = rounded_key(5.0);
        assert_eq!(coarse(&(172.6, 0.0)), 175.0);
    }

    #[test]
    fn test_nan_pairs_ignored() {
        let pairs = vec![(170.0, f64::NAN), (f64::NAN, 1.0), (170.0, 2.0)];
        let bands = bandify(&pairs, exact_key, 0.5, 0.5, 1).unwrap();
        assert_eq!(bands.upper, vec![BandPoint { key: 170.0, value: 2.0 }]);
    }
}
