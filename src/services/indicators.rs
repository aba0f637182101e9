use chrono::NaiveDate;

use crate::models::RawBucket;

const MS_PER_DAY: i64 = 86_400_000;

/// Start (epoch ms, UTC) of the `period_days` wide bucket containing `date`.
///
/// Buckets are aligned to multiples of the period counted from 1970-01-01,
/// which is how the search engine places `fixed_interval` histogram keys.
pub fn bucket_start_ms(date: NaiveDate, period_days: u32) -> i64 {
    let period = i64::from(period_days.max(1));
    let days = (date - NaiveDate::default()).num_days();
    days.div_euclid(period) * period * MS_PER_DAY
}

/// Every bucket start between the bucket holding `range_start` and the one
/// holding `range_end`, inclusive. Empty if the range is inverted.
pub fn bucket_starts(range_start: NaiveDate, range_end: NaiveDate, period_days: u32) -> Vec<i64> {
    if range_end < range_start {
        return Vec::new();
    }

    let step = i64::from(period_days.max(1)) * MS_PER_DAY;
    let first = bucket_start_ms(range_start, period_days);
    let last = bucket_start_ms(range_end, period_days);

    std::iter::successors(Some(first), |&start| Some(start + step))
        .take_while(|&start| start <= last)
        .collect()
}

/// Trailing linearly weighted moving average.
///
/// The value at `i` is computed from the `window` entries before `i` (the
/// entry itself is excluded). It is `None` while fewer than `window` entries
/// precede `i`. Inside the window `None` entries are skipped and the rest are
/// weighted 1..=k from oldest to newest; the denominator is seeded with 1,
/// matching the search engine's linear model. A window holding only `None`
/// yields `None`.
///
/// Runs in one pass: when the oldest value leaves the window every remaining
/// rank drops by one, so the weighted sum loses exactly the plain sum.
pub fn linear_moving_average(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    let mut plain_sum = 0.0_f64;
    let mut weighted_sum = 0.0_f64;
    let mut present = 0_usize;
    let mut out = Vec::with_capacity(values.len());

    for (i, value) in values.iter().enumerate() {
        if i < window {
            out.push(None);
        } else {
            out.push((present > 0).then(|| {
                let total_weight = 1.0 + (present * (present + 1) / 2) as f64;
                weighted_sum / total_weight
            }));

            if let Some(oldest) = values[i - window] {
                weighted_sum -= plain_sum;
                plain_sum -= oldest;
                present -= 1;
                if present == 0 {
                    plain_sum = 0.0;
                    weighted_sum = 0.0;
                }
            }
        }

        if let Some(v) = value {
            present += 1;
            weighted_sum += v * present as f64;
            plain_sum += v;
        }
    }

    out
}

/// Turn `(start_ms, avg_close)` pairs into raw buckets carrying the trailing
/// moving average.
pub fn with_moving_average(buckets: Vec<(i64, Option<f64>)>, window: u32) -> Vec<RawBucket> {
    let averages: Vec<Option<f64>> = buckets.iter().map(|(_, avg)| *avg).collect();
    let moving = linear_moving_average(&averages, window as usize);

    buckets
        .into_iter()
        .zip(moving)
        .map(|((start_ms, avg_close), moving_avg)| RawBucket {
            start_ms,
            avg_close,
            moving_avg,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_buckets_start_at_midnight() {
        assert_eq!(bucket_start_ms(date(2024, 1, 1), 1), 1_704_067_200_000);
        assert_eq!(bucket_start_ms(date(1970, 1, 1), 1), 0);
    }

    #[test]
    fn test_weekly_buckets_align_to_epoch() {
        // 2024-01-01 is day 19723 since epoch; 19723 / 7 = 2817 rem 4
        let start = bucket_start_ms(date(2024, 1, 1), 7);
        assert_eq!(start, 2817 * 7 * MS_PER_DAY);
        assert_eq!(bucket_start_ms(date(2024, 1, 3), 7), start);
        assert_eq!(bucket_start_ms(date(2024, 1, 4), 7), start + 7 * MS_PER_DAY);
    }

    #[test]
    fn test_bucket_starts_cover_range() {
        let starts = bucket_starts(date(2024, 1, 1), date(2024, 1, 10), 1);
        assert_eq!(starts.len(), 10);
        assert_eq!(starts[0], bucket_start_ms(date(2024, 1, 1), 1));
        assert_eq!(starts[9], bucket_start_ms(date(2024, 1, 10), 1));

        let weekly = bucket_starts(date(2024, 1, 1), date(2024, 1, 10), 7);
        assert_eq!(weekly.len(), 2);

        assert!(bucket_starts(date(2024, 1, 10), date(2024, 1, 1), 1).is_empty());
    }

    #[test]
    fn test_linear_moving_average_warm_up_and_weights() {
        let values = vec![Some(10.0), Some(20.0), Some(30.0), Some(40.0)];
        let mv = linear_moving_average(&values, 2);

        assert_eq!(mv[0], None);
        assert_eq!(mv[1], None);
        // (10*1 + 20*2) / (1 + 1 + 2)
        assert_eq!(mv[2], Some(12.5));
        // (20*1 + 30*2) / 4
        assert_eq!(mv[3], Some(20.0));
    }

    #[test]
    fn test_linear_moving_average_skips_gaps() {
        let values = vec![Some(10.0), None, Some(30.0), Some(40.0), None];
        let mv = linear_moving_average(&values, 2);

        // window [10, gap] -> 10*1 / (1 + 1)
        assert_eq!(mv[2], Some(5.0));
        // window [gap, 30]
        assert_eq!(mv[3], Some(15.0));
        // window [30, 40] is still computed for an empty bucket
        assert_eq!(mv[4], Some((30.0 + 80.0) / 4.0));
    }

    #[test]
    fn test_linear_moving_average_all_empty_window() {
        let values = vec![None, None, Some(5.0)];
        let mv = linear_moving_average(&values, 2);
        assert_eq!(mv, vec![None, None, None]);
    }

    /// Direct O(n * window) evaluation of the same average.
    fn naive_moving_average(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
        (0..values.len())
            .map(|i| {
                if i < window {
                    return None;
                }
                let present: Vec<f64> = values[i - window..i].iter().flatten().copied().collect();
                if present.is_empty() {
                    return None;
                }
                let weighted: f64 = present.iter().enumerate().map(|(k, v)| v * (k + 1) as f64).sum();
                let total = 1.0 + present.len() as f64 * (present.len() as f64 + 1.0) / 2.0;
                Some(weighted / total)
            })
            .collect()
    }

    #[test]
    fn test_single_pass_matches_direct_evaluation() {
        let values: Vec<Option<f64>> = (0..500)
            .map(|i| (i % 7 != 3 && i % 11 != 0).then(|| 50.0 + ((i * 37) % 101) as f64 / 3.0))
            .collect();

        for window in [1, 2, 5, 13, 60, 499, 600] {
            let fast = linear_moving_average(&values, window);
            let slow = naive_moving_average(&values, window);
            assert_eq!(fast.len(), slow.len());
            for (a, b) in fast.iter().zip(&slow) {
                match (a, b) {
                    (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9 * b.abs().max(1.0), "{} vs {}", a, b),
                    (None, None) => {}
                    _ => panic!("presence differs for window {}: {:?} vs {:?}", window, a, b),
                }
            }
        }
    }

    #[test]
    fn test_large_series_with_large_window() {
        let values: Vec<Option<f64>> = (0..80_000).map(|i| Some(100.0 + (i % 50) as f64)).collect();
        let mv = linear_moving_average(&values, 40_000);

        assert_eq!(mv.len(), 80_000);
        assert!(mv[39_999].is_none());
        assert!(mv[40_000..].iter().all(|v| v.map_or(false, |v| v > 0.0 && v < 150.0)));
    }

    #[test]
    fn test_zero_window_yields_nothing() {
        let values = vec![Some(1.0), Some(2.0)];
        assert_eq!(linear_moving_average(&values, 0), vec![None, None]);
    }

    #[test]
    fn test_with_moving_average_keeps_order() {
        let raw = with_moving_average(vec![(0, Some(1.0)), (10, None), (20, Some(3.0))], 1);

        assert_eq!(raw.len(), 3);
        assert_eq!(raw[0].moving_avg, None);
        assert_eq!(raw[1].moving_avg, Some(0.5));
        assert_eq!(raw[1].avg_close, None);
        assert_eq!(raw[2].moving_avg, None);
        assert_eq!(raw[2].start_ms, 20);
    }
}
