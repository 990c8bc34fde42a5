//! Running statistics maintained per accepted point, plus the batch pass
//! that runs once on session end.

use ride_tracking_lib::track_point::TrackPoint;
use ride_tracking_lib::track_session::{
    QualityBucket, SessionStatistics, SpeedPercentiles, TrackingQuality, TripAnalytics, ZoneCounts,
};

// Heuristic thresholds, kept behavior-compatible with the original system.
// Tunable constants, not derived constraints.
pub const STOP_SPEED_KMH: f64 = 2.0;
pub const STOP_MIN_DURATION_S: f64 = 120.0;
pub const SPEED_RECONCILE_DIVERGENCE_KMH: f64 = 10.0;
pub const BASE_CONSUMPTION_L_PER_100KM: f64 = 7.0;
pub const CONSUMPTION_PENALTY_L_PER_KMH: f64 = 0.1;
pub const CONSUMPTION_PENALTY_ABOVE_KMH: f64 = 90.0;
pub const CO2_KG_PER_LITER: f64 = 2.31;
pub const ECO_SPEEDING_THRESHOLD_KMH: f64 = 110.0;
pub const ECO_SPEEDING_WEIGHT: f64 = 30.0;
pub const ECO_HARSH_ACCEL_MS2: f64 = 2.0;
pub const ECO_ACCEL_WEIGHT: f64 = 20.0;
pub const ECO_VARIATION_WEIGHT: f64 = 10.0;
pub const QUALITY_EXCELLENT_PCT: f64 = 90.0;
pub const QUALITY_GOOD_PCT: f64 = 75.0;
pub const QUALITY_MODERATE_PCT: f64 = 50.0;
pub const URBAN_MAX_KMH: f64 = 50.0;
pub const ARTERIAL_MAX_KMH: f64 = 90.0;

/// O(1) incremental update for one accepted point.
pub fn apply_sample(
    stats: &mut SessionStatistics,
    distance_m: f64,
    elapsed_s: f64,
    speed_kmh: f64,
) {
    stats.distance_total_m += distance_m;
    stats.duration_s += elapsed_s;
    stats.speed_sum_kmh += speed_kmh;
    stats.speed_samples += 1;
    if speed_kmh > stats.max_speed_kmh {
        stats.max_speed_kmh = speed_kmh;
    }
    stats.average_speed_kmh = distance_based_average(stats);
}

fn distance_based_average(stats: &SessionStatistics) -> f64 {
    if stats.duration_s > 0.0 {
        stats.distance_total_m / stats.duration_s * 3.6
    } else {
        0.0
    }
}

/// Batch pass over the full point list on session end (or maintenance
/// finalization). `points` is every persisted point of the session in
/// capture order, invalid ones included: quality needs them, everything
/// else only looks at the valid subset.
pub fn finalize(stats: &mut SessionStatistics, points: &[TrackPoint]) -> TripAnalytics {
    let valid: Vec<&TrackPoint> = points.iter().filter(|p| p.valid).collect();

    let (stop_count, stopped_duration_s) = detect_stops(&valid);
    stats.stop_count = stop_count;
    stats.stopped_duration_s = stopped_duration_s;

    stats.average_speed_kmh = reconcile_average_speed(stats, &valid);

    let distance_km = stats.distance_total_m / 1000.0;
    let over = (stats.average_speed_kmh - CONSUMPTION_PENALTY_ABOVE_KMH).max(0.0);
    let rate = BASE_CONSUMPTION_L_PER_100KM + CONSUMPTION_PENALTY_L_PER_KMH * over;
    stats.fuel_consumption_l = distance_km / 100.0 * rate;
    stats.co2_emissions_kg = stats.fuel_consumption_l * CO2_KG_PER_LITER;

    TripAnalytics {
        eco_score: eco_score(&valid),
        quality: quality(points),
        speed_percentiles: speed_percentiles(&valid),
        zone_counts: zone_counts(&valid),
    }
}

/// A contiguous run of points below `STOP_SPEED_KMH` spanning more than
/// `STOP_MIN_DURATION_S` counts as one stop.
pub fn detect_stops(valid: &[&TrackPoint]) -> (u32, f64) {
    let mut count = 0u32;
    let mut total_s = 0.0;
    let mut run_start: Option<&TrackPoint> = None;
    let mut run_last: Option<&TrackPoint> = None;

    let mut close_run = |start: Option<&TrackPoint>, last: Option<&TrackPoint>| {
        if let (Some(start), Some(last)) = (start, last) {
            let span = (last.timestamp - start.timestamp).num_milliseconds() as f64 / 1000.0;
            if span > STOP_MIN_DURATION_S {
                count += 1;
                total_s += span;
            }
        }
    };

    for &point in valid {
        if point.speed_kmh < STOP_SPEED_KMH {
            if run_start.is_none() {
                run_start = Some(point);
            }
            run_last = Some(point);
        } else {
            close_run(run_start.take(), run_last.take());
        }
    }
    close_run(run_start, run_last);

    (count, total_s)
}

/// The distance-based average is preferred, unless it diverges from the
/// point-wise mean by more than `SPEED_RECONCILE_DIVERGENCE_KMH` (a single
/// bad duration sample skews the former much more than the latter).
fn reconcile_average_speed(stats: &SessionStatistics, valid: &[&TrackPoint]) -> f64 {
    let distance_based = distance_based_average(stats);
    if valid.is_empty() {
        return distance_based;
    }

    let point_wise = valid.iter().map(|p| p.speed_kmh).sum::<f64>() / valid.len() as f64;
    if (distance_based - point_wise).abs() > SPEED_RECONCILE_DIVERGENCE_KMH {
        point_wise
    } else {
        distance_based
    }
}

/// 0-100, starting from 100: up to 30 points off for time spent over
/// 110 km/h, up to 20 for harsh accelerations, up to 10 for erratic speed
/// (coefficient of variation).
fn eco_score(valid: &[&TrackPoint]) -> f64 {
    if valid.is_empty() {
        return 100.0;
    }

    let n = valid.len() as f64;
    let speeding = valid
        .iter()
        .filter(|p| p.speed_kmh > ECO_SPEEDING_THRESHOLD_KMH)
        .count() as f64;
    let mut score = 100.0 - ECO_SPEEDING_WEIGHT * (speeding / n);

    if valid.len() > 1 {
        let mut harsh = 0usize;
        for pair in valid.windows(2) {
            let dt = (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0;
            if dt > 0.0 {
                let dv_ms = (pair[1].speed_kmh - pair[0].speed_kmh) / 3.6;
                if (dv_ms / dt).abs() > ECO_HARSH_ACCEL_MS2 {
                    harsh += 1;
                }
            }
        }
        score -= ECO_ACCEL_WEIGHT * (harsh as f64 / (n - 1.0));
    }

    let mean = valid.iter().map(|p| p.speed_kmh).sum::<f64>() / n;
    if mean > 0.0 {
        let variance = valid
            .iter()
            .map(|p| (p.speed_kmh - mean).powi(2))
            .sum::<f64>()
            / n;
        let cv = (variance.sqrt() / mean).min(1.0);
        score -= ECO_VARIATION_WEIGHT * cv;
    }

    score.clamp(0.0, 100.0)
}

/// Quality of tracking over every persisted point, invalid ones included.
pub fn quality(points: &[TrackPoint]) -> TrackingQuality {
    if points.is_empty() {
        return TrackingQuality {
            valid_pct: 100.0,
            mean_accuracy_m: 0.0,
            mean_signal_quality: 0.0,
            bucket: QualityBucket::Excellent,
        };
    }

    let n = points.len() as f64;
    let valid_pct = points.iter().filter(|p| p.valid).count() as f64 / n * 100.0;
    let mean_accuracy_m = points.iter().map(|p| p.accuracy_m).sum::<f64>() / n;
    let mean_signal_quality = points.iter().map(|p| p.signal_quality).sum::<f64>() / n;

    let bucket = if valid_pct > QUALITY_EXCELLENT_PCT {
        QualityBucket::Excellent
    } else if valid_pct > QUALITY_GOOD_PCT {
        QualityBucket::Good
    } else if valid_pct > QUALITY_MODERATE_PCT {
        QualityBucket::Moderate
    } else {
        QualityBucket::Poor
    };

    TrackingQuality {
        valid_pct,
        mean_accuracy_m,
        mean_signal_quality,
        bucket,
    }
}

fn speed_percentiles(valid: &[&TrackPoint]) -> SpeedPercentiles {
    let mut speeds: Vec<f64> = valid.iter().map(|p| p.speed_kmh).collect();
    speeds.sort_by(|a, b| a.total_cmp(b));

    SpeedPercentiles {
        p25: percentile(&speeds, 25.0),
        p50: percentile(&speeds, 50.0),
        p75: percentile(&speeds, 75.0),
        p95: percentile(&speeds, 95.0),
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p / 100.0).round() as usize;
    sorted[idx]
}

fn zone_counts(valid: &[&TrackPoint]) -> ZoneCounts {
    let mut zones = ZoneCounts::default();
    for point in valid {
        if point.speed_kmh <= URBAN_MAX_KMH {
            zones.urban += 1;
        } else if point.speed_kmh <= ARTERIAL_MAX_KMH {
            zones.arterial += 1;
        } else {
            zones.highway += 1;
        }
    }
    zones
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geo_types::Point;
    use ride_tracking_lib::track_point::TripPhase;

    fn point(secs: i64, speed_kmh: f64, distance_m: f64, elapsed_s: f64) -> TrackPoint {
        TrackPoint {
            position: Point::new(2.35, 48.85),
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            speed_kmh,
            heading: 0.0,
            altitude: 0.0,
            accuracy_m: 5.0,
            signal_quality: 95.0,
            battery_pct: 80.0,
            phase: TripPhase::EnRouteToDestination,
            event: None,
            distance_delta_m: distance_m,
            time_delta_s: elapsed_s,
            computed_speed_kmh: if elapsed_s > 0.0 {
                distance_m / elapsed_s * 3.6
            } else {
                0.0
            },
            valid: true,
            invalid_reason: None,
        }
    }

    fn run_stats(points: &[TrackPoint]) -> SessionStatistics {
        let mut stats = SessionStatistics::default();
        for p in points.iter().filter(|p| p.valid) {
            apply_sample(&mut stats, p.distance_delta_m, p.time_delta_s, p.speed_kmh);
        }
        stats
    }

    #[test]
    fn incremental_totals_match_deltas() {
        let points = vec![
            point(0, 30.0, 0.0, 0.0),
            point(30, 36.0, 450.0, 30.0),
            point(60, 36.0, 450.0, 30.0),
        ];
        let stats = run_stats(&points);

        let expected: f64 = points.iter().map(|p| p.distance_delta_m).sum();
        assert_eq!(stats.distance_total_m, expected);
        assert_eq!(stats.duration_s, 60.0);
        assert_eq!(stats.max_speed_kmh, 36.0);
        // 900 m in 60 s is 54 km/h distance-based.
        assert!((stats.average_speed_kmh - 54.0).abs() < 0.01);
    }

    #[test]
    fn short_trip_scenario() {
        // 3 points 30 s apart, 900 m total at ~35 km/h.
        let points = vec![
            point(0, 34.0, 0.0, 0.0),
            point(30, 35.0, 450.0, 30.0),
            point(60, 36.0, 450.0, 30.0),
        ];
        let mut stats = run_stats(&points);
        let analytics = finalize(&mut stats, &points);

        assert!((stats.distance_total_m - 900.0).abs() < 0.01);
        assert_eq!(stats.duration_s, 60.0);
        assert_eq!(stats.stop_count, 0);
        assert_eq!(analytics.quality.bucket, QualityBucket::Excellent);
        assert_eq!(analytics.zone_counts.urban, 3);
    }

    #[test]
    fn stop_detection_requires_long_run() {
        // 100 s of standstill: too short to be a stop.
        let mut points = vec![point(0, 20.0, 0.0, 0.0)];
        for i in 0..11 {
            points.push(point(10 + i * 10, 0.5, 0.0, 10.0));
        }
        points.push(point(130, 20.0, 100.0, 10.0));
        let valid: Vec<&TrackPoint> = points.iter().collect();
        let (count, _) = detect_stops(&valid);
        assert_eq!(count, 0);

        // 150 s of standstill: one stop of ~150 s.
        let mut points = vec![point(0, 20.0, 0.0, 0.0)];
        for i in 0..16 {
            points.push(point(10 + i * 10, 0.5, 0.0, 10.0));
        }
        points.push(point(180, 20.0, 100.0, 10.0));
        let valid: Vec<&TrackPoint> = points.iter().collect();
        let (count, total) = detect_stops(&valid);
        assert_eq!(count, 1);
        assert_eq!(total, 150.0);
    }

    #[test]
    fn two_separate_stops_counted() {
        let mut points = Vec::new();
        // First stop: 0..140 s.
        for i in 0..15 {
            points.push(point(i * 10, 0.0, 0.0, 10.0));
        }
        points.push(point(150, 30.0, 200.0, 10.0));
        // Second stop: 160..300 s.
        for i in 0..15 {
            points.push(point(160 + i * 10, 1.0, 0.0, 10.0));
        }
        let valid: Vec<&TrackPoint> = points.iter().collect();
        let (count, _) = detect_stops(&valid);
        assert_eq!(count, 2);
    }

    #[test]
    fn average_speed_prefers_point_wise_on_divergence() {
        // 900 m over a bogus 3600 s duration: distance-based 0.9 km/h,
        // point-wise ~35 km/h. Divergence > 10 km/h, point-wise wins.
        let points = vec![
            point(0, 34.0, 0.0, 0.0),
            point(30, 35.0, 450.0, 30.0),
            point(3600, 36.0, 450.0, 3570.0),
        ];
        let mut stats = run_stats(&points);
        finalize(&mut stats, &points);
        assert!((stats.average_speed_kmh - 35.0).abs() < 0.01);
    }

    #[test]
    fn consumption_penalized_above_ninety() {
        // 100 km at a steady 120 km/h.
        let mut points = vec![point(0, 120.0, 0.0, 0.0)];
        for i in 1..=30 {
            points.push(point(i * 100, 120.0, 3333.3, 100.0));
        }
        let mut stats = run_stats(&points);
        finalize(&mut stats, &points);

        let distance_km = stats.distance_total_m / 1000.0;
        let expected_rate = BASE_CONSUMPTION_L_PER_100KM
            + CONSUMPTION_PENALTY_L_PER_KMH * (stats.average_speed_kmh - 90.0);
        assert!((stats.fuel_consumption_l - distance_km / 100.0 * expected_rate).abs() < 1e-9);
        assert!((stats.co2_emissions_kg - stats.fuel_consumption_l * CO2_KG_PER_LITER).abs() < 1e-9);
        // ~120 km/h average: rate is 10 L/100km, so ~10 L for 100 km.
        assert!(stats.fuel_consumption_l > 9.0 && stats.fuel_consumption_l < 11.0);
    }

    #[test]
    fn eco_score_monotone_in_speeding_fraction() {
        let score_with_speeders = |speeders: usize| {
            let points: Vec<TrackPoint> = (0..20)
                .map(|i| {
                    let speed = if i < speeders { 130.0 } else { 80.0 };
                    point(i as i64 * 30, speed, 600.0, 30.0)
                })
                .collect();
            let valid: Vec<&TrackPoint> = points.iter().collect();
            eco_score(&valid)
        };

        let mut previous = 101.0;
        for speeders in [0, 5, 10, 15, 20] {
            let score = score_with_speeders(speeders);
            assert!(
                score <= previous,
                "score {score} not <= {previous} at {speeders} speeders"
            );
            previous = score;
        }
    }

    #[test]
    fn eco_score_penalizes_harsh_acceleration() {
        let steady: Vec<TrackPoint> = (0..10).map(|i| point(i * 10, 50.0, 140.0, 10.0)).collect();
        // Alternates 0 and 90 km/h every 10 s: |a| = 2.5 m/s².
        let erratic: Vec<TrackPoint> = (0..10)
            .map(|i| point(i * 10, if i % 2 == 0 { 0.0 } else { 90.0 }, 140.0, 10.0))
            .collect();

        let steady_refs: Vec<&TrackPoint> = steady.iter().collect();
        let erratic_refs: Vec<&TrackPoint> = erratic.iter().collect();
        assert!(eco_score(&erratic_refs) < eco_score(&steady_refs));
    }

    #[test]
    fn quality_buckets() {
        let mut points: Vec<TrackPoint> = (0..10).map(|i| point(i * 10, 30.0, 100.0, 10.0)).collect();
        assert_eq!(quality(&points).bucket, QualityBucket::Excellent);

        // 2 invalid of 10: 80% valid.
        for p in points.iter_mut().take(2) {
            p.valid = false;
        }
        assert_eq!(quality(&points).bucket, QualityBucket::Good);

        // 4 invalid of 10: 60%.
        for p in points.iter_mut().take(4) {
            p.valid = false;
        }
        assert_eq!(quality(&points).bucket, QualityBucket::Moderate);

        // 6 invalid of 10: 40%.
        for p in points.iter_mut().take(6) {
            p.valid = false;
        }
        assert_eq!(quality(&points).bucket, QualityBucket::Poor);
    }

    #[test]
    fn percentiles_and_zones() {
        let points: Vec<TrackPoint> = (1..=100)
            .map(|i| point(i as i64 * 10, i as f64, 100.0, 10.0))
            .collect();
        let valid: Vec<&TrackPoint> = points.iter().collect();

        let p = speed_percentiles(&valid);
        assert!((p.p25 - 26.0).abs() <= 1.0);
        assert!((p.p50 - 51.0).abs() <= 1.0);
        assert!((p.p75 - 75.0).abs() <= 1.0);
        assert!((p.p95 - 95.0).abs() <= 1.0);

        let zones = zone_counts(&valid);
        assert_eq!(zones.urban, 50);
        assert_eq!(zones.arterial, 40);
        assert_eq!(zones.highway, 10);
    }
}
