//! Traffic estimation
//!
//! Density is a random baseline scaled by a time-of-day peak multiplier:
//! - Weekday rush hours weigh major junctions heavier than medium ones
//! - Weekends only have a midday and an evening bump
//! - A live routing sample, when usable, replaces the speed/wait defaults
//!
//! The random source is a parameter so tests can seed it.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use rand::Rng;
use tracing::{debug, warn};

use crate::intersections::{Intersection, IntersectionClass};
use crate::models::{Reading, TrafficStatus};

/// Travel sample for one intersection, as returned by the routing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSample {
    pub duration_secs: i64,
    pub distance_m: i64,
}

impl RoutingSample {
    pub fn is_usable(&self) -> bool {
        self.duration_secs > 0 && self.distance_m > 0
    }
}

/// Peak multiplier for the local wall-clock time of `now`.
pub fn peak_multiplier(now: &DateTime<FixedOffset>, class: IntersectionClass) -> f64 {
    let hour = now.hour();
    let minute = now.minute();
    let weekend = now.weekday().number_from_monday() >= 6;
    let major = class == IntersectionClass::Major;

    if weekend {
        return match hour {
            11..=15 => 1.6,
            19..=22 => 1.3,
            _ => 1.0,
        };
    }

    // 07:00-09:30 and 17:00-19:30; the last hour only counts up to minute 30
    let morning = (7..=8).contains(&hour) || (hour == 9 && minute <= 30);
    let evening = (17..=18).contains(&hour) || (hour == 19 && minute <= 30);

    if morning {
        if major { 2.8 } else { 2.2 }
    } else if evening {
        if major { 3.2 } else { 2.5 }
    } else if (12..=14).contains(&hour) {
        1.8
    } else if (10..=16).contains(&hour) {
        1.4
    } else {
        1.0
    }
}

/// Computes one reading. Draws exactly two values from `rng`.
pub fn estimate<R: Rng + ?Sized>(
    rng: &mut R,
    intersection: &Intersection,
    now: DateTime<FixedOffset>,
    routing: Option<&RoutingSample>,
) -> Reading {
    let baseline: f64 = rng.gen_range(0.1..0.3);
    let density = (baseline * peak_multiplier(&now, intersection.class)).min(1.0);

    let mut avg_speed = (60.0 - density * 45.0).round().max(15.0) as u32;
    let mut wait_time = (density * 180.0).round() as u32;

    match routing {
        Some(sample) if sample.is_usable() => {
            let distance_km = sample.distance_m as f64 / 1000.0;
            let hours = sample.duration_secs as f64 / 3600.0;
            avg_speed = (distance_km / hours).round() as u32;
            wait_time = (sample.duration_secs % 180) as u32;
            debug!(
                "{}: {:.1} km, {}s, {} km/h",
                intersection.name, distance_km, sample.duration_secs, avg_speed
            );
        }
        Some(sample) => {
            warn!(
                "Ignoring routing sample for {} (duration {}s, distance {}m)",
                intersection.name, sample.duration_secs, sample.distance_m
            );
        }
        None => {}
    }

    let density_pct = (density * 1000.0).round() / 10.0;
    let jitter: f64 = rng.gen_range(10.0..50.0);

    Reading {
        intersection_id: intersection.id,
        name: intersection.name.to_string(),
        latitude: intersection.latitude,
        longitude: intersection.longitude,
        density: density_pct,
        avg_speed,
        wait_time,
        vehicle_count: (density * 150.0 + jitter).round() as u32,
        status: TrafficStatus::from_density(density_pct),
        timestamp: now.with_timezone(&Utc),
        correlation_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intersections::ANKARA_INTERSECTIONS;
    use chrono::Duration;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use traffic_devkit::{weekday_at as weekday, weekend_at as weekend};

    fn major() -> &'static Intersection {
        &ANKARA_INTERSECTIONS[0]
    }

    fn medium() -> &'static Intersection {
        &ANKARA_INTERSECTIONS[2]
    }

    #[test]
    fn test_weekday_multipliers() {
        use IntersectionClass::*;
        assert_eq!(peak_multiplier(&weekday(7, 0), Major), 2.8);
        assert_eq!(peak_multiplier(&weekday(8, 45), Medium), 2.2);
        assert_eq!(peak_multiplier(&weekday(9, 30), Major), 2.8);
        assert_eq!(peak_multiplier(&weekday(9, 31), Major), 1.0);
        assert_eq!(peak_multiplier(&weekday(17, 0), Major), 3.2);
        assert_eq!(peak_multiplier(&weekday(19, 30), Medium), 2.5);
        assert_eq!(peak_multiplier(&weekday(19, 31), Medium), 1.0);
        assert_eq!(peak_multiplier(&weekday(12, 0), Medium), 1.8);
        assert_eq!(peak_multiplier(&weekday(14, 59), Major), 1.8);
        assert_eq!(peak_multiplier(&weekday(10, 0), Major), 1.4);
        assert_eq!(peak_multiplier(&weekday(16, 59), Medium), 1.4);
        assert_eq!(peak_multiplier(&weekday(3, 0), Major), 1.0);
    }

    #[test]
    fn test_weekend_multipliers() {
        use IntersectionClass::*;
        assert_eq!(peak_multiplier(&weekend(8, 0), Major), 1.0);
        assert_eq!(peak_multiplier(&weekend(11, 0), Major), 1.6);
        assert_eq!(peak_multiplier(&weekend(15, 59), Medium), 1.6);
        assert_eq!(peak_multiplier(&weekend(19, 0), Medium), 1.3);
        assert_eq!(peak_multiplier(&weekend(22, 59), Major), 1.3);
        assert_eq!(peak_multiplier(&weekend(23, 0), Major), 1.0);
    }

    #[test]
    fn test_bounds_hold_over_a_week() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let start = weekday(0, 0);
        for step in 0..(7 * 48) {
            let now = start + Duration::minutes(30 * step);
            for intersection in ANKARA_INTERSECTIONS.iter() {
                let reading = estimate(&mut rng, intersection, now, None);
                assert!((0.0..=100.0).contains(&reading.density), "{reading:?}");
                assert!(reading.avg_speed >= 15, "{reading:?}");
                assert_eq!(reading.status, TrafficStatus::from_density(reading.density));
                match reading.status {
                    TrafficStatus::Critical => assert!(reading.density > 70.0),
                    TrafficStatus::Moderate => {
                        assert!(reading.density > 40.0 && reading.density <= 70.0)
                    }
                    TrafficStatus::Normal => assert!(reading.density <= 40.0),
                }
            }
        }
    }

    #[test]
    fn test_density_has_one_decimal() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..50 {
            let reading = estimate(&mut rng, major(), weekday(8, 0), None);
            let scaled = reading.density * 10.0;
            assert!((scaled - scaled.round()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_peak_ordering_at_eight() {
        fn mean_density(intersection: &Intersection, now: DateTime<FixedOffset>) -> f64 {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            let total: f64 = (0..500)
                .map(|_| estimate(&mut rng, intersection, now, None).density)
                .sum();
            total / 500.0
        }

        let weekday_major = mean_density(major(), weekday(8, 0));
        let weekday_medium = mean_density(medium(), weekday(8, 0));
        let weekend_major = mean_density(major(), weekend(8, 0));
        let weekend_medium = mean_density(medium(), weekend(8, 0));

        assert!(weekday_major > weekday_medium);
        assert!(weekday_medium > weekend_major);
        assert!(weekday_medium > weekend_medium);
    }

    #[test]
    fn test_routing_sample_overrides_defaults() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sample = RoutingSample { duration_secs: 600, distance_m: 5000 };
        let reading = estimate(&mut rng, major(), weekday(8, 0), Some(&sample));
        assert_eq!(reading.avg_speed, 30);
        assert_eq!(reading.wait_time, 60);
    }

    #[test]
    fn test_routed_speed_is_not_floored() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sample = RoutingSample { duration_secs: 2000, distance_m: 5000 };
        let reading = estimate(&mut rng, major(), weekday(8, 0), Some(&sample));
        assert_eq!(reading.avg_speed, 9);
        assert_eq!(reading.wait_time, 2000 % 180);
    }

    #[test]
    fn test_unusable_sample_falls_back() {
        let now = weekday(18, 0);
        let baseline = estimate(&mut ChaCha8Rng::seed_from_u64(5), medium(), now, None);

        for sample in [
            RoutingSample { duration_secs: 0, distance_m: 5000 },
            RoutingSample { duration_secs: 600, distance_m: 0 },
            RoutingSample { duration_secs: -1, distance_m: -1 },
        ] {
            let reading = estimate(&mut ChaCha8Rng::seed_from_u64(5), medium(), now, Some(&sample));
            assert_eq!(reading, baseline);
        }
    }

    #[test]
    fn test_defaults_follow_density() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let reading = estimate(&mut rng, medium(), weekend(3, 0), None);
        let fraction = reading.density / 100.0;
        // density 0.1..0.3 at night: speed 46..56, wait 18..54
        assert!((46..=56).contains(&reading.avg_speed));
        assert!((18..=54).contains(&reading.wait_time));
        assert!(reading.vehicle_count >= (fraction * 150.0 + 10.0).floor() as u32);
        assert_eq!(reading.timestamp, weekend(3, 0).with_timezone(&Utc));
        assert!(reading.correlation_id.is_none());
    }
}
