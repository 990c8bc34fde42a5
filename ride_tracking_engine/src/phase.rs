//! Maps a validated position to a trip sub-phase using geofences around the
//! pending pickups and the destination. Stateless: the session manager
//! applies the result and marks pickups reached.

use geo_types::Point;
use ride_tracking_lib::geo_math;
use ride_tracking_lib::track_point::TripPhase;
use ride_tracking_lib::track_session::Landmarks;

pub const PICKUP_RADIUS_M: f64 = 100.0;
pub const DESTINATION_RADIUS_M: f64 = 200.0;

/// Ties are broken by nearest radius first (pickup before destination).
/// With no landmark in range the phase follows the remaining work: pending
/// pickups mean we are en route to one, otherwise en route to the
/// destination. Without any landmark data the current phase is kept.
pub fn infer_phase(position: Point<f64>, landmarks: &Landmarks, current: TripPhase) -> TripPhase {
    if nearest_pending_pickup(position, landmarks)
        .is_some_and(|(_, distance)| distance <= PICKUP_RADIUS_M)
    {
        return TripPhase::ArrivedAtPickup;
    }

    if let Some(destination) = landmarks.destination {
        if geo_math::distance_meters(position, destination) <= DESTINATION_RADIUS_M {
            return TripPhase::Arrived;
        }
    }

    if landmarks.pending_pickups().next().is_some() {
        return TripPhase::EnRouteToPickup;
    }

    if landmarks.destination.is_some() {
        return TripPhase::EnRouteToDestination;
    }

    current
}

/// Index and distance of the closest still-pending pickup.
pub fn nearest_pending_pickup(position: Point<f64>, landmarks: &Landmarks) -> Option<(usize, f64)> {
    landmarks
        .pickups
        .iter()
        .enumerate()
        .filter(|(_, p)| p.reached_at.is_none())
        .map(|(i, p)| (i, geo_math::distance_meters(position, p.position)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ride_tracking_lib::track_session::PickupPoint;

    fn landmarks_with(pickups: Vec<(f64, f64)>, destination: Option<(f64, f64)>) -> Landmarks {
        Landmarks {
            start: None,
            end: None,
            destination: destination.map(|(lon, lat)| Point::new(lon, lat)),
            pickups: pickups
                .into_iter()
                .enumerate()
                .map(|(i, (lon, lat))| PickupPoint {
                    passenger_id: i as i64 + 1,
                    position: Point::new(lon, lat),
                    reached_at: None,
                })
                .collect(),
        }
    }

    #[test]
    fn near_pending_pickup_wins() {
        let landmarks = landmarks_with(vec![(2.35, 48.85)], Some((2.36, 48.86)));
        // ~50 m from the pickup.
        let phase = infer_phase(
            Point::new(2.35, 48.85045),
            &landmarks,
            TripPhase::EnRouteToPickup,
        );
        assert_eq!(phase, TripPhase::ArrivedAtPickup);
    }

    #[test]
    fn near_destination_when_pickups_done() {
        let mut landmarks = landmarks_with(vec![(2.35, 48.85)], Some((2.36, 48.86)));
        landmarks.pickups[0].reached_at = Some(Utc::now());
        // ~100 m from the destination.
        let phase = infer_phase(
            Point::new(2.36, 48.8609),
            &landmarks,
            TripPhase::EnRouteToDestination,
        );
        assert_eq!(phase, TripPhase::Arrived);
    }

    #[test]
    fn pickup_beats_destination_when_both_in_range() {
        // Pickup and destination 120 m apart; position inside both fences.
        let landmarks = landmarks_with(vec![(2.35, 48.85)], Some((2.35, 48.8511)));
        let phase = infer_phase(
            Point::new(2.35, 48.8505),
            &landmarks,
            TripPhase::EnRouteToPickup,
        );
        assert_eq!(phase, TripPhase::ArrivedAtPickup);
    }

    #[test]
    fn far_from_everything_heads_for_remaining_work() {
        let landmarks = landmarks_with(vec![(2.35, 48.85)], Some((2.36, 48.86)));
        let phase = infer_phase(Point::new(2.30, 48.80), &landmarks, TripPhase::AwaitingPassengers);
        assert_eq!(phase, TripPhase::EnRouteToPickup);

        let mut done = landmarks.clone();
        done.pickups[0].reached_at = Some(Utc::now());
        let phase = infer_phase(Point::new(2.30, 48.80), &done, TripPhase::PassengersBoarded);
        assert_eq!(phase, TripPhase::EnRouteToDestination);
    }

    #[test]
    fn no_landmarks_keeps_current_phase() {
        let landmarks = Landmarks::default();
        let phase = infer_phase(
            Point::new(2.35, 48.85),
            &landmarks,
            TripPhase::PassengersBoarded,
        );
        assert_eq!(phase, TripPhase::PassengersBoarded);
    }
}
