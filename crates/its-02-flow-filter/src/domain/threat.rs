//! Relevance of a remote vehicle to the host.
//!
//! Positions are projected onto a local plane around the host, which is
//! accurate over the few hundred metres a safety message is relevant for.
//!
//! ```text
//!            longitudinal (host heading)
//!                  ↑
//!   adjacent left  │  same lane  │  adjacent right
//!   ───────────────┼─────────────┼──────────────→ lateral
//! ```

use super::record::{LanePosition, RvClassification};
use shared_types::entities::Kinematics;
use shared_types::geo::{distance_m, GeoPoint};

/// Remote vehicles farther than this are out of zone.
pub const ZONE_RADIUS_M: f64 = 300.0;

pub const LANE_WIDTH_M: f64 = 3.6;

/// Longitudinal acceleration at or below this (0.01 m/s²) is rapid
/// deceleration.
pub const RAPID_DECELERATION: i16 = -400;

/// Slower than this counts as stopped.
pub const STOPPED_MPS: f64 = 0.5;

/// Heading difference above which a vehicle is oncoming.
const ONCOMING_DEG: f64 = 135.0;

/// Closing speeds below this never collide.
const MIN_CLOSING_MPS: f64 = 0.1;

const METRES_PER_DEGREE: f64 = 111_320.0;

/// Classifies `remote` relative to `host` for the relevance filter.
#[must_use]
pub fn classify_remote(host: &Kinematics, remote: &Kinematics) -> RvClassification {
    let distance = distance_m(GeoPoint::from(host), GeoPoint::from(remote));

    let north = (remote.latitude_deg() - host.latitude_deg()) * METRES_PER_DEGREE;
    let east = (remote.longitude_deg() - host.longitude_deg())
        * METRES_PER_DEGREE
        * host.latitude_deg().to_radians().cos();
    let heading = host.heading_deg().to_radians();
    let longitudinal = east * heading.sin() + north * heading.cos();
    let lateral = east * heading.cos() - north * heading.sin();

    let heading_diff = angle_between(host.heading_deg(), remote.heading_deg());
    let ahead = longitudinal >= 0.0;
    let lane = lane_position(lateral, ahead, heading_diff);

    // Remote speed along the host heading; negative when oncoming.
    let remote_along = remote.speed_mps() * heading_diff.to_radians().cos();
    let closing = if ahead {
        host.speed_mps() - remote_along
    } else {
        remote_along - host.speed_mps()
    };
    let ttc_ms = if closing > MIN_CLOSING_MPS {
        (longitudinal.abs() / closing * 1000.0).min(f64::from(u32::MAX)) as u32
    } else {
        u32::MAX
    };

    RvClassification {
        out_of_zone: distance > ZONE_RADIUS_M,
        ttc_ms,
        rapid_deceleration: remote.long_accel <= RAPID_DECELERATION,
        stopped: remote.speed_mps() < STOPPED_MPS,
        lane,
    }
}

/// Smallest angle between two headings, in `0..=180` degrees.
fn angle_between(a_deg: f64, b_deg: f64) -> f64 {
    let diff = (a_deg - b_deg).rem_euclid(360.0);
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

fn lane_position(lateral: f64, ahead: bool, heading_diff: f64) -> LanePosition {
    if heading_diff > ONCOMING_DEG {
        return LanePosition::Oncoming;
    }
    let offset = lateral.abs();
    if offset < LANE_WIDTH_M / 2.0 {
        if ahead {
            LanePosition::SameAhead
        } else {
            LanePosition::SameBehind
        }
    } else if offset < LANE_WIDTH_M * 1.5 {
        match (lateral < 0.0, ahead) {
            (true, true) => LanePosition::AdjacentLeftAhead,
            (true, false) => LanePosition::AdjacentLeftBehind,
            (false, true) => LanePosition::AdjacentRightAhead,
            (false, false) => LanePosition::AdjacentRightBehind,
        }
    } else {
        LanePosition::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1e-7 degree units per metre of latitude.
    const LAT_PER_M: f64 = 1e7 / METRES_PER_DEGREE;

    fn vehicle(north_m: f64, east_m: f64, speed_mps: f64, heading_deg: f64) -> Kinematics {
        Kinematics {
            latitude: (north_m * LAT_PER_M) as i32,
            longitude: (east_m * LAT_PER_M) as i32,
            speed: (speed_mps / 0.02) as u32,
            heading: (heading_deg / 0.0125) as u16,
            ..Default::default()
        }
    }

    /// Test: a slower vehicle ahead in the host lane is a relevant threat
    #[test]
    fn test_slower_vehicle_ahead_in_lane() {
        let host = vehicle(0.0, 0.0, 20.0, 0.0);
        let remote = vehicle(50.0, 0.0, 10.0, 0.0);
        let c = classify_remote(&host, &remote);

        assert_eq!(c.lane, LanePosition::SameAhead);
        assert!(!c.out_of_zone);
        // 50 m closing at 10 m/s.
        assert!((4_900..=5_100).contains(&c.ttc_ms), "ttc {}", c.ttc_ms);
        assert!(!c.is_irrelevant());
    }

    /// Test: lateral offset picks the adjacent lane on the correct side
    #[test]
    fn test_adjacent_lanes_and_behind() {
        let host = vehicle(0.0, 0.0, 20.0, 0.0);
        let right_behind = classify_remote(&host, &vehicle(-30.0, 3.6, 20.0, 0.0));
        assert_eq!(right_behind.lane, LanePosition::AdjacentRightBehind);
        assert_eq!(right_behind.ttc_ms, u32::MAX);

        let left_ahead = classify_remote(&host, &vehicle(30.0, -3.6, 20.0, 0.0));
        assert_eq!(left_ahead.lane, LanePosition::AdjacentLeftAhead);
    }

    /// Test: distance and opposite heading set out-of-zone and oncoming
    #[test]
    fn test_far_and_oncoming() {
        let host = vehicle(0.0, 0.0, 20.0, 0.0);
        assert!(classify_remote(&host, &vehicle(400.0, 0.0, 20.0, 0.0)).out_of_zone);

        let oncoming = classify_remote(&host, &vehicle(100.0, -3.6, 20.0, 180.0));
        assert_eq!(oncoming.lane, LanePosition::Oncoming);
        // 100 m closing at 40 m/s.
        assert!((2_400..=2_600).contains(&oncoming.ttc_ms), "ttc {}", oncoming.ttc_ms);
    }

    /// Test: stopped and braking flags come from the remote kinematics
    #[test]
    fn test_stopped_and_braking_flags() {
        let host = vehicle(0.0, 0.0, 20.0, 0.0);
        let mut remote = vehicle(20.0, 10.0, 0.0, 0.0);
        remote.long_accel = -500;
        let c = classify_remote(&host, &remote);
        assert!(c.stopped);
        assert!(c.rapid_deceleration);
        assert_eq!(c.lane, LanePosition::Unknown);
        assert!(c.is_irrelevant());
    }
}
