use crate::base::{Error, Result};
use crate::types::{BlindSearchArgs, Point3D};
use log::{trace, warn};

/// Axis moved during one phase of the spiral.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpiralAxis {
    Horizontal,
    Vertical,
}

/// One leg of the rectangular spiral.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpiralPhase {
    pub axis: SpiralAxis,
    /// +1 or -1.
    pub direction: i32,
    /// Travel of the leg in steps.
    pub magnitude: u64,
}

/// Lists the legs of the spiral driven by a blind search.
///
/// Leg `c` moves +H, +V, -H, -V for `c mod 4` = 0, 1, 2, 3 by
/// `gap * (c / 2 + 1)` steps of the active axis. The spiral ends with the
/// first leg longer than the range of its axis.
pub fn spiral_phases(horizontal: &BlindSearchArgs, vertical: &BlindSearchArgs) -> Vec<SpiralPhase> {
    let mut phases = Vec::new();
    if horizontal.gap == 0 || vertical.gap == 0 {
        return phases;
    }

    let mut cycle: u64 = 0;
    loop {
        let (axis, direction, args) = match cycle % 4 {
            0 => (SpiralAxis::Horizontal, 1, horizontal),
            1 => (SpiralAxis::Vertical, 1, vertical),
            2 => (SpiralAxis::Horizontal, -1, horizontal),
            _ => (SpiralAxis::Vertical, -1, vertical),
        };

        let magnitude = args.gap as u64 * (cycle / 2 + 1);
        if magnitude > args.range as u64 {
            trace!(
                "Spiral ends at cycle {}: travel {} exceeds range {}",
                cycle,
                magnitude,
                args.range
            );
            break;
        }

        phases.push(SpiralPhase {
            axis,
            direction,
            magnitude,
        });
        cycle += 1;
    }
    phases
}

/// Rebuilds the intensity map of a blind search.
///
/// Walks the spiral of `spiral_phases` and emits one point every `interval`
/// steps of the active axis; each leg ends exactly on its target. Points take
/// the samples in capture order, missing samples yield zero intensity. Axes
/// with `flip_direction` are reported with inverted sign.
///
/// Returns `Error::SamplingPointMissing` (expected = points, actual = samples)
/// if both counts differ.
pub fn parse_blind_search(
    samples: &[f64],
    horizontal: &BlindSearchArgs,
    vertical: &BlindSearchArgs,
) -> Result<Vec<Point3D>> {
    if horizontal.interval == 0 || vertical.interval == 0 {
        return Err(Error::InvalidArgument {
            description: "blind search interval must not be zero".to_owned(),
        });
    }

    let phases = spiral_phases(horizontal, vertical);
    trace!(
        "Parsing blind search: {} samples, {} spiral legs",
        samples.len(),
        phases.len()
    );

    let mut points = Vec::with_capacity(samples.len());
    let mut index = 0;
    // [x, y]
    let mut pos = [0i64; 2];

    for phase in phases.iter() {
        let (active, interval) = match phase.axis {
            SpiralAxis::Horizontal => (0, horizontal.interval),
            SpiralAxis::Vertical => (1, vertical.interval),
        };
        let origin = pos[active];
        let step = phase.direction as i64 * interval as i64;
        let target = origin + phase.direction as i64 * phase.magnitude as i64;

        loop {
            let z = samples.get(index).copied().unwrap_or(0.0);
            index += 1;
            points.push(Point3D::new(pos[0] as f64, pos[1] as f64, z));

            pos[active] += step;
            if (pos[active] - origin).unsigned_abs() >= phase.magnitude {
                pos[active] = target;
                break;
            }
        }
    }

    if horizontal.flip_direction || vertical.flip_direction {
        for p in points.iter_mut() {
            if horizontal.flip_direction {
                p.x = -p.x;
            }
            if vertical.flip_direction {
                p.y = -p.y;
            }
        }
    }

    if points.len() != samples.len() {
        warn!(
            "Blind search sample count mismatch: {} points, {} samples",
            points.len(),
            samples.len()
        );
        return Err(Error::SamplingPointMissing {
            expected: points.len(),
            actual: samples.len(),
        });
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UnitId;

    fn axes() -> (BlindSearchArgs, BlindSearchArgs) {
        (
            BlindSearchArgs::new(UnitId(1), 40, 20, 50, 20),
            BlindSearchArgs::new(UnitId(2), 40, 20, 50, 20),
        )
    }

    #[test]
    fn spiral_phase_sequence() {
        let (h, v) = axes();
        let phases = spiral_phases(&h, &v);
        let tuples: Vec<_> = phases
            .iter()
            .map(|p| (p.axis, p.direction, p.magnitude))
            .collect();
        assert_eq!(
            tuples,
            vec![
                (SpiralAxis::Horizontal, 1, 20),
                (SpiralAxis::Vertical, 1, 20),
                (SpiralAxis::Horizontal, -1, 40),
                (SpiralAxis::Vertical, -1, 40),
            ]
        );
    }

    #[test]
    fn blind_search_points() {
        let (h, v) = axes();
        let samples = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let points = parse_blind_search(&samples, &h, &v).unwrap();
        let coords: Vec<_> = points.iter().map(|p| (p.x, p.y, p.z)).collect();
        assert_eq!(
            coords,
            vec![
                (0.0, 0.0, 1.0),
                (20.0, 0.0, 2.0),
                (20.0, 20.0, 3.0),
                (0.0, 20.0, 4.0),
                (-20.0, 20.0, 5.0),
                (-20.0, 0.0, 6.0),
            ]
        );
    }

    #[test]
    fn blind_search_flip_direction() {
        let (mut h, v) = axes();
        h.flip_direction = true;
        let points = parse_blind_search(&[0.0; 6], &h, &v).unwrap();
        assert_eq!(points[1].x, -20.0);
        assert_eq!(points[4].x, 20.0);
        assert_eq!(points[2].y, 20.0);
    }

    #[test]
    fn blind_search_snaps_to_leg_target() {
        // interval does not divide the gap
        let h = BlindSearchArgs::new(UnitId(1), 30, 30, 50, 20);
        let v = BlindSearchArgs::new(UnitId(2), 30, 30, 50, 20);
        let points = parse_blind_search(&[0.0; 4], &h, &v).unwrap();
        let coords: Vec<_> = points.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(
            coords,
            vec![(0.0, 0.0), (20.0, 0.0), (30.0, 0.0), (30.0, 20.0)]
        );
    }

    #[test]
    fn blind_search_sample_mismatch() {
        let (h, v) = axes();
        match parse_blind_search(&[1.0; 4], &h, &v) {
            Err(Error::SamplingPointMissing { expected, actual }) => {
                assert_eq!(expected, 6);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
