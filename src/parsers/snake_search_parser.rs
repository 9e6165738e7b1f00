use crate::base::{Error, Result};
use crate::types::{Point3D, SnakeSearchArgs};
use log::{trace, warn};

/// Rebuilds the intensity map of a snake search.
///
/// Rows are swept alternately left to right and right to left, one point every
/// `interval` steps, clamped to `0..=horizontal_range`. Reaching either end of a
/// row moves `gap` steps up; the scan ends once the row exceeds
/// `vertical_range`. Each point takes the next sample, missing samples yield
/// zero intensity.
///
/// Positions are relative to where the axes stood before the scan. Without
/// centering or flips this is the controller's own scan frame, starting at
/// (0, 0). Flipped axes are mirrored, and with `start_from_center` both axes
/// are offset by half their range.
///
/// Returns `Error::SamplingPointMissing` (expected = points, actual = samples)
/// if both counts differ.
pub fn parse_snake_search(samples: &[f64], args: &SnakeSearchArgs) -> Result<Vec<Point3D>> {
    if args.interval == 0 || args.gap == 0 {
        return Err(Error::InvalidArgument {
            description: "snake search gap and interval must not be zero".to_owned(),
        });
    }
    if args.horizontal_range < 0 || args.vertical_range < 0 {
        return Err(Error::InvalidArgument {
            description: "snake search ranges must not be negative".to_owned(),
        });
    }

    trace!(
        "Parsing snake search: {} samples, {}x{} steps, gap {}, interval {}",
        samples.len(),
        args.horizontal_range,
        args.vertical_range,
        args.gap,
        args.interval
    );

    let h_range = args.horizontal_range as i64;
    let v_range = args.vertical_range as i64;
    let mut points = Vec::with_capacity(samples.len());
    let mut index = 0;
    let (mut x, mut y) = (0i64, 0i64);
    let mut direction = 1i64;

    loop {
        let z = samples.get(index).copied().unwrap_or(0.0);
        index += 1;
        points.push(Point3D::new(x as f64, y as f64, z));

        x += args.interval as i64 * direction;
        if x < 0 {
            x = 0;
        } else if x > h_range {
            x = h_range;
        } else {
            continue;
        }

        // end of the row
        direction = -direction;
        y += args.gap as i64;
        if y > v_range {
            break;
        }
    }

    let h_dir = if args.flip_horizontal { -1.0 } else { 1.0 };
    let v_dir = if args.flip_vertical { -1.0 } else { 1.0 };
    let (h_offset, v_offset) = if args.start_from_center {
        ((h_range / 2) as f64, (v_range / 2) as f64)
    } else {
        (0.0, 0.0)
    };
    for p in points.iter_mut() {
        p.x = h_dir * (p.x - h_offset);
        p.y = v_dir * (p.y - v_offset);
    }

    if points.len() != samples.len() {
        warn!(
            "Snake search sample count mismatch: {} points, {} samples",
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

    fn args() -> SnakeSearchArgs {
        SnakeSearchArgs {
            horizontal_unit: UnitId(1),
            horizontal_range: 40,
            vertical_unit: UnitId(2),
            vertical_range: 20,
            gap: 10,
            interval: 20,
            speed: 50,
            start_from_center: false,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }

    #[test]
    fn snake_search_serpentine_rows() {
        let samples: Vec<f64> = (1..=9).map(|v| v as f64).collect();
        let points = parse_snake_search(&samples, &args()).unwrap();
        let coords: Vec<_> = points.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(
            coords,
            vec![
                (0.0, 0.0),
                (20.0, 0.0),
                (40.0, 0.0),
                (40.0, 10.0),
                (20.0, 10.0),
                (0.0, 10.0),
                (0.0, 20.0),
                (20.0, 20.0),
                (40.0, 20.0),
            ]
        );
        // every point consumes its own sample
        let zs: Vec<_> = points.iter().map(|p| p.z).collect();
        assert_eq!(zs, samples);
    }

    #[test]
    fn snake_search_centered_and_flipped() {
        let mut args = args();
        args.start_from_center = true;
        args.flip_horizontal = true;
        let points = parse_snake_search(&[0.0; 9], &args).unwrap();
        assert_eq!((points[0].x, points[0].y), (20.0, -10.0));
        assert_eq!((points[2].x, points[2].y), (-20.0, -10.0));
        assert_eq!((points[8].x, points[8].y), (-20.0, 10.0));
    }

    #[test]
    fn snake_search_sample_mismatch() {
        match parse_snake_search(&[1.0; 5], &args()) {
            Err(Error::SamplingPointMissing { expected, actual }) => {
                assert_eq!(expected, 9);
                assert_eq!(actual, 5);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn snake_search_rejects_zero_gap() {
        let mut args = args();
        args.gap = 0;
        assert!(parse_snake_search(&[], &args).is_err());
    }
}
