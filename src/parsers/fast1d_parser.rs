use crate::base::{Error, Result};
use crate::types::Point2D;
use log::{trace, warn};

/// Number of captures a fast-1D scan over `range` produces per channel.
pub fn expected_fast1d_points(range: i32, interval: u16) -> usize {
    let range = range.unsigned_abs() as usize;
    let interval = interval as usize;
    (range + interval - 1) / interval
}

/// Rebuilds the intensity curve of a fast-1D scan.
///
/// Captures are taken every `interval` steps starting at the origin, in the
/// direction of `range`, while the travelled distance is below `|range|`. With
/// `dual_channel` the samples alternate between the primary and the secondary
/// channel. Missing samples yield points with zero intensity. Both curves are
/// translated so that they start at x = 0.
///
/// Returns `Error::SamplingPointMissing` unless every capture holds one sample
/// per channel; `actual` counts the complete captures.
pub fn parse_fast1d(
    samples: &[f64],
    range: i32,
    interval: u16,
    dual_channel: bool,
) -> Result<(Vec<Point2D>, Option<Vec<Point2D>>)> {
    if interval == 0 {
        return Err(Error::InvalidArgument {
            description: "fast-1D interval must not be zero".to_owned(),
        });
    }

    let dir: i64 = if range < 0 { -1 } else { 1 };
    let limit = (range as i64).abs();
    let channels = if dual_channel { 2 } else { 1 };
    trace!(
        "Parsing fast-1D scan: {} samples, range {}, interval {}, channels {}",
        samples.len(),
        range,
        interval,
        channels
    );

    let mut next_sample = {
        let mut index = 0;
        move || {
            let value = samples.get(index).copied().unwrap_or(0.0);
            index += 1;
            value
        }
    };

    let mut primary = Vec::new();
    let mut secondary = if dual_channel { Some(Vec::new()) } else { None };
    let mut i: i64 = 0;
    loop {
        let x = i * interval as i64 * dir;
        if x.abs() >= limit {
            break;
        }
        primary.push(Point2D::new(x as f64, next_sample()));
        if let Some(secondary) = secondary.as_mut() {
            secondary.push(Point2D::new(x as f64, next_sample()));
        }
        i += 1;
    }

    let min_x = primary.iter().map(|p| p.x).fold(0.0, f64::min);
    for p in primary.iter_mut().chain(secondary.iter_mut().flatten()) {
        p.x -= min_x;
    }

    let expected = expected_fast1d_points(range, interval);
    let actual = samples.len() / channels;
    if samples.len() != expected * channels {
        warn!(
            "Fast-1D sample count mismatch: expected {}, got {}",
            expected, actual
        );
        return Err(Error::SamplingPointMissing { expected, actual });
    }

    trace!("Fast-1D scan produced {} points per channel", primary.len());
    Ok((primary, secondary))
}
