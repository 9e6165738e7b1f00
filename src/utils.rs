use crate::internals::{ADC_VREF_MV, M12_MAX_SPEED, M12_MIN_SPEED};
use log::trace;

/// Converts a raw ADC sample to mV.
///
/// The signed 16-bit range maps linearly onto `-ADC_VREF_MV..ADC_VREF_MV`.
#[inline]
pub fn adc_raw_to_mv(raw: i16) -> f64 {
    raw as f64 / 32768.0 * ADC_VREF_MV
}

/// Converts a slice of raw ADC samples to mV.
pub fn adc_raws_to_mv(raws: &[i16]) -> Vec<f64> {
    raws.iter().map(|v| adc_raw_to_mv(*v)).collect()
}

/// Clamps a motion speed into the range the controller accepts.
pub fn clamp_speed(speed: u8) -> u8 {
    let clamped = speed.clamp(M12_MIN_SPEED, M12_MAX_SPEED);
    if clamped != speed {
        trace!("Speed {} clamped to {}", speed, clamped);
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adc_conversion_spans_reference() {
        assert_eq!(adc_raw_to_mv(0), 0.0);
        assert_eq!(adc_raw_to_mv(i16::MIN), -ADC_VREF_MV);
        assert_eq!(adc_raw_to_mv(16384), ADC_VREF_MV / 2.0);
        assert!(adc_raw_to_mv(i16::MAX) < ADC_VREF_MV);
    }

    #[test]
    fn speed_is_clamped() {
        assert_eq!(clamp_speed(0), 1);
        assert_eq!(clamp_speed(55), 55);
        assert_eq!(clamp_speed(200), 100);
    }
}
