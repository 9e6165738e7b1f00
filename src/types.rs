use std::fmt;
use std::time::Duration;

use crate::internals::*;

/// Identifier of one motorized axis of the controller.
///
/// Valid identifiers range from 1 to the number of units reported by
/// `SystemInformation::max_unit` (typically 12). `UnitId::INVALID` denotes "no unit".
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(pub u8);

impl UnitId {
    /// The reserved identifier that refers to no unit at all.
    pub const INVALID: UnitId = UnitId(0);

    /// Returns `true` unless this is `UnitId::INVALID`.
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != UnitId::INVALID
    }
}

impl From<u8> for UnitId {
    fn from(id: u8) -> UnitId {
        UnitId(id)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "unit {}", self.0)
        } else {
            write!(f, "invalid unit")
        }
    }
}

/// Error code reported by the controller for a unit or for the whole system.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None,
    InvalidUnit,
    InvalidParameter,
    NotInitialized,
    NotHomed,
    Busy,
    LimitSensorHit,
    CssTriggered,
    EmergencyStop,
    /// The operation timed out. Also produced locally by `wait_by_system_state`.
    Timeout,
    /// A code this driver does not know by name.
    Other(u8),
}

impl ErrorCode {
    pub fn from_u8(code: u8) -> ErrorCode {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::InvalidUnit,
            2 => ErrorCode::InvalidParameter,
            3 => ErrorCode::NotInitialized,
            4 => ErrorCode::NotHomed,
            5 => ErrorCode::Busy,
            6 => ErrorCode::LimitSensorHit,
            7 => ErrorCode::CssTriggered,
            8 => ErrorCode::EmergencyStop,
            0xFE => ErrorCode::Timeout,
            other => ErrorCode::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ErrorCode::None => 0,
            ErrorCode::InvalidUnit => 1,
            ErrorCode::InvalidParameter => 2,
            ErrorCode::NotInitialized => 3,
            ErrorCode::NotHomed => 4,
            ErrorCode::Busy => 5,
            ErrorCode::LimitSensorHit => 6,
            ErrorCode::CssTriggered => 7,
            ErrorCode::EmergencyStop => 8,
            ErrorCode::Timeout => 0xFE,
            ErrorCode::Other(code) => code,
        }
    }

    /// Returns `true` if the code reports an error.
    #[inline]
    pub fn is_error(self) -> bool {
        self != ErrorCode::None
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::None => write!(f, "no error"),
            ErrorCode::InvalidUnit => write!(f, "invalid unit"),
            ErrorCode::InvalidParameter => write!(f, "invalid parameter"),
            ErrorCode::NotInitialized => write!(f, "unit not initialized"),
            ErrorCode::NotHomed => write!(f, "unit not homed"),
            ErrorCode::Busy => write!(f, "unit busy"),
            ErrorCode::LimitSensorHit => write!(f, "limit sensor hit"),
            ErrorCode::CssTriggered => write!(f, "css triggered"),
            ErrorCode::EmergencyStop => write!(f, "emergency stop"),
            ErrorCode::Timeout => write!(f, "timeout"),
            ErrorCode::Other(code) => write!(f, "error code {:#04X}", code),
        }
    }
}

/// Pulse output scheme of a unit's driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MotionMode {
    /// Pulse + direction.
    OnePulse,
    /// CW pulse + CCW pulse.
    TwoPulse,
}

/// Pin on which the pulse train is emitted in one-pulse mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PulsePin {
    Cw,
    Ccw,
}

/// Active level of an input line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ActiveLevel {
    High,
    Low,
}

/// State of one digital I/O channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DigitalIoStatus {
    Off,
    On,
}

impl From<bool> for DigitalIoStatus {
    fn from(on: bool) -> DigitalIoStatus {
        if on {
            DigitalIoStatus::On
        } else {
            DigitalIoStatus::Off
        }
    }
}

/// Mode the controller firmware currently runs in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceMode {
    Application,
    Dfu,
    Unknown(u8),
}

impl DeviceMode {
    pub fn from_u8(mode: u8) -> DeviceMode {
        match mode {
            0 => DeviceMode::Application,
            1 => DeviceMode::Dfu,
            other => DeviceMode::Unknown(other),
        }
    }
}

/// Set of ADC channels, bit 0 is CH1 and bit 7 is CH8.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct AdcChannels(pub u8);

impl AdcChannels {
    pub const NONE: AdcChannels = AdcChannels(0);
    pub const CH1: AdcChannels = AdcChannels(1 << 0);
    pub const CH2: AdcChannels = AdcChannels(1 << 1);
    pub const CH3: AdcChannels = AdcChannels(1 << 2);
    pub const CH4: AdcChannels = AdcChannels(1 << 3);
    pub const CH5: AdcChannels = AdcChannels(1 << 4);
    pub const CH6: AdcChannels = AdcChannels(1 << 5);
    pub const CH7: AdcChannels = AdcChannels(1 << 6);
    pub const CH8: AdcChannels = AdcChannels(1 << 7);

    /// Number of channels in the set.
    #[inline]
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(&self, other: AdcChannels) -> bool {
        self.0 & other.0 == other.0
    }

    /// Channel numbers (1-based) in ascending order.
    pub fn channels(&self) -> impl Iterator<Item = u8> + '_ {
        (0..8u8).filter(move |b| self.0 & (1 << b) != 0).map(|b| b + 1)
    }
}

impl std::ops::BitOr for AdcChannels {
    type Output = AdcChannels;

    fn bitor(self, rhs: AdcChannels) -> AdcChannels {
        AdcChannels(self.0 | rhs.0)
    }
}

/// Oversampling ratio of the on-board ADC.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AdcOsr {
    None = 0,
    X2 = 1,
    X4 = 2,
    X8 = 3,
    X16 = 4,
    X32 = 5,
    X64 = 6,
}

/// Current-sense threshold channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CssChannel {
    Css1 = 1,
    Css2 = 2,
}

/// Position and intensity of one sample of a one dimensional scan.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    /// Intensity in mV, 0 when the sample is missing.
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Point2D {
        Point2D { x, y }
    }
}

/// Position and intensity of one sample of a two dimensional scan.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    /// Intensity in mV, 0 when the sample is missing.
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Point3D {
        Point3D { x, y, z }
    }
}

/// Arguments of a fast one dimensional scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Fast1dArgs {
    pub unit: UnitId,
    /// Signed travel in steps.
    pub range: i32,
    /// Steps between two ADC captures.
    pub interval: u16,
    pub speed: u8,
    /// Primary capture channel, exactly one channel.
    pub channel: AdcChannels,
    /// Optional secondary capture channel, at most one channel.
    pub second_channel: AdcChannels,
}

/// Arguments of one axis of a blind search.
#[derive(Debug, Clone, PartialEq)]
pub struct BlindSearchArgs {
    pub unit: UnitId,
    /// Largest travel from the origin in steps.
    pub range: u32,
    /// Distance between two spiral rings in steps.
    pub gap: u32,
    pub speed: u8,
    /// Steps between two ADC captures.
    pub interval: u16,
    /// Report positions of this axis with inverted sign.
    pub flip_direction: bool,
}

impl BlindSearchArgs {
    pub fn new(unit: UnitId, range: u32, gap: u32, speed: u8, interval: u16) -> BlindSearchArgs {
        BlindSearchArgs {
            unit,
            range,
            gap,
            speed,
            interval,
            flip_direction: false,
        }
    }
}

/// Arguments of a snake search.
#[derive(Debug, Clone, PartialEq)]
pub struct SnakeSearchArgs {
    pub horizontal_unit: UnitId,
    pub horizontal_range: i32,
    pub vertical_unit: UnitId,
    pub vertical_range: i32,
    /// Distance between two rows in steps.
    pub gap: u32,
    /// Steps between two ADC captures.
    pub interval: u16,
    pub speed: u8,
    /// Move both axes back by half their range before scanning, so the scan
    /// area is centered on the current position.
    pub start_from_center: bool,
    /// Sweep the horizontal axis towards negative positions.
    pub flip_horizontal: bool,
    /// Step the rows towards negative positions.
    pub flip_vertical: bool,
}

impl SnakeSearchArgs {
    /// Arguments of a scan starting at the current position, sweeping in the positive directions.
    pub fn new(
        horizontal_unit: UnitId,
        horizontal_range: i32,
        vertical_unit: UnitId,
        vertical_range: i32,
        gap: u32,
        interval: u16,
        speed: u8,
    ) -> SnakeSearchArgs {
        SnakeSearchArgs {
            horizontal_unit,
            horizontal_range,
            vertical_unit,
            vertical_range,
            gap,
            interval,
            speed,
            start_from_center: false,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }

    /// Horizontal range as sent to the controller, negative when flipped.
    pub fn signed_horizontal_range(&self) -> i32 {
        signed_range(self.horizontal_range, self.flip_horizontal)
    }

    /// Vertical range as sent to the controller, negative when flipped.
    pub fn signed_vertical_range(&self) -> i32 {
        signed_range(self.vertical_range, self.flip_vertical)
    }
}

fn signed_range(range: i32, flip: bool) -> i32 {
    if flip {
        range.wrapping_neg()
    } else {
        range
    }
}

/// Progress of a chunked memory read-back.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryReadProgress {
    /// Samples retrieved so far.
    pub read: usize,
    /// Samples stored in the controller memory.
    pub total: usize,
}

impl MemoryReadProgress {
    /// Fraction of the samples retrieved, in `0.0..=1.0`.
    pub fn complete(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.read as f64 / self.total as f64
        }
    }
}

/// Stage of a running blind search.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlindSearchStage {
    /// The axes are moving and the ADC is capturing.
    Scan,
    /// The captured samples are being transmitted to the host.
    Transmit,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BlindSearchProgress {
    pub stage: BlindSearchStage,
    pub progress: f64,
}

/// Timeouts and poll intervals used by an `M12Device`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOptions {
    /// How long a single exchange waits for its response frame.
    pub read_timeout: Duration,

    /// How long a moving unit may stay at the same position before the wait gives up.
    pub wait_busy_timeout: Duration,

    /// How long a blind or snake search may keep the system busy.
    pub wait_alignment_timeout: Duration,

    /// Default pause between two polls of a unit or system state.
    pub loop_interval: Duration,

    /// Pause between two polls while a search is running.
    pub alignment_loop_interval: Duration,
}

impl Default for DeviceOptions {
    fn default() -> DeviceOptions {
        DeviceOptions {
            read_timeout: M12_DEFAULT_READ_TIMEOUT,
            wait_busy_timeout: M12_DEFAULT_WAIT_BUSY_TIMEOUT,
            wait_alignment_timeout: M12_DEFAULT_WAIT_ALIGNMENT_TIMEOUT,
            loop_interval: M12_DEFAULT_LOOP_INTERVAL,
            alignment_loop_interval: M12_ALIGNMENT_LOOP_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adc_channels_iterate_ascending() {
        let set = AdcChannels::CH3 | AdcChannels::CH1 | AdcChannels::CH8;
        assert_eq!(set.count(), 3);
        assert_eq!(set.channels().collect::<Vec<_>>(), vec![1, 3, 8]);
        assert!(set.contains(AdcChannels::CH3));
        assert!(!set.contains(AdcChannels::CH2));
    }

    #[test]
    fn error_code_mapping() {
        for code in 0..=255u8 {
            assert_eq!(ErrorCode::from_u8(code).to_u8(), code);
        }
        assert_eq!(ErrorCode::from_u8(0xFE), ErrorCode::Timeout);
        assert!(!ErrorCode::None.is_error());
    }
}
