use crate::base::{Error, Result};
use crate::types::*;
use byteorder::{ByteOrder, LittleEndian};

fn check_len(name: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        Err(Error::ProtocolError {
            description: format!(
                "invalid data size for {}: expected at least {}, got {}",
                name,
                expected,
                data.len()
            ),
        })
    } else {
        Ok(())
    }
}

#[inline]
fn bit(byte: u8, n: u8) -> bool {
    byte & (1 << n) != 0
}

#[inline]
fn set_bit(byte: &mut u8, n: u8, value: bool) {
    if value {
        *byte |= 1 << n;
    }
}

/// Bit of `UnitState` flags set once the unit has been initialized.
pub const M12_UNIT_FLAG_INITIALIZED: u8 = 0;
/// Bit of `UnitState` flags set once the unit has been homed.
pub const M12_UNIT_FLAG_HOMED: u8 = 1;
/// Bit of `UnitState` flags set while the unit executes a motion.
pub const M12_UNIT_FLAG_BUSY: u8 = 2;

/// Snapshot of one unit as reported by `GET_MCSU_STA`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnitState {
    pub unit: UnitId,
    pub is_initialized: bool,
    pub is_homed: bool,
    pub is_busy: bool,
    pub error: ErrorCode,
    /// Absolute position in steps.
    pub abs_position: i32,
}

impl UnitState {
    pub const SIZE: usize = 7;

    pub fn from_bytes(data: &[u8]) -> Result<UnitState> {
        check_len("UnitState", data, Self::SIZE)?;
        let flags = data[1];
        Ok(UnitState {
            unit: UnitId(data[0]),
            is_initialized: bit(flags, M12_UNIT_FLAG_INITIALIZED),
            is_homed: bit(flags, M12_UNIT_FLAG_HOMED),
            is_busy: bit(flags, M12_UNIT_FLAG_BUSY),
            error: ErrorCode::from_u8(data[2]),
            abs_position: LittleEndian::read_i32(&data[3..7]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 7] {
        let mut flags = 0;
        set_bit(&mut flags, M12_UNIT_FLAG_INITIALIZED, self.is_initialized);
        set_bit(&mut flags, M12_UNIT_FLAG_HOMED, self.is_homed);
        set_bit(&mut flags, M12_UNIT_FLAG_BUSY, self.is_busy);
        let mut out = [self.unit.0, flags, self.error.to_u8(), 0, 0, 0, 0];
        LittleEndian::write_i32(&mut out[3..7], self.abs_position);
        out
    }
}

/// The bit-packed mode byte of a unit.
///
/// | bit | field |
/// |-----|-------|
/// | 0 | motion mode, 0 one-pulse, 1 two-pulse |
/// | 1 | pulse pin, 0 CW, 1 CCW |
/// | 2 | flip direction |
/// | 3 | flip limit sensor |
/// | 4 | detect timing |
/// | 5 | limit sensor active level, 0 high, 1 low |
/// | 6 | flip I/O active level |
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnitMode {
    pub motion_mode: MotionMode,
    pub pulse_pin: PulsePin,
    pub flip_direction: bool,
    pub flip_limit_sensor: bool,
    pub detect_timing: bool,
    pub limit_sensor_active_level: ActiveLevel,
    pub flip_io_active_level: bool,
}

impl UnitMode {
    pub fn from_byte(b: u8) -> UnitMode {
        UnitMode {
            motion_mode: if bit(b, 0) {
                MotionMode::TwoPulse
            } else {
                MotionMode::OnePulse
            },
            pulse_pin: if bit(b, 1) { PulsePin::Ccw } else { PulsePin::Cw },
            flip_direction: bit(b, 2),
            flip_limit_sensor: bit(b, 3),
            detect_timing: bit(b, 4),
            limit_sensor_active_level: if bit(b, 5) {
                ActiveLevel::Low
            } else {
                ActiveLevel::High
            },
            flip_io_active_level: bit(b, 6),
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut b = 0;
        set_bit(&mut b, 0, self.motion_mode == MotionMode::TwoPulse);
        set_bit(&mut b, 1, self.pulse_pin == PulsePin::Ccw);
        set_bit(&mut b, 2, self.flip_direction);
        set_bit(&mut b, 3, self.flip_limit_sensor);
        set_bit(&mut b, 4, self.detect_timing);
        set_bit(&mut b, 5, self.limit_sensor_active_level == ActiveLevel::Low);
        set_bit(&mut b, 6, self.flip_io_active_level);
        b
    }
}

impl Default for UnitMode {
    fn default() -> UnitMode {
        UnitMode::from_byte(0)
    }
}

/// Settings of one unit as reported by `GET_MCSU_SETTINGS`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnitSettings {
    pub unit: UnitId,
    pub mode: UnitMode,
    /// Acceleration in steps.
    pub acceleration: u16,
}

impl UnitSettings {
    pub const SIZE: usize = 4;

    pub fn from_bytes(data: &[u8]) -> Result<UnitSettings> {
        check_len("UnitSettings", data, Self::SIZE)?;
        Ok(UnitSettings {
            unit: UnitId(data[0]),
            mode: UnitMode::from_byte(data[1]),
            acceleration: LittleEndian::read_u16(&data[2..4]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut out = [self.unit.0, self.mode.to_byte(), 0, 0];
        LittleEndian::write_u16(&mut out[2..4], self.acceleration);
        out
    }
}

/// System wide busy flag and error, reported by `GET_SYS_STA`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SystemState {
    pub is_busy: bool,
    pub is_emergency_button_pressed: bool,
    pub error: ErrorCode,
}

impl SystemState {
    pub const SIZE: usize = 2;

    pub fn from_bytes(data: &[u8]) -> Result<SystemState> {
        check_len("SystemState", data, Self::SIZE)?;
        Ok(SystemState {
            is_busy: bit(data[0], 0),
            is_emergency_button_pressed: bit(data[0], 1),
            error: ErrorCode::from_u8(data[1]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        let mut flags = 0;
        set_bit(&mut flags, 0, self.is_busy);
        set_bit(&mut flags, 1, self.is_emergency_button_pressed);
        [flags, self.error.to_u8()]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Identity of the controller, reported by `GET_SYS_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInformation {
    /// Number of units; valid unit ids are `1..=max_unit`.
    pub max_unit: u8,
    pub firmware_version: FirmwareVersion,
    /// Firmware of each unit's driver, index 0 is unit 1.
    pub unit_firmware_versions: Vec<FirmwareVersion>,
}

impl SystemInformation {
    pub fn from_bytes(data: &[u8]) -> Result<SystemInformation> {
        check_len("SystemInformation", data, 4)?;
        let max_unit = data[0];
        check_len("SystemInformation", data, 4 + 3 * max_unit as usize)?;
        let version = |chunk: &[u8]| FirmwareVersion {
            major: chunk[0],
            minor: chunk[1],
            patch: chunk[2],
        };
        Ok(SystemInformation {
            max_unit,
            firmware_version: version(&data[1..4]),
            unit_firmware_versions: data[4..4 + 3 * max_unit as usize]
                .chunks(3)
                .map(version)
                .collect(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![
            self.max_unit,
            self.firmware_version.major,
            self.firmware_version.minor,
            self.firmware_version.patch,
        ];
        for v in &self.unit_firmware_versions {
            out.extend_from_slice(&[v.major, v.minor, v.patch]);
        }
        out
    }
}

/// The last error recorded by the controller, reported by `GET_ERR`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SystemLastError {
    pub unit: UnitId,
    pub error: ErrorCode,
}

impl SystemLastError {
    pub const SIZE: usize = 2;

    pub fn from_bytes(data: &[u8]) -> Result<SystemLastError> {
        check_len("SystemLastError", data, Self::SIZE)?;
        Ok(SystemLastError {
            unit: UnitId(data[0]),
            error: ErrorCode::from_u8(data[1]),
        })
    }

    pub fn to_bytes(&self) -> [u8; 2] {
        [self.unit.0, self.error.to_u8()]
    }
}

/// A window of the capture memory, reported by `READ_MEM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub sequence: u16,
    /// Raw ADC samples.
    pub values: Vec<i16>,
}

impl MemoryBlock {
    pub fn from_bytes(data: &[u8]) -> Result<MemoryBlock> {
        check_len("MemoryBlock", data, 4)?;
        let sequence = LittleEndian::read_u16(&data[0..2]);
        let byte_len = LittleEndian::read_u16(&data[2..4]) as usize;
        let count = byte_len / 2;
        check_len("MemoryBlock", data, 4 + count * 2)?;
        let mut values = vec![0; count];
        LittleEndian::read_i16_into(&data[4..4 + count * 2], &mut values);
        Ok(MemoryBlock { sequence, values })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0; 4 + self.values.len() * 2];
        LittleEndian::write_u16(&mut out[0..2], self.sequence);
        LittleEndian::write_u16(&mut out[2..4], (self.values.len() * 2) as u16);
        LittleEndian::write_i16_into(&self.values, &mut out[4..]);
        out
    }
}

/// Eight digital channels packed into one byte, bit 0 is channel 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct DigitalPorts(pub u8);

impl DigitalPorts {
    pub fn from_bytes(data: &[u8]) -> Result<DigitalPorts> {
        check_len("DigitalPorts", data, 1)?;
        Ok(DigitalPorts(data[0]))
    }

    /// Status of a 1-based channel, `None` outside `1..=8`.
    pub fn channel(&self, channel: u8) -> Option<DigitalIoStatus> {
        if (1..=8).contains(&channel) {
            Some(bit(self.0, channel - 1).into())
        } else {
            None
        }
    }

    /// Status of all eight channels, index 0 is channel 1.
    pub fn channels(&self) -> [DigitalIoStatus; 8] {
        let mut out = [DigitalIoStatus::Off; 8];
        for (i, status) in out.iter_mut().enumerate() {
            *status = bit(self.0, i as u8).into();
        }
        out
    }
}

/// Raw ADC readings of the requested channels, in ascending channel order.
pub fn decode_adc_values(channels: AdcChannels, data: &[u8]) -> Result<Vec<i16>> {
    let count = channels.count();
    check_len("AdcValues", data, count * 2)?;
    let mut values = vec![0; count];
    LittleEndian::read_i16_into(&data[..count * 2], &mut values);
    Ok(values)
}

/// Number of samples in the capture memory, reported by `GET_MEM_LEN`.
pub fn decode_memory_length(data: &[u8]) -> Result<u32> {
    check_len("MemoryLength", data, 4)?;
    Ok(LittleEndian::read_u32(&data[0..4]))
}

/// Firmware mode reported by `CHECKMODE`.
pub fn decode_device_mode(data: &[u8]) -> Result<DeviceMode> {
    check_len("DeviceMode", data, 1)?;
    Ok(DeviceMode::from_u8(data[0]))
}
