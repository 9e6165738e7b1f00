use crate::answers::UnitMode;
use crate::base::{Error, Message, Result};
use crate::types::*;
use byteorder::{ByteOrder, LittleEndian};

// General commands

/// Asks whether the firmware runs the application or the DFU loader.
pub const M12_CMD_CHECKMODE: u8 = 0;

/// Homes a unit. Payload: unit, acceleration, low speed, high speed.
pub const M12_CMD_HOME: u8 = 1;

/// Moves a unit by a relative number of steps.
pub const M12_CMD_MOVE: u8 = 2;

/// Moves a unit and toggles the trigger output every `interval` steps.
pub const M12_CMD_MOVE_T_OUT: u8 = 3;

/// Moves a unit and captures the configured ADC channels every `interval` steps.
pub const M12_CMD_MOVE_T_ADC: u8 = 4;

/// Moves a unit with a custom microstep setting.
pub const M12_CMD_FAST_MOVE: u8 = 5;

/// Stops a unit immediately.
pub const M12_CMD_STOP: u8 = 6;

/// Sets the acceleration of a unit in steps.
pub const M12_CMD_SET_ACC: u8 = 7;

/// Writes the bit-packed mode byte of a unit.
pub const M12_CMD_SET_MODE: u8 = 8;

/// Requests firmware versions and the number of units.
pub const M12_CMD_GET_SYS_INFO: u8 = 9;

/// Requests the state of one unit.
pub const M12_CMD_GET_MCSU_STA: u8 = 10;

/// Requests the settings of one unit.
pub const M12_CMD_GET_MCSU_SETTINGS: u8 = 11;

/// Requests the system busy flag and error.
pub const M12_CMD_GET_SYS_STA: u8 = 12;

/// Requests the last error recorded by the controller.
pub const M12_CMD_GET_ERR: u8 = 13;

// Memory commands

/// Requests the number of samples stored in the capture memory.
pub const M12_CMD_GET_MEM_LEN: u8 = 14;

/// Reads a block of samples. Payload: offset, length.
pub const M12_CMD_READ_MEM: u8 = 15;

/// Empties the capture memory.
pub const M12_CMD_CLEAR_MEM: u8 = 16;

// I/O and analog commands

pub const M12_CMD_SET_DOUT: u8 = 17;
pub const M12_CMD_READ_DOUT: u8 = 18;
pub const M12_CMD_READ_DIN: u8 = 19;
pub const M12_CMD_READ_AD: u8 = 20;
pub const M12_CMD_SET_ADC_OSR: u8 = 21;
pub const M12_CMD_EN_CSS: u8 = 22;
pub const M12_CMD_SET_CSSTHD: u8 = 23;

/// Selects the ADC channels captured by triggered moves.
pub const M12_CMD_SET_T_ADC: u8 = 24;

/// Selects the digital output toggled by triggered moves.
pub const M12_CMD_SET_T_OUT: u8 = 25;

/// Mirrors a digital input onto a digital output.
pub const M12_CMD_LINK_DIN_DOUT: u8 = 0xB0;

// Alignment commands

pub const M12_CMD_BLINDSEARCH: u8 = 0xC0;
pub const M12_CMD_SNAKESEARCH: u8 = 0xC1;

/// Writes the settings of a unit to flash.
pub const M12_CMD_SAV_MCSU_ENV: u8 = 0xD0;

// System commands

/// Writes the key that makes the loader enter DFU mode after the next reset.
pub const M12_CMD_SYS_WR_DFUKEY: u8 = 0xE0;

pub const M12_CMD_SYS_RESET: u8 = 0xE1;

/// Every request the controller understands, one variant per opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CheckMode,
    Home {
        unit: UnitId,
        acceleration: u16,
        low_speed: u8,
        high_speed: u8,
    },
    Move {
        unit: UnitId,
        steps: i32,
        speed: u8,
    },
    MoveTriggerOutput {
        unit: UnitId,
        steps: i32,
        speed: u8,
        interval: u16,
    },
    MoveTriggerAdc {
        unit: UnitId,
        steps: i32,
        speed: u8,
        interval: u16,
    },
    FastMove {
        unit: UnitId,
        steps: i32,
        speed: u8,
        microsteps: u16,
    },
    Stop {
        unit: UnitId,
    },
    SetAcceleration {
        unit: UnitId,
        acceleration: u16,
    },
    SetMode {
        unit: UnitId,
        mode: UnitMode,
    },
    GetSystemInfo,
    GetUnitState {
        unit: UnitId,
    },
    GetUnitSettings {
        unit: UnitId,
    },
    GetSystemState,
    GetLastError,
    GetMemoryLength,
    ReadMemory {
        offset: u32,
        length: u32,
    },
    ClearMemory,
    SetDigitalOutput {
        channel: u8,
        status: DigitalIoStatus,
    },
    ReadDigitalOutput,
    ReadDigitalInput,
    ReadAdc {
        channels: AdcChannels,
    },
    SetAdcOsr {
        osr: AdcOsr,
    },
    SetCssEnable {
        channel: CssChannel,
        enabled: bool,
    },
    SetCssThreshold {
        channel: CssChannel,
        low: u16,
        high: u16,
    },
    ConfigAdcTrigger {
        channels: AdcChannels,
    },
    ConfigOutputTrigger {
        channel: u8,
    },
    LinkDigitalIo {
        input: u8,
        output: u8,
    },
    /// Only the wire fields of the arguments are sent, `flip_direction` stays on the host.
    BlindSearch {
        horizontal: BlindSearchArgs,
        vertical: BlindSearchArgs,
    },
    SnakeSearch(SnakeSearchArgs),
    SaveUnitEnv {
        unit: UnitId,
    },
    WriteDfuKey,
    SystemReset,
}

struct PayloadWriter(Vec<u8>);

impl PayloadWriter {
    fn new() -> PayloadWriter {
        PayloadWriter(Vec::new())
    }

    fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    fn u16(mut self, v: u16) -> Self {
        let mut buf = [0; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.0.extend_from_slice(&buf);
        self
    }

    fn u32(mut self, v: u32) -> Self {
        let mut buf = [0; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.0.extend_from_slice(&buf);
        self
    }

    fn i32(mut self, v: i32) -> Self {
        let mut buf = [0; 4];
        LittleEndian::write_i32(&mut buf, v);
        self.0.extend_from_slice(&buf);
        self
    }

    fn finish(self) -> Vec<u8> {
        self.0
    }
}

struct PayloadReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> PayloadReader<'a> {
        PayloadReader { data, offset: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.offset + n > self.data.len() {
            return Err(Error::ProtocolError {
                description: format!(
                    "command payload too short: need {} bytes at offset {}, have {}",
                    n,
                    self.offset,
                    self.data.len()
                ),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    fn unit(&mut self) -> Result<UnitId> {
        Ok(UnitId(self.u8()?))
    }

    fn finish(self) -> Result<()> {
        if self.offset != self.data.len() {
            return Err(Error::ProtocolError {
                description: format!(
                    "command payload has {} trailing bytes",
                    self.data.len() - self.offset
                ),
            });
        }
        Ok(())
    }
}

fn invalid_field(name: &str, value: u8) -> Error {
    Error::ProtocolError {
        description: format!("invalid {} value {}", name, value),
    }
}

fn osr_from_u8(v: u8) -> Result<AdcOsr> {
    Ok(match v {
        0 => AdcOsr::None,
        1 => AdcOsr::X2,
        2 => AdcOsr::X4,
        3 => AdcOsr::X8,
        4 => AdcOsr::X16,
        5 => AdcOsr::X32,
        6 => AdcOsr::X64,
        other => return Err(invalid_field("osr", other)),
    })
}

fn css_from_u8(v: u8) -> Result<CssChannel> {
    match v {
        1 => Ok(CssChannel::Css1),
        2 => Ok(CssChannel::Css2),
        other => Err(invalid_field("css channel", other)),
    }
}

fn io_status_from_u8(v: u8) -> Result<DigitalIoStatus> {
    match v {
        0 => Ok(DigitalIoStatus::Off),
        1 => Ok(DigitalIoStatus::On),
        other => Err(invalid_field("digital io status", other)),
    }
}

fn write_blind_axis(w: PayloadWriter, args: &BlindSearchArgs) -> PayloadWriter {
    w.u8(args.unit.0)
        .u32(args.range)
        .u32(args.gap)
        .u8(args.speed)
        .u16(args.interval)
}

fn read_blind_axis(r: &mut PayloadReader) -> Result<BlindSearchArgs> {
    let unit = r.unit()?;
    let range = r.u32()?;
    let gap = r.u32()?;
    let speed = r.u8()?;
    let interval = r.u16()?;
    Ok(BlindSearchArgs::new(unit, range, gap, speed, interval))
}

impl Command {
    /// The opcode sent for this command.
    pub fn opcode(&self) -> u8 {
        match self {
            Command::CheckMode => M12_CMD_CHECKMODE,
            Command::Home { .. } => M12_CMD_HOME,
            Command::Move { .. } => M12_CMD_MOVE,
            Command::MoveTriggerOutput { .. } => M12_CMD_MOVE_T_OUT,
            Command::MoveTriggerAdc { .. } => M12_CMD_MOVE_T_ADC,
            Command::FastMove { .. } => M12_CMD_FAST_MOVE,
            Command::Stop { .. } => M12_CMD_STOP,
            Command::SetAcceleration { .. } => M12_CMD_SET_ACC,
            Command::SetMode { .. } => M12_CMD_SET_MODE,
            Command::GetSystemInfo => M12_CMD_GET_SYS_INFO,
            Command::GetUnitState { .. } => M12_CMD_GET_MCSU_STA,
            Command::GetUnitSettings { .. } => M12_CMD_GET_MCSU_SETTINGS,
            Command::GetSystemState => M12_CMD_GET_SYS_STA,
            Command::GetLastError => M12_CMD_GET_ERR,
            Command::GetMemoryLength => M12_CMD_GET_MEM_LEN,
            Command::ReadMemory { .. } => M12_CMD_READ_MEM,
            Command::ClearMemory => M12_CMD_CLEAR_MEM,
            Command::SetDigitalOutput { .. } => M12_CMD_SET_DOUT,
            Command::ReadDigitalOutput => M12_CMD_READ_DOUT,
            Command::ReadDigitalInput => M12_CMD_READ_DIN,
            Command::ReadAdc { .. } => M12_CMD_READ_AD,
            Command::SetAdcOsr { .. } => M12_CMD_SET_ADC_OSR,
            Command::SetCssEnable { .. } => M12_CMD_EN_CSS,
            Command::SetCssThreshold { .. } => M12_CMD_SET_CSSTHD,
            Command::ConfigAdcTrigger { .. } => M12_CMD_SET_T_ADC,
            Command::ConfigOutputTrigger { .. } => M12_CMD_SET_T_OUT,
            Command::LinkDigitalIo { .. } => M12_CMD_LINK_DIN_DOUT,
            Command::BlindSearch { .. } => M12_CMD_BLINDSEARCH,
            Command::SnakeSearch(_) => M12_CMD_SNAKESEARCH,
            Command::SaveUnitEnv { .. } => M12_CMD_SAV_MCSU_ENV,
            Command::WriteDfuKey => M12_CMD_SYS_WR_DFUKEY,
            Command::SystemReset => M12_CMD_SYS_RESET,
        }
    }

    /// Serializes the fields of the command, little-endian, in wire order.
    pub fn payload(&self) -> Vec<u8> {
        let w = PayloadWriter::new();
        let w = match self {
            Command::CheckMode
            | Command::GetSystemInfo
            | Command::GetSystemState
            | Command::GetLastError
            | Command::GetMemoryLength
            | Command::ClearMemory
            | Command::ReadDigitalOutput
            | Command::ReadDigitalInput
            | Command::WriteDfuKey
            | Command::SystemReset => w,
            Command::Home {
                unit,
                acceleration,
                low_speed,
                high_speed,
            } => w.u8(unit.0).u16(*acceleration).u8(*low_speed).u8(*high_speed),
            Command::Move { unit, steps, speed } => w.u8(unit.0).i32(*steps).u8(*speed),
            Command::MoveTriggerOutput {
                unit,
                steps,
                speed,
                interval,
            }
            | Command::MoveTriggerAdc {
                unit,
                steps,
                speed,
                interval,
            } => w.u8(unit.0).i32(*steps).u8(*speed).u16(*interval),
            Command::FastMove {
                unit,
                steps,
                speed,
                microsteps,
            } => w.u8(unit.0).i32(*steps).u8(*speed).u16(*microsteps),
            Command::Stop { unit }
            | Command::GetUnitState { unit }
            | Command::GetUnitSettings { unit }
            | Command::SaveUnitEnv { unit } => w.u8(unit.0),
            Command::SetAcceleration { unit, acceleration } => w.u8(unit.0).u16(*acceleration),
            Command::SetMode { unit, mode } => w.u8(unit.0).u8(mode.to_byte()),
            Command::ReadMemory { offset, length } => w.u32(*offset).u32(*length),
            Command::SetDigitalOutput { channel, status } => {
                w.u8(*channel).u8((*status == DigitalIoStatus::On) as u8)
            }
            Command::ReadAdc { channels } | Command::ConfigAdcTrigger { channels } => {
                w.u8(channels.0)
            }
            Command::SetAdcOsr { osr } => w.u8(*osr as u8),
            Command::SetCssEnable { channel, enabled } => w.u8(*channel as u8).u8(*enabled as u8),
            Command::SetCssThreshold { channel, low, high } => {
                w.u8(*channel as u8).u16(*low).u16(*high)
            }
            Command::ConfigOutputTrigger { channel } => w.u8(*channel),
            Command::LinkDigitalIo { input, output } => w.u8(*input).u8(*output),
            Command::BlindSearch {
                horizontal,
                vertical,
            } => write_blind_axis(write_blind_axis(w, horizontal), vertical),
            Command::SnakeSearch(args) => w
                .u8(args.horizontal_unit.0)
                .i32(args.signed_horizontal_range())
                .u8(args.vertical_unit.0)
                .i32(args.signed_vertical_range())
                .u32(args.gap)
                .u16(args.interval)
                .u8(args.speed),
        };
        w.finish()
    }

    /// Builds the data message carrying this command.
    pub fn to_message(&self) -> Message {
        Message::with_data(self.opcode(), &self.payload())
    }

    /// Parses a request message back into a command.
    pub fn from_message(msg: &Message) -> Result<Command> {
        let mut r = PayloadReader::new(&msg.data);
        let cmd = match msg.cmd {
            M12_CMD_CHECKMODE => Command::CheckMode,
            M12_CMD_HOME => Command::Home {
                unit: r.unit()?,
                acceleration: r.u16()?,
                low_speed: r.u8()?,
                high_speed: r.u8()?,
            },
            M12_CMD_MOVE => Command::Move {
                unit: r.unit()?,
                steps: r.i32()?,
                speed: r.u8()?,
            },
            M12_CMD_MOVE_T_OUT => Command::MoveTriggerOutput {
                unit: r.unit()?,
                steps: r.i32()?,
                speed: r.u8()?,
                interval: r.u16()?,
            },
            M12_CMD_MOVE_T_ADC => Command::MoveTriggerAdc {
                unit: r.unit()?,
                steps: r.i32()?,
                speed: r.u8()?,
                interval: r.u16()?,
            },
            M12_CMD_FAST_MOVE => Command::FastMove {
                unit: r.unit()?,
                steps: r.i32()?,
                speed: r.u8()?,
                microsteps: r.u16()?,
            },
            M12_CMD_STOP => Command::Stop { unit: r.unit()? },
            M12_CMD_SET_ACC => Command::SetAcceleration {
                unit: r.unit()?,
                acceleration: r.u16()?,
            },
            M12_CMD_SET_MODE => Command::SetMode {
                unit: r.unit()?,
                mode: UnitMode::from_byte(r.u8()?),
            },
            M12_CMD_GET_SYS_INFO => Command::GetSystemInfo,
            M12_CMD_GET_MCSU_STA => Command::GetUnitState { unit: r.unit()? },
            M12_CMD_GET_MCSU_SETTINGS => Command::GetUnitSettings { unit: r.unit()? },
            M12_CMD_GET_SYS_STA => Command::GetSystemState,
            M12_CMD_GET_ERR => Command::GetLastError,
            M12_CMD_GET_MEM_LEN => Command::GetMemoryLength,
            M12_CMD_READ_MEM => Command::ReadMemory {
                offset: r.u32()?,
                length: r.u32()?,
            },
            M12_CMD_CLEAR_MEM => Command::ClearMemory,
            M12_CMD_SET_DOUT => Command::SetDigitalOutput {
                channel: r.u8()?,
                status: io_status_from_u8(r.u8()?)?,
            },
            M12_CMD_READ_DOUT => Command::ReadDigitalOutput,
            M12_CMD_READ_DIN => Command::ReadDigitalInput,
            M12_CMD_READ_AD => Command::ReadAdc {
                channels: AdcChannels(r.u8()?),
            },
            M12_CMD_SET_ADC_OSR => Command::SetAdcOsr {
                osr: osr_from_u8(r.u8()?)?,
            },
            M12_CMD_EN_CSS => Command::SetCssEnable {
                channel: css_from_u8(r.u8()?)?,
                enabled: r.u8()? != 0,
            },
            M12_CMD_SET_CSSTHD => Command::SetCssThreshold {
                channel: css_from_u8(r.u8()?)?,
                low: r.u16()?,
                high: r.u16()?,
            },
            M12_CMD_SET_T_ADC => Command::ConfigAdcTrigger {
                channels: AdcChannels(r.u8()?),
            },
            M12_CMD_SET_T_OUT => Command::ConfigOutputTrigger { channel: r.u8()? },
            M12_CMD_LINK_DIN_DOUT => Command::LinkDigitalIo {
                input: r.u8()?,
                output: r.u8()?,
            },
            M12_CMD_BLINDSEARCH => Command::BlindSearch {
                horizontal: read_blind_axis(&mut r)?,
                vertical: read_blind_axis(&mut r)?,
            },
            M12_CMD_SNAKESEARCH => {
                let horizontal_unit = r.unit()?;
                let horizontal_range = r.i32()?;
                let vertical_unit = r.unit()?;
                let vertical_range = r.i32()?;
                // centering is done by the host and never reaches the wire
                Command::SnakeSearch(SnakeSearchArgs {
                    horizontal_unit,
                    horizontal_range: horizontal_range.wrapping_abs(),
                    vertical_unit,
                    vertical_range: vertical_range.wrapping_abs(),
                    gap: r.u32()?,
                    interval: r.u16()?,
                    speed: r.u8()?,
                    start_from_center: false,
                    flip_horizontal: horizontal_range < 0,
                    flip_vertical: vertical_range < 0,
                })
            }
            M12_CMD_SAV_MCSU_ENV => Command::SaveUnitEnv { unit: r.unit()? },
            M12_CMD_SYS_WR_DFUKEY => Command::WriteDfuKey,
            M12_CMD_SYS_RESET => Command::SystemReset,
            other => {
                return Err(Error::ProtocolError {
                    description: format!("unknown opcode {:02X}", other),
                })
            }
        };
        r.finish()?;
        Ok(cmd)
    }
}
