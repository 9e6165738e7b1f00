//! # M12 Driver
//!
//! `m12` is a host driver for the M12 multi-axis stepper motor controller.
//! It frames commands with the controller's CRC32 protected protocol, decodes
//! unit and system states, waits for long running motions by polling, reads
//! back the ADC capture memory and rebuilds the intensity curves of the
//! fast-1D, blind search and snake search scans.

extern crate byteorder;
extern crate crc32fast;
extern crate log;
extern crate serialport;

mod answers;
pub mod base;
mod checksum;
mod cmds;
mod internals;
pub mod parsers;
mod protocol;
#[cfg(test)]
mod testing;
pub mod types;
pub mod utils;

pub use crate::answers::{
    DigitalPorts, FirmwareVersion, MemoryBlock, SystemInformation, SystemLastError, SystemState,
    UnitMode, UnitSettings, UnitState,
};
pub use crate::base::{CancellationToken, Channel, Error, Message, Result, Transport};
pub use crate::cmds::Command;
pub use crate::internals::{ADC_VREF_MV, MAX_ACC_STEPS};
pub use crate::protocol::{encode_frame, FrameDecoder, FrameEncoder};

use crate::answers::*;
use crate::internals::*;
use crate::parsers::blind_search_parser::parse_blind_search;
use crate::parsers::fast1d_parser::parse_fast1d;
use crate::parsers::snake_search_parser::parse_snake_search;
use crate::parsers::{require_gap_covers_interval, require_single_channel};
use crate::types::*;
use crate::utils::{adc_raws_to_mv, clamp_speed};
use log::{error, trace, warn};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

type UnitStateSubscriber = Arc<dyn Fn(&UnitState) + Send + Sync>;

/// Represents a connection to and control interface for an M12 controller.
///
/// Every method takes `&self`: one request/response exchange runs under an
/// internal lock, so a device shared between threads never interleaves two
/// frames on the wire. Waits release the lock between polls.
pub struct M12Device<T: ?Sized> {
    options: DeviceOptions,
    subscribers: Mutex<Vec<UnitStateSubscriber>>,
    channel: Mutex<Channel<T>>,
}

impl<T: ?Sized> fmt::Debug for M12Device<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("M12Device")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl M12Device<dyn SerialPort> {
    /// Opens the controller on a serial port, 8 data bits, no parity, 1 stop bit.
    ///
    /// # Example
    /// ```ignore
    /// let device = m12::M12Device::open("/dev/ttyUSB0", 115200)?;
    /// let info = device.get_system_info()?;
    /// ```
    pub fn open(port: &str, baud_rate: u32) -> Result<M12Device<dyn SerialPort>> {
        trace!("Opening serial port {} at {} baud", port, baud_rate);
        let serial = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(Duration::from_millis(1))
            .open()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", port, e);
                e
            })?;
        Ok(M12Device::with_stream(serial))
    }
}

impl<T: ?Sized> M12Device<T>
where
    T: Transport,
{
    /// Constructs a new `M12Device` using an existing `Channel`.
    pub fn new(channel: Channel<T>, options: DeviceOptions) -> M12Device<T> {
        trace!("Creating new M12Device with options {:?}", options);
        M12Device {
            options,
            subscribers: Mutex::new(Vec::new()),
            channel: Mutex::new(channel),
        }
    }

    /// Constructs a new `M12Device` directly from a transport with default options.
    pub fn with_stream(stream: Box<T>) -> M12Device<T> {
        M12Device::new(Channel::new(stream), DeviceOptions::default())
    }

    /// Constructs a new `M12Device` from a transport with custom timeouts.
    pub fn with_options(stream: Box<T>, options: DeviceOptions) -> M12Device<T> {
        M12Device::new(Channel::new(stream), options)
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    /// Releases the transport. The device cannot be used afterwards.
    pub fn close(self) {
        trace!("Closing M12Device");
        drop(self);
    }

    /// Registers a callback invoked with every unit state polled by a wait.
    ///
    /// Callbacks run on the polling thread; a slow callback delays the next poll.
    /// They may use the device themselves, including registering more callbacks.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&UnitState) + Send + Sync + 'static,
    {
        self.lock_subscribers().push(Arc::new(callback));
    }

    fn lock_channel(&self) -> MutexGuard<'_, Channel<T>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<UnitStateSubscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &UnitState) {
        // callbacks run without the lock held
        let subscribers = self.lock_subscribers().clone();
        for subscriber in subscribers.iter() {
            subscriber(state);
        }
    }

    /// Sends a command and waits for its response frame.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The command to send.
    /// * `timeout` - The maximum duration to wait for the response.
    /// * `cancel` - Optional token that aborts the wait with `Error::OperationCancelled`.
    pub fn execute(
        &self,
        cmd: &Command,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Message> {
        trace!("Executing {:?}", cmd);
        let resp = self.lock_channel().invoke(&cmd.to_message(), timeout, cancel)?;
        if resp.cmd != cmd.opcode() {
            error!(
                "Unexpected response type: expected {:02X}, got {:02X}",
                cmd.opcode(),
                resp.cmd
            );
            return Err(Error::ProtocolError {
                description: format!(
                    "unexpected response type: expected {:02X}, got {:02X}",
                    cmd.opcode(),
                    resp.cmd
                ),
            });
        }
        Ok(resp)
    }

    /// Sends a command the controller does not answer.
    pub fn send_command(&self, cmd: &Command) -> Result<()> {
        trace!("Sending {:?}", cmd);
        self.lock_channel().write(&cmd.to_message())?;
        Ok(())
    }

    fn query(&self, cmd: &Command) -> Result<Message> {
        self.execute(cmd, self.options.read_timeout, None)
    }

    /// Asks whether the controller runs its application or the DFU loader.
    pub fn check_mode(&self) -> Result<DeviceMode> {
        let resp = self.query(&Command::CheckMode)?;
        let mode = decode_device_mode(&resp.data)?;
        trace!("Device mode: {:?}", mode);
        Ok(mode)
    }

    /// Gets the firmware versions and the number of units.
    pub fn get_system_info(&self) -> Result<SystemInformation> {
        let resp = self.query(&Command::GetSystemInfo)?;
        let info = SystemInformation::from_bytes(&resp.data)?;
        trace!(
            "System info: {} units, firmware {}",
            info.max_unit,
            info.firmware_version
        );
        Ok(info)
    }

    /// Gets the system busy flag and error.
    pub fn get_system_state(&self) -> Result<SystemState> {
        let resp = self.query(&Command::GetSystemState)?;
        SystemState::from_bytes(&resp.data)
    }

    /// Gets the last error recorded by the controller.
    pub fn get_last_error(&self) -> Result<SystemLastError> {
        let resp = self.query(&Command::GetLastError)?;
        SystemLastError::from_bytes(&resp.data)
    }

    /// Gets the state of a unit.
    pub fn get_unit_state(&self, unit: UnitId) -> Result<UnitState> {
        self.get_unit_state_with_timeout(unit, self.options.read_timeout)
    }

    /// Gets the state of a unit with a specified timeout.
    pub fn get_unit_state_with_timeout(
        &self,
        unit: UnitId,
        timeout: Duration,
    ) -> Result<UnitState> {
        let resp = self.execute(&Command::GetUnitState { unit }, timeout, None)?;
        let state = UnitState::from_bytes(&resp.data)?;
        trace!("State of {}: {:?}", unit, state);
        Ok(state)
    }

    /// Gets the mode and acceleration of a unit.
    pub fn get_unit_settings(&self, unit: UnitId) -> Result<UnitSettings> {
        let resp = self.query(&Command::GetUnitSettings { unit })?;
        UnitSettings::from_bytes(&resp.data)
    }

    /// Sets the acceleration of a unit.
    ///
    /// Values above `MAX_ACC_STEPS` are rejected before anything is sent.
    pub fn set_acceleration_steps(&self, unit: UnitId, acceleration: u16) -> Result<()> {
        if acceleration > MAX_ACC_STEPS {
            error!(
                "Acceleration {} of {} exceeds {}",
                acceleration, unit, MAX_ACC_STEPS
            );
            return Err(Error::InvalidArgument {
                description: format!(
                    "acceleration {} exceeds the maximum of {}",
                    acceleration, MAX_ACC_STEPS
                ),
            });
        }
        self.send_command(&Command::SetAcceleration { unit, acceleration })
    }

    /// Writes the mode byte of a unit.
    pub fn change_unit_mode(&self, unit: UnitId, mode: UnitMode) -> Result<()> {
        trace!("Changing mode of {} to {:02X}", unit, mode.to_byte());
        self.send_command(&Command::SetMode { unit, mode })
    }

    /// Saves the settings of a unit to flash.
    pub fn save_unit_env(&self, unit: UnitId) -> Result<()> {
        self.send_command(&Command::SaveUnitEnv { unit })?;
        thread::sleep(M12_COMMIT_DELAY);
        Ok(())
    }

    pub fn set_css_enable(&self, channel: CssChannel, enabled: bool) -> Result<()> {
        self.send_command(&Command::SetCssEnable { channel, enabled })
    }

    pub fn set_css_threshold(&self, channel: CssChannel, low: u16, high: u16) -> Result<()> {
        self.send_command(&Command::SetCssThreshold { channel, low, high })
    }

    fn check_digital_channel(channel: u8) -> Result<()> {
        if !(1..=8).contains(&channel) {
            return Err(Error::InvalidArgument {
                description: format!("digital channel {} is not in 1..=8", channel),
            });
        }
        Ok(())
    }

    /// Sets one digital output, channels are numbered 1 to 8.
    pub fn set_digital_output(&self, channel: u8, status: DigitalIoStatus) -> Result<()> {
        Self::check_digital_channel(channel)?;
        self.send_command(&Command::SetDigitalOutput { channel, status })
    }

    /// Reads back all eight digital outputs.
    pub fn read_digital_outputs(&self) -> Result<DigitalPorts> {
        let resp = self.query(&Command::ReadDigitalOutput)?;
        DigitalPorts::from_bytes(&resp.data)
    }

    /// Reads back one digital output.
    pub fn read_digital_output(&self, channel: u8) -> Result<DigitalIoStatus> {
        Self::check_digital_channel(channel)?;
        let ports = self.read_digital_outputs()?;
        Ok(ports.channel(channel).unwrap_or(DigitalIoStatus::Off))
    }

    /// Reads all eight digital inputs.
    pub fn read_digital_inputs(&self) -> Result<DigitalPorts> {
        let resp = self.query(&Command::ReadDigitalInput)?;
        DigitalPorts::from_bytes(&resp.data)
    }

    /// Reads the selected ADC channels, in mV and ascending channel order.
    pub fn read_adc(&self, channels: AdcChannels) -> Result<Vec<f64>> {
        if channels.is_empty() {
            return Err(Error::InvalidArgument {
                description: "no ADC channel selected".to_owned(),
            });
        }
        let resp = self.query(&Command::ReadAdc { channels })?;
        let raws = decode_adc_values(channels, &resp.data)?;
        Ok(adc_raws_to_mv(&raws))
    }

    /// Sets the oversampling ratio of the ADC.
    pub fn set_adc_osr(&self, osr: AdcOsr) -> Result<()> {
        self.send_command(&Command::SetAdcOsr { osr })?;
        thread::sleep(M12_COMMIT_DELAY);
        Ok(())
    }

    /// Selects the ADC channels captured by `move_trigger_adc`.
    pub fn config_adc_trigger(&self, channels: AdcChannels) -> Result<()> {
        self.send_command(&Command::ConfigAdcTrigger { channels })
    }

    /// Selects the digital output toggled by `move_trigger_output`.
    pub fn config_output_trigger(&self, channel: u8) -> Result<()> {
        Self::check_digital_channel(channel)?;
        self.send_command(&Command::ConfigOutputTrigger { channel })
    }

    /// Mirrors a digital input onto a digital output.
    pub fn link_digital_io(&self, input: u8, output: u8) -> Result<()> {
        Self::check_digital_channel(input)?;
        Self::check_digital_channel(output)?;
        self.send_command(&Command::LinkDigitalIo { input, output })
    }

    /// Stops a unit immediately.
    pub fn stop(&self, unit: UnitId) -> Result<()> {
        trace!("Stopping {}", unit);
        self.send_command(&Command::Stop { unit })
    }

    fn run_motion(&self, unit: UnitId, cmd: Command, loop_interval: Duration) -> Result<()> {
        self.send_command(&cmd)?;
        let err = self.wait_by_unit_state(unit, loop_interval, self.options.wait_busy_timeout)?;
        if err.is_error() {
            error!("{} finished its motion with: {}", unit, err);
            return Err(Error::UnitError { unit, error: err });
        }
        Ok(())
    }

    /// Homes a unit and waits until it stands still.
    ///
    /// Speeds are clamped to 1..=100.
    pub fn home(
        &self,
        unit: UnitId,
        low_speed: u8,
        high_speed: u8,
        acceleration: u16,
    ) -> Result<()> {
        let cmd = Command::Home {
            unit,
            acceleration,
            low_speed: clamp_speed(low_speed),
            high_speed: clamp_speed(high_speed),
        };
        self.run_motion(unit, cmd, M12_HOME_LOOP_INTERVAL)
    }

    /// Moves a unit by `steps` and waits until it stands still.
    pub fn move_unit(&self, unit: UnitId, steps: i32, speed: u8) -> Result<()> {
        let cmd = Command::Move {
            unit,
            steps,
            speed: clamp_speed(speed),
        };
        self.run_motion(unit, cmd, M12_MOVE_LOOP_INTERVAL)
    }

    /// Moves a unit with a custom microstep setting and waits until it stands still.
    pub fn fast_move(
        &self,
        unit: UnitId,
        steps: i32,
        speed: u8,
        microsteps: u16,
    ) -> Result<()> {
        let cmd = Command::FastMove {
            unit,
            steps,
            speed: clamp_speed(speed),
            microsteps,
        };
        self.run_motion(unit, cmd, M12_MOVE_LOOP_INTERVAL)
    }

    /// Moves a unit and captures the trigger ADC channels every `interval` steps.
    pub fn move_trigger_adc(
        &self,
        unit: UnitId,
        steps: i32,
        speed: u8,
        interval: u16,
    ) -> Result<()> {
        let cmd = Command::MoveTriggerAdc {
            unit,
            steps,
            speed: clamp_speed(speed),
            interval,
        };
        self.run_motion(unit, cmd, self.options.loop_interval)
    }

    /// Moves a unit and toggles the trigger output every `interval` steps.
    pub fn move_trigger_output(
        &self,
        unit: UnitId,
        steps: i32,
        speed: u8,
        interval: u16,
    ) -> Result<()> {
        let cmd = Command::MoveTriggerOutput {
            unit,
            steps,
            speed: clamp_speed(speed),
            interval,
        };
        self.run_motion(unit, cmd, self.options.loop_interval)
    }

    /// Writes the DFU key and resets, the controller restarts in its loader.
    pub fn enter_dfu_mode(&self) -> Result<()> {
        warn!("Switching controller to DFU mode");
        self.send_command(&Command::WriteDfuKey)?;
        thread::sleep(M12_COMMIT_DELAY);
        self.system_reset()
    }

    pub fn system_reset(&self) -> Result<()> {
        warn!("Resetting controller");
        self.send_command(&Command::SystemReset)
    }

    /// Polls a unit until it is no longer busy and returns its error code.
    ///
    /// Every polled state is published to the subscribers. The timeout counts
    /// from the last change of the absolute position; a unit that stays busy
    /// without moving for longer than `timeout` is stopped and
    /// `Error::MotionTimeout` is returned.
    pub fn wait_by_unit_state(
        &self,
        unit: UnitId,
        loop_interval: Duration,
        timeout: Duration,
    ) -> Result<ErrorCode> {
        trace!(
            "Waiting for {} (interval {:?}, timeout {:?})",
            unit,
            loop_interval,
            timeout
        );
        thread::sleep(M12_SETTLE_DELAY);

        let mut last_position: Option<i32> = None;
        let mut last_movement = Instant::now();

        loop {
            let state = self.get_unit_state(unit)?;

            if last_position != Some(state.abs_position) {
                last_position = Some(state.abs_position);
                last_movement = Instant::now();
            }

            self.publish(&state);

            if !state.is_busy {
                trace!("{} is idle, error {}", unit, state.error);
                return Ok(state.error);
            }

            if last_movement.elapsed() > timeout {
                warn!(
                    "{} busy at position {} for {:?}, stopping it",
                    unit,
                    state.abs_position,
                    last_movement.elapsed()
                );
                if let Err(e) = self.stop(unit) {
                    error!("Failed to stop {} after timeout: {}", unit, e);
                }
                return Err(Error::MotionTimeout { unit });
            }

            thread::sleep(loop_interval);
        }
    }

    /// Polls the system until it is no longer busy and returns the last error.
    ///
    /// After each poll the units in `refresh_units` are queried and published.
    /// On timeout no error is raised; the result names `UnitId::INVALID` with
    /// `ErrorCode::Timeout` instead.
    pub fn wait_by_system_state(
        &self,
        loop_interval: Duration,
        timeout: Duration,
        refresh_units: &[UnitId],
    ) -> Result<SystemLastError> {
        trace!(
            "Waiting for system (interval {:?}, timeout {:?}, refreshing {:?})",
            loop_interval,
            timeout,
            refresh_units
        );
        thread::sleep(M12_SETTLE_DELAY);
        let start = Instant::now();

        loop {
            let state = self.get_system_state()?;
            if !state.is_busy {
                break;
            }

            if start.elapsed() > timeout {
                warn!("System still busy after {:?}", start.elapsed());
                return Ok(SystemLastError {
                    unit: UnitId::INVALID,
                    error: ErrorCode::Timeout,
                });
            }

            thread::sleep(loop_interval);

            for unit in refresh_units {
                let unit_state = self.get_unit_state(*unit)?;
                self.publish(&unit_state);
                thread::sleep(M12_REFRESH_UNIT_DELAY);
            }
        }

        let last = self.get_last_error()?;
        trace!("System idle, last error {:?}", last);
        Ok(last)
    }

    /// Gets the number of samples in the capture memory.
    pub fn get_memory_length(&self) -> Result<u32> {
        let resp = self.query(&Command::GetMemoryLength)?;
        decode_memory_length(&resp.data)
    }

    /// Reads `length` samples starting at `offset`, in mV.
    pub fn read_memory(&self, offset: u32, length: u32) -> Result<Vec<f64>> {
        let resp = self.query(&Command::ReadMemory { offset, length })?;
        let block = MemoryBlock::from_bytes(&resp.data)?;
        if block.values.len() != length as usize {
            return Err(Error::ProtocolError {
                description: format!(
                    "memory block {} holds {} samples, requested {}",
                    block.sequence,
                    block.values.len(),
                    length
                ),
            });
        }
        Ok(adc_raws_to_mv(&block.values))
    }

    fn read_memory_with_retry(&self, offset: u32, length: u32) -> Result<Vec<f64>> {
        let mut attempt = 0;
        loop {
            match self.read_memory(offset, length) {
                Ok(values) => return Ok(values),
                Err(e) if e.is_transient() && attempt < M12_MEMORY_READ_RETRIES => {
                    attempt += 1;
                    warn!(
                        "Reading memory at {} failed ({}), retry {} of {}",
                        offset, e, attempt, M12_MEMORY_READ_RETRIES
                    );
                    thread::sleep(M12_MEMORY_RETRY_BACKOFF);
                }
                Err(e) => {
                    error!("Reading memory at {} failed: {}", offset, e);
                    return Err(e);
                }
            }
        }
    }

    /// Reads the whole capture memory in blocks of `M12_MEMORY_BLOCK_LEN` samples.
    ///
    /// Each block is retried on transport errors. `progress` is called after
    /// every block.
    pub fn read_memory_all(
        &self,
        mut progress: Option<&mut dyn FnMut(MemoryReadProgress)>,
    ) -> Result<Vec<f64>> {
        let total = self.get_memory_length()?;
        trace!("Reading {} samples from memory", total);
        let mut values = Vec::with_capacity(total.min(M12_MEMORY_PREALLOC_LEN) as usize);
        let mut offset = 0;

        while offset < total {
            let length = M12_MEMORY_BLOCK_LEN.min(total - offset);
            let block = self.read_memory_with_retry(offset, length)?;
            values.extend_from_slice(&block);
            offset += length;

            if let Some(report) = progress.as_mut() {
                report(MemoryReadProgress {
                    read: offset as usize,
                    total: total as usize,
                });
            }
        }

        Ok(values)
    }

    /// Empties the capture memory.
    pub fn clear_memory(&self) -> Result<()> {
        self.send_command(&Command::ClearMemory)
    }

    /// Runs a fast one dimensional scan and returns the intensity curves.
    ///
    /// The second curve is present when `args.second_channel` selects a channel.
    pub fn start_fast1d(
        &self,
        args: &Fast1dArgs,
    ) -> Result<(Vec<Point2D>, Option<Vec<Point2D>>)> {
        require_single_channel(args.channel, "the fast-1D capture")?;
        if args.second_channel.count() > 1 {
            return Err(Error::InvalidArgument {
                description: "at most one secondary ADC channel is allowed".to_owned(),
            });
        }
        if !args.second_channel.is_empty() && args.channel.contains(args.second_channel) {
            return Err(Error::InvalidArgument {
                description: "the secondary ADC channel repeats the primary one".to_owned(),
            });
        }
        if args.interval == 0 {
            return Err(Error::InvalidArgument {
                description: "fast-1D interval must not be zero".to_owned(),
            });
        }

        trace!("Starting fast-1D scan: {:?}", args);
        self.config_adc_trigger(args.channel | args.second_channel)?;
        self.clear_memory()?;
        self.move_trigger_adc(args.unit, args.range, args.speed, args.interval)?;

        let samples = self.read_memory_all(None)?;
        parse_fast1d(
            &samples,
            args.range,
            args.interval,
            !args.second_channel.is_empty(),
        )
    }

    /// Runs a blind search and returns the intensity map.
    ///
    /// `progress` reports the scan stage once at start and the transmit stage
    /// while the samples are read back.
    pub fn start_blind_search(
        &self,
        horizontal: &BlindSearchArgs,
        vertical: &BlindSearchArgs,
        channel: AdcChannels,
        mut progress: Option<&mut dyn FnMut(BlindSearchProgress)>,
    ) -> Result<Vec<Point3D>> {
        require_single_channel(channel, "the blind search")?;
        require_gap_covers_interval(horizontal.gap, horizontal.interval, "horizontal")?;
        require_gap_covers_interval(vertical.gap, vertical.interval, "vertical")?;

        trace!("Starting blind search: {:?} / {:?}", horizontal, vertical);
        self.config_adc_trigger(channel)?;

        if let Some(report) = progress.as_mut() {
            report(BlindSearchProgress {
                stage: BlindSearchStage::Scan,
                progress: 0.0,
            });
        }

        self.send_command(&Command::BlindSearch {
            horizontal: horizontal.clone(),
            vertical: vertical.clone(),
        })?;

        let last = self.wait_by_system_state(
            self.options.alignment_loop_interval,
            self.options.wait_alignment_timeout,
            &[horizontal.unit, vertical.unit],
        )?;
        if last.error.is_error() {
            error!("Blind search failed: {:?}", last);
            return Err(Error::SystemError(last));
        }

        let mut transmit = |p: MemoryReadProgress| {
            if let Some(report) = progress.as_mut() {
                report(BlindSearchProgress {
                    stage: BlindSearchStage::Transmit,
                    progress: p.complete(),
                });
            }
        };
        let samples = self.read_memory_all(Some(&mut transmit))?;
        parse_blind_search(&samples, horizontal, vertical)
    }

    /// Runs a snake search and returns the intensity map.
    ///
    /// With `start_from_center` both axes first move back by half their range;
    /// they are left where the scan ends. Positions of the returned points are
    /// relative to where the axes stood before the call.
    pub fn start_snake_search(
        &self,
        args: &SnakeSearchArgs,
        channel: AdcChannels,
    ) -> Result<Vec<Point3D>> {
        require_single_channel(channel, "the snake search")?;
        require_gap_covers_interval(args.gap, args.interval, "vertical")?;
        if args.horizontal_range < 0 || args.vertical_range < 0 {
            return Err(Error::InvalidArgument {
                description: "snake search ranges must not be negative".to_owned(),
            });
        }

        trace!("Starting snake search: {:?}", args);
        self.config_adc_trigger(channel)?;

        if args.start_from_center {
            trace!("Moving to the corner of the scan area");
            self.move_unit(
                args.horizontal_unit,
                -args.signed_horizontal_range() / 2,
                args.speed,
            )?;
            self.move_unit(
                args.vertical_unit,
                -args.signed_vertical_range() / 2,
                args.speed,
            )?;
        }

        self.send_command(&Command::SnakeSearch(args.clone()))?;

        let last = self.wait_by_system_state(
            self.options.alignment_loop_interval,
            self.options.wait_alignment_timeout,
            &[args.horizontal_unit, args.vertical_unit],
        )?;
        if last.error.is_error() {
            error!("Snake search failed: {:?}", last);
            return Err(Error::SystemError(last));
        }

        let samples = self.read_memory_all(None)?;
        parse_snake_search(&samples, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockDevice, Reply};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_options() -> DeviceOptions {
        DeviceOptions {
            read_timeout: Duration::from_millis(200),
            wait_busy_timeout: Duration::from_millis(150),
            wait_alignment_timeout: Duration::from_millis(150),
            loop_interval: Duration::from_millis(5),
            alignment_loop_interval: Duration::from_millis(5),
        }
    }

    fn unit_state(unit: UnitId, busy: bool, position: i32) -> Vec<u8> {
        UnitState {
            unit,
            is_initialized: true,
            is_homed: true,
            is_busy: busy,
            error: ErrorCode::None,
            abs_position: position,
        }
        .to_bytes()
        .to_vec()
    }

    fn memory_reply(offset: u32, length: u32) -> Vec<u8> {
        MemoryBlock {
            sequence: (offset / M12_MEMORY_BLOCK_LEN) as u16,
            values: (offset..offset + length).map(|v| v as i16).collect(),
        }
        .to_bytes()
    }

    #[test]
    fn unit_wait_detects_stall_and_stops() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetUnitState { unit } => Reply::Payload(unit_state(*unit, true, 1000)),
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let polled = Arc::new(AtomicUsize::new(0));
        let counter = polled.clone();
        device.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let start = Instant::now();
        let result = device.wait_by_unit_state(
            UnitId(3),
            Duration::from_millis(5),
            Duration::from_millis(100),
        );
        match result {
            Err(Error::MotionTimeout { unit }) => assert_eq!(unit, UnitId(3)),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(100));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.last(), Some(&Command::Stop { unit: UnitId(3) }));
        assert_eq!(polled.load(Ordering::SeqCst), requests.len() - 1);
    }

    #[test]
    fn unit_wait_keeps_waiting_while_moving() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let (stream, requests) = MockDevice::new(move |cmd| match cmd {
            Command::GetUnitState { unit } => {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                // moves for longer than the timeout, then settles
                Reply::Payload(unit_state(*unit, n < 40, n as i32 * 10))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let start = Instant::now();
        let err = device
            .wait_by_unit_state(UnitId(1), Duration::from_millis(5), Duration::from_millis(50))
            .unwrap();
        assert_eq!(err, ErrorCode::None);
        assert!(start.elapsed() > Duration::from_millis(50));
        assert_eq!(polls.load(Ordering::SeqCst), 41);
        assert!(!requests
            .lock()
            .unwrap()
            .iter()
            .any(|c| matches!(c, Command::Stop { .. })));
    }

    #[test]
    fn motion_reports_unit_error() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetUnitState { unit } => {
                let mut state = UnitState::from_bytes(&unit_state(*unit, false, 0)).unwrap();
                state.error = ErrorCode::LimitSensorHit;
                Reply::Payload(state.to_bytes().to_vec())
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        match device.move_unit(UnitId(2), 500, 0) {
            Err(Error::UnitError { unit, error }) => {
                assert_eq!(unit, UnitId(2));
                assert_eq!(error, ErrorCode::LimitSensorHit);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(
            requests.lock().unwrap()[0],
            Command::Move {
                unit: UnitId(2),
                steps: 500,
                speed: 1
            }
        );
    }

    #[test]
    fn system_wait_times_out_without_error() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetSystemState => Reply::Payload(vec![0x01, 0]),
            Command::GetUnitState { unit } => Reply::Payload(unit_state(*unit, true, 7)),
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let refreshed = Arc::new(AtomicUsize::new(0));
        let counter = refreshed.clone();
        device.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let last = device
            .wait_by_system_state(
                Duration::from_millis(5),
                Duration::from_millis(60),
                &[UnitId(1), UnitId(2)],
            )
            .unwrap();
        assert_eq!(last.unit, UnitId::INVALID);
        assert_eq!(last.error, ErrorCode::Timeout);
        assert!(refreshed.load(Ordering::SeqCst) >= 2);
        assert!(!requests.lock().unwrap().contains(&Command::GetLastError));
    }

    #[test]
    fn system_wait_returns_last_error() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = polls.clone();
        let (stream, _) = MockDevice::new(move |cmd| match cmd {
            Command::GetSystemState => {
                let busy = counter.fetch_add(1, Ordering::SeqCst) < 2;
                Reply::Payload(vec![busy as u8, 0])
            }
            Command::GetLastError => Reply::Payload(vec![4, 6]),
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let last = device
            .wait_by_system_state(Duration::from_millis(5), Duration::from_secs(5), &[])
            .unwrap();
        assert_eq!(last.unit, UnitId(4));
        assert_eq!(last.error, ErrorCode::LimitSensorHit);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn memory_is_read_in_blocks() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetMemoryLength => Reply::Payload(300u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Payload(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let mut reports = Vec::new();
        let mut progress = |p: MemoryReadProgress| reports.push(p);
        let values = device.read_memory_all(Some(&mut progress)).unwrap();

        assert_eq!(values.len(), 300);
        assert_eq!(values[299], utils::adc_raw_to_mv(299));

        let reads: Vec<_> = requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Command::ReadMemory { offset, length } => Some((*offset, *length)),
                _ => None,
            })
            .collect();
        assert_eq!(reads, vec![(0, 128), (128, 128), (256, 44)]);

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].read, 300);
        assert_eq!(reports[2].complete(), 1.0);
    }

    #[test]
    fn memory_block_is_retried_after_corruption() {
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = failures.clone();
        let (stream, requests) = MockDevice::new(move |cmd| match cmd {
            Command::GetMemoryLength => Reply::Payload(200u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                if *offset == 128 && counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Reply::Corrupt(memory_reply(*offset, *length))
                } else {
                    Reply::Payload(memory_reply(*offset, *length))
                }
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let values = device.read_memory_all(None).unwrap();
        assert_eq!(values.len(), 200);
        assert_eq!(values[128], utils::adc_raw_to_mv(128));

        let reads = requests
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Command::ReadMemory { offset: 128, .. }))
            .count();
        assert_eq!(reads, 3);
    }

    #[test]
    fn memory_read_gives_up_after_retries() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetMemoryLength => Reply::Payload(10u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Corrupt(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        match device.read_memory_all(None) {
            Err(Error::ChecksumMismatch { .. }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        let reads = requests
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Command::ReadMemory { .. }))
            .count();
        assert_eq!(reads, 1 + M12_MEMORY_READ_RETRIES);
    }

    #[test]
    fn read_times_out_and_cancels() {
        let (stream, _) = MockDevice::new(|_| Reply::Silent);
        let device = M12Device::with_options(stream, fast_options());

        match device.get_system_state() {
            Err(Error::OperationTimeout) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        let token = CancellationToken::new();
        token.cancel();
        match device.execute(&Command::GetSystemState, Duration::from_secs(5), Some(&token)) {
            Err(Error::OperationCancelled) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn validation_happens_before_io() {
        let (stream, requests) = MockDevice::new(|_| Reply::Silent);
        let device = M12Device::with_options(stream, fast_options());

        assert!(matches!(
            device.set_acceleration_steps(UnitId(1), MAX_ACC_STEPS + 1),
            Err(Error::InvalidArgument { .. })
        ));

        let h = BlindSearchArgs::new(UnitId(1), 100, 10, 50, 20);
        let v = BlindSearchArgs::new(UnitId(2), 100, 20, 50, 20);
        assert!(matches!(
            device.start_blind_search(&h, &v, AdcChannels::CH1, None),
            Err(Error::InvalidArgument { .. })
        ));

        let v = BlindSearchArgs::new(UnitId(2), 100, 20, 50, 20);
        let h = BlindSearchArgs::new(UnitId(1), 100, 20, 50, 20);
        assert!(matches!(
            device.start_blind_search(&h, &v, AdcChannels::CH1 | AdcChannels::CH2, None),
            Err(Error::InvalidArgument { .. })
        ));

        assert!(requests.lock().unwrap().is_empty());
    }

    #[test]
    fn fast1d_scan_end_to_end() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetUnitState { unit } => Reply::Payload(unit_state(*unit, false, 100)),
            Command::GetMemoryLength => Reply::Payload(5u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Payload(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let args = Fast1dArgs {
            unit: UnitId(1),
            range: 100,
            interval: 20,
            speed: 50,
            channel: AdcChannels::CH1,
            second_channel: AdcChannels::NONE,
        };
        let (points, second) = device.start_fast1d(&args).unwrap();
        assert!(second.is_none());
        assert_eq!(points.len(), 5);
        assert_eq!(points[4].x, 80.0);
        assert_eq!(points[4].y, utils::adc_raw_to_mv(4));

        let requests = requests.lock().unwrap();
        assert_eq!(
            requests[0],
            Command::ConfigAdcTrigger {
                channels: AdcChannels::CH1
            }
        );
        assert_eq!(requests[1], Command::ClearMemory);
        assert_eq!(
            requests[2],
            Command::MoveTriggerAdc {
                unit: UnitId(1),
                steps: 100,
                speed: 50,
                interval: 20
            }
        );
    }

    #[test]
    fn blind_search_end_to_end() {
        let (stream, _) = MockDevice::new(|cmd| match cmd {
            Command::GetSystemState => Reply::Payload(vec![0, 0]),
            Command::GetLastError => Reply::Payload(vec![0, 0]),
            Command::GetMemoryLength => Reply::Payload(6u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Payload(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let h = BlindSearchArgs::new(UnitId(1), 40, 20, 50, 20);
        let v = BlindSearchArgs::new(UnitId(2), 40, 20, 50, 20);
        let mut stages = Vec::new();
        let mut progress = |p: BlindSearchProgress| stages.push(p);
        let points = device
            .start_blind_search(&h, &v, AdcChannels::CH2, Some(&mut progress))
            .unwrap();

        assert_eq!(points.len(), 6);
        assert_eq!((points[4].x, points[4].y), (-20.0, 20.0));
        assert_eq!(stages[0].stage, BlindSearchStage::Scan);
        assert_eq!(stages.last().map(|p| p.stage), Some(BlindSearchStage::Transmit));
        assert_eq!(stages.last().map(|p| p.progress), Some(1.0));
    }

    #[test]
    fn snake_search_reports_system_error() {
        let (stream, _) = MockDevice::new(|cmd| match cmd {
            Command::GetSystemState => Reply::Payload(vec![0, 0]),
            Command::GetLastError => Reply::Payload(vec![2, 8]),
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let args = SnakeSearchArgs::new(UnitId(1), 40, UnitId(2), 20, 10, 10, 30);
        match device.start_snake_search(&args, AdcChannels::CH1) {
            Err(Error::SystemError(last)) => {
                assert_eq!(last.unit, UnitId(2));
                assert_eq!(last.error, ErrorCode::EmergencyStop);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn snake_search_moves_to_corner_first() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetUnitState { unit } => Reply::Payload(unit_state(*unit, false, 0)),
            Command::GetSystemState => Reply::Payload(vec![0, 0]),
            Command::GetLastError => Reply::Payload(vec![0, 0]),
            Command::GetMemoryLength => Reply::Payload(9u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Payload(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let mut args = SnakeSearchArgs::new(UnitId(1), 40, UnitId(2), 40, 20, 20, 30);
        args.start_from_center = true;
        args.flip_vertical = true;
        let points = device.start_snake_search(&args, AdcChannels::CH1).unwrap();
        assert_eq!(points.len(), 9);
        assert_eq!((points[0].x, points[0].y), (-20.0, 20.0));
        assert_eq!((points[2].x, points[2].y), (20.0, 20.0));
        assert_eq!((points[8].x, points[8].y), (20.0, -20.0));

        let sent: Vec<_> = requests
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !matches!(c, Command::GetUnitState { .. }))
            .cloned()
            .collect();
        assert_eq!(
            sent[1],
            Command::Move {
                unit: UnitId(1),
                steps: -20,
                speed: 30
            }
        );
        assert_eq!(
            sent[2],
            Command::Move {
                unit: UnitId(2),
                steps: 20,
                speed: 30
            }
        );
        match &sent[3] {
            Command::SnakeSearch(wire) => {
                assert_eq!(wire.vertical_range, 40);
                assert!(wire.flip_vertical);
                assert!(!wire.start_from_center);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn snake_search_starts_at_current_position_by_default() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetSystemState => Reply::Payload(vec![0, 0]),
            Command::GetLastError => Reply::Payload(vec![0, 0]),
            Command::GetMemoryLength => Reply::Payload(3u32.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Payload(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        let args = SnakeSearchArgs::new(UnitId(1), 40, UnitId(2), 0, 20, 20, 30);
        let points = device.start_snake_search(&args, AdcChannels::CH1).unwrap();
        let coords: Vec<_> = points.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(coords, vec![(0.0, 0.0), (20.0, 0.0), (40.0, 0.0)]);
        assert!(!requests
            .lock()
            .unwrap()
            .iter()
            .any(|c| matches!(c, Command::Move { .. })));
    }

    #[test]
    fn subscriber_may_use_the_device() {
        let (stream, _) = MockDevice::new(|cmd| match cmd {
            Command::GetUnitState { unit } => Reply::Payload(unit_state(*unit, false, 5)),
            _ => Reply::Silent,
        });
        let device = Arc::new(M12Device::with_options(stream, fast_options()));

        let calls = Arc::new(AtomicUsize::new(0));
        let inner = device.clone();
        let counter = calls.clone();
        device.subscribe(move |_| {
            let counter = counter.clone();
            inner.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let waiter = device.clone();
        thread::spawn(move || {
            let result = waiter.wait_by_unit_state(
                UnitId(1),
                Duration::from_millis(5),
                Duration::from_millis(100),
            );
            let _ = done_tx.send(result.map_err(|e| e.to_string()));
        });

        let result = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("wait did not return");
        assert_eq!(result, Ok(ErrorCode::None));

        // the callback registered during the first poll sees the second one
        device
            .wait_by_unit_state(UnitId(1), Duration::from_millis(5), Duration::from_secs(1))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn oversized_memory_length_is_not_preallocated() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetMemoryLength => Reply::Payload(u32::MAX.to_le_bytes().to_vec()),
            Command::ReadMemory { offset, length } => {
                Reply::Corrupt(memory_reply(*offset, *length))
            }
            _ => Reply::Silent,
        });
        let device = M12Device::with_options(stream, fast_options());

        assert!(matches!(
            device.read_memory_all(None),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert!(requests
            .lock()
            .unwrap()
            .contains(&Command::ReadMemory {
                offset: 0,
                length: M12_MEMORY_BLOCK_LEN
            }));
    }

    #[test]
    fn fast1d_rejects_repeated_channel() {
        let (stream, requests) = MockDevice::new(|_| Reply::Silent);
        let device = M12Device::with_options(stream, fast_options());

        let args = Fast1dArgs {
            unit: UnitId(1),
            range: 100,
            interval: 20,
            speed: 50,
            channel: AdcChannels::CH3,
            second_channel: AdcChannels::CH3,
        };
        assert!(matches!(
            device.start_fast1d(&args),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(requests.lock().unwrap().is_empty());
    }

    #[test]
    fn device_is_shared_between_threads() {
        let (stream, requests) = MockDevice::new(|cmd| match cmd {
            Command::GetUnitState { unit } => {
                Reply::Payload(unit_state(*unit, false, unit.0 as i32))
            }
            _ => Reply::Silent,
        });
        let device = Arc::new(M12Device::with_options(stream, fast_options()));

        let handles: Vec<_> = (1..=4u8)
            .map(|id| {
                let device = device.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        let state = device.get_unit_state(UnitId(id)).unwrap();
                        assert_eq!(state.unit, UnitId(id));
                        assert_eq!(state.abs_position, id as i32);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(requests.lock().unwrap().len(), 40);
    }
}
