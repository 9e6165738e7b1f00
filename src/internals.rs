use std::time::Duration;

/// Default timeout for waiting for the response frame of one exchange.
pub const M12_DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default time a busy unit may stay at the same position before a wait gives up.
pub const M12_DEFAULT_WAIT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default time a blind or snake search may keep the system busy.
pub const M12_DEFAULT_WAIT_ALIGNMENT_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Default pause between two state polls.
pub const M12_DEFAULT_LOOP_INTERVAL: Duration = Duration::from_millis(100);

/// Pause between two system state polls while a search is running.
pub const M12_ALIGNMENT_LOOP_INTERVAL: Duration = Duration::from_millis(200);

/// Delay before the first poll of a wait, gives the controller time to raise its busy flag.
pub const M12_SETTLE_DELAY: Duration = Duration::from_millis(50);

/// Delay between refreshing two units while waiting on the system state.
pub const M12_REFRESH_UNIT_DELAY: Duration = Duration::from_millis(10);

/// Delay after commands the controller executes without answering, e.g. flash writes.
pub const M12_COMMIT_DELAY: Duration = Duration::from_millis(100);

/// Poll interval of the home motion.
pub const M12_HOME_LOOP_INTERVAL: Duration = Duration::from_millis(500);

/// Poll interval of regular and fast moves.
pub const M12_MOVE_LOOP_INTERVAL: Duration = Duration::from_millis(50);

/// Number of samples requested by one memory read.
pub const M12_MEMORY_BLOCK_LEN: u32 = 128;

/// How many times a failed memory block read is retried.
pub const M12_MEMORY_READ_RETRIES: usize = 3;

/// Pause before retrying a failed memory block read.
pub const M12_MEMORY_RETRY_BACKOFF: Duration = Duration::from_millis(5);

/// Reference voltage of the ADC in mV, maps to a raw value of 32768.
pub const ADC_VREF_MV: f64 = 10000.0;

/// Largest acceleration accepted by `set_acceleration_steps`.
pub const MAX_ACC_STEPS: u16 = 10000;

/// Lowest accepted motion speed in percent.
pub const M12_MIN_SPEED: u8 = 1;

/// Highest accepted motion speed in percent.
pub const M12_MAX_SPEED: u8 = 100;

/// Upper bound of the samples preallocated before a full memory read-back.
pub const M12_MEMORY_PREALLOC_LEN: u32 = M12_MEMORY_BLOCK_LEN * 64;
