/// Time between wake-up and power-off while no peer is around.
pub const AVAILABILITY_TIME_MS: u32 = 60_000;

/// Time the wake-up circuit needs before power-off. Must be a multiple of
/// the blinking period.
pub const WAKE_PREPARATION_TIME_MS: u32 = 5_000;

/// Blinking period while advertising; also the shutdown timer tick.
pub const LED_BLINKING_PERIOD_MS: u32 = 5_000;

/// Wake-up source armed on the accelerometer before powering off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum WakeupMode {
    Disabled = 0,
    /// Any movement above `level` (0..=63)
    Movement = 1,
    /// Double tap on z, `level` is the delay between taps (0..=7)
    DoubleTap = 2,
    SingleTap = 3,
    /// `level` 0 = 156 mg .. 7 = 500 mg
    FreeFall = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeupState {
    pub mode: WakeupMode,
    pub level: u8,
}

impl Default for WakeupState {
    fn default() -> Self {
        Self {
            mode: WakeupMode::Movement,
            level: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    ZeroTick,
    /// A watermark is not a whole number of ticks
    NotTickAligned(u32),
    /// Wake preparation must end before the availability window does
    PreparationTooLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Shutdown timer period
    pub tick_ms: u32,
    pub availability_ms: u32,
    pub wake_preparation_ms: u32,
    pub wakeup: WakeupState,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: LED_BLINKING_PERIOD_MS,
            availability_ms: AVAILABILITY_TIME_MS,
            wake_preparation_ms: WAKE_PREPARATION_TIME_MS,
            wakeup: WakeupState::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }

        // Power-off fires on an exact match of elapsed time
        for watermark in [self.availability_ms, self.wake_preparation_ms] {
            if watermark % self.tick_ms != 0 {
                return Err(ConfigError::NotTickAligned(watermark));
            }
        }

        if self.wake_preparation_ms >= self.availability_ms {
            return Err(ConfigError::PreparationTooLong);
        }

        Ok(())
    }
}
