//! Wake/idle power state machine.
//!
//! While nobody is connected a periodic timer blinks the indicator. When the
//! availability window runs out, the accelerometer wake-up circuit is armed,
//! the LED is switched on and the device powers off.

mod config;

pub use config::{
    Config, ConfigError, WakeupMode, WakeupState, AVAILABILITY_TIME_MS, LED_BLINKING_PERIOD_MS,
    WAKE_PREPARATION_TIME_MS,
};

use crate::bus::{Board, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// A peer is connected or a route is present
    Active,
    /// Disconnected, shutdown timer running
    CountingDown,
    /// Power-off requested; terminal for this run
    PoweredOff,
}

#[derive(Debug)]
pub struct PowerManager {
    config: Config,
    state: PowerState,
    timer: Option<TimerId>,
    elapsed_ms: u32,
}

impl PowerManager {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config,
            state: PowerState::CountingDown,
            timer: None,
            elapsed_ms: 0,
        })
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn elapsed_ms(&self) -> u32 {
        self.elapsed_ms
    }

    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// (Re)start the shutdown countdown from zero.
    pub fn arm(&mut self, board: &mut impl Board) {
        if self.state == PowerState::PoweredOff {
            return;
        }

        self.stop_timer(board);
        debug!("start shutdown timer");
        self.timer = Some(board.start_timer(self.config.tick_ms));
        self.elapsed_ms = 0;
        self.state = PowerState::CountingDown;
    }

    /// Peer connected or route found.
    pub fn on_link_up(&mut self, board: &mut impl Board) {
        if self.state != PowerState::CountingDown {
            return;
        }

        self.stop_timer(board);
        self.state = PowerState::Active;
    }

    /// Peer disconnected or route lost.
    pub fn on_link_down(&mut self, board: &mut impl Board) {
        self.arm(board);
    }

    pub fn on_tick(&mut self, timer: TimerId, board: &mut impl Board) {
        if self.state != PowerState::CountingDown || self.timer != Some(timer) {
            trace!("ignoring stale tick {:?}", timer);
            return;
        }

        self.elapsed_ms = self.elapsed_ms.saturating_add(self.config.tick_ms);

        if self.elapsed_ms < self.config.availability_ms {
            board.indicate();
            return;
        }

        if self.elapsed_ms == self.config.availability_ms {
            info!("availability time over, powering off");
            board.arm_wakeup(self.config.wakeup);
            board.set_led(true);
            board.power_off();

            self.stop_timer(board);
            self.state = PowerState::PoweredOff;
        }
    }

    /// Stop the timer without changing state (module shutdown).
    pub fn stop(&mut self, board: &mut impl Board) {
        self.stop_timer(board);
    }

    fn stop_timer(&mut self, board: &mut impl Board) {
        if let Some(timer) = self.timer.take() {
            debug!("stop shutdown timer");
            board.stop_timer(timer);
        }
    }
}
