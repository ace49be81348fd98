//! Board services on the ESP32-S3: the shutdown timer, the status LED,
//! deep sleep with accelerometer wake-up, and a small local resource bus.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{select, Either};
use embassy_sync::{
    blocking_mutex::{raw::CriticalSectionRawMutex, Mutex},
    signal::Signal,
};
use embassy_time::{Duration, Ticker, Timer};
use esp_hal::{
    gpio::{GpioPin, Output},
    rtc_cntl::{
        sleep::{Ext0WakeupSource, WakeupLevel},
        Rtc,
    },
};
use heapless::Vec;

use crate::ble::state::{post, Inbound};
use crate::bus::{Board, BusError, RequestId, ResourceBus, ResourceId, Status, TimerId};
use crate::power::{WakeupMode, WakeupState};

/// Seconds since boot, published once per second while subscribed.
pub const UPTIME_PATH: &str = "/System/Uptime";
const UPTIME_RESOURCE: ResourceId = ResourceId(1);

const BLINK_MS: u64 = 50;

/// GPIO wired to the accelerometer interrupt output.
pub type WakePin = GpioPin<4>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum TimerCommand {
    Start { timer: TimerId, period_ms: u32 },
    Stop(TimerId),
}

static TIMER: Signal<CriticalSectionRawMutex, TimerCommand> = Signal::new();
static BLINK: Signal<CriticalSectionRawMutex, ()> = Signal::new();
static LED: Mutex<CriticalSectionRawMutex, RefCell<Option<Output<'static>>>> =
    Mutex::new(RefCell::new(None));
static UPTIME_STREAM: AtomicBool = AtomicBool::new(false);

fn drive_led(on: bool) {
    LED.lock(|led| {
        if let Some(led) = led.borrow_mut().as_mut() {
            if on {
                led.set_high();
            } else {
                led.set_low();
            }
        }
    });
}

pub struct EspBoard {
    rtc: Rtc<'static>,
    wake_pin: WakePin,
    wakeup: Option<WakeupState>,
    next_timer: u16,
}

impl EspBoard {
    pub fn new(rtc: Rtc<'static>, wake_pin: WakePin, led: Output<'static>) -> Self {
        LED.lock(|cell| cell.replace(Some(led)));

        Self {
            rtc,
            wake_pin,
            wakeup: None,
            next_timer: 0,
        }
    }
}

impl Board for EspBoard {
    fn start_timer(&mut self, period_ms: u32) -> TimerId {
        self.next_timer = self.next_timer.wrapping_add(1);
        let timer = TimerId(self.next_timer);
        TIMER.signal(TimerCommand::Start { timer, period_ms });
        timer
    }

    fn stop_timer(&mut self, timer: TimerId) {
        TIMER.signal(TimerCommand::Stop(timer));
    }

    fn indicate(&mut self) {
        drive_led(true);
        BLINK.signal(());
    }

    fn arm_wakeup(&mut self, wakeup: WakeupState) {
        info!("wake-up armed: {:?} level {}", wakeup.mode, wakeup.level);
        self.wakeup = Some(wakeup);
    }

    fn set_led(&mut self, on: bool) {
        drive_led(on);
    }

    fn power_off(&mut self) {
        match self.wakeup {
            Some(wakeup) if wakeup.mode != WakeupMode::Disabled => {
                info!("entering deep sleep");
                let source = Ext0WakeupSource::new(&mut self.wake_pin, WakeupLevel::High);
                self.rtc.sleep_deep(&[&source]);
            }
            _ => {
                warn!("entering deep sleep without a wake-up source");
                self.rtc.sleep_deep(&[]);
            }
        }
    }
}

/// Periodic ticks for the shutdown countdown.
#[embassy_executor::task]
pub async fn timer_task() {
    let mut command = TIMER.wait().await;

    loop {
        command = match command {
            TimerCommand::Stop(_) => TIMER.wait().await,
            TimerCommand::Start { timer, period_ms } => {
                let mut ticker = Ticker::every(Duration::from_millis(period_ms.into()));
                loop {
                    match select(ticker.next(), TIMER.wait()).await {
                        Either::First(()) => post(Inbound::Timer(timer)),
                        // Stopping an old timer leaves the current one running
                        Either::Second(TimerCommand::Stop(old)) if old != timer => {}
                        Either::Second(next) => break next,
                    }
                }
            }
        };
    }
}

/// Turns the LED off again after `indicate`.
#[embassy_executor::task]
pub async fn blink_task() {
    loop {
        BLINK.wait().await;
        Timer::after_millis(BLINK_MS).await;
        drive_led(false);
    }
}

/// Resource bus of a board without a sensor hub: one uptime stream, no logs,
/// no routing.
pub struct LocalBus;

impl ResourceBus for LocalBus {
    fn resolve(&mut self, path: &str) -> Result<ResourceId, BusError> {
        match path {
            UPTIME_PATH => Ok(UPTIME_RESOURCE),
            _ => Err(BusError::NotFound),
        }
    }

    fn subscribe(&mut self, request: RequestId, resource: ResourceId) -> Result<(), BusError> {
        let status = if resource == UPTIME_RESOURCE {
            UPTIME_STREAM.store(true, Ordering::Relaxed);
            Status::OK
        } else {
            Status::NOT_FOUND
        };
        post(Inbound::SubscribeResult { request, status });
        Ok(())
    }

    fn unsubscribe(&mut self, resource: ResourceId) {
        if resource == UPTIME_RESOURCE {
            UPTIME_STREAM.store(false, Ordering::Relaxed);
        }
    }

    fn fetch_log_page(&mut self, request: RequestId, log_id: u32) -> Result<(), BusError> {
        debug!("no logbook, log {} not found", log_id);
        post(Inbound::LogPage {
            request,
            status: Status::NOT_FOUND,
            bytes: Vec::new(),
        });
        Ok(())
    }

    fn subscribe_peers(&mut self) {
        // The BLE task always reports connections
    }

    fn subscribe_routes(&mut self) {}
}

/// Publishes the uptime resource while someone is subscribed.
#[embassy_executor::task]
pub async fn uptime_task() {
    let mut ticker = Ticker::every(Duration::from_secs(1));
    let mut seconds: u32 = 0;

    loop {
        ticker.next().await;
        seconds = seconds.wrapping_add(1);

        if UPTIME_STREAM.load(Ordering::Relaxed) {
            let mut bytes = Vec::new();
            let _ = bytes.extend_from_slice(&seconds.to_le_bytes());
            post(Inbound::StreamData {
                resource: UPTIME_RESOURCE,
                bytes,
            });
        }
    }
}
