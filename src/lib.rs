#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(all(feature = "esp32", feature = "no-esp32"))]
compile_error!("`esp32` and `native-testing` are mutually exclusive");

// Must come first so the logging macros are visible to every module below.
mod fmt;

pub mod bus;
pub mod client;
pub mod gatt;
pub mod logbook;
pub mod power;
pub mod protocol;
pub mod subscription;

#[cfg(any(test, feature = "std"))]
pub mod receiver;
#[cfg(any(test, feature = "std"))]
pub mod sim;

// ESP32-specific modules
#[cfg(feature = "esp32")]
pub mod ble;
#[cfg(feature = "esp32")]
pub mod board;

pub use client::{Event, SensorDataClient};
