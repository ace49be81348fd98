//! Interfaces to the collaborators the sensor data client drives: the
//! internal resource bus, the GATT stack and the board services.
//!
//! Every call returns immediately. Calls that produce a result later take a
//! [`RequestId`] chosen by the caller; the collaborator echoes it back in the
//! matching [`Event`](crate::client::Event).

use crate::gatt::ServiceDefinition;
use crate::power::WakeupState;

/// Runtime identifier of a resource on the internal bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub const INVALID: Self = Self(u32::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Correlates an asynchronous request with its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(pub u16);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId(pub u16);

/// Pseudo-HTTP result code carried by bus results.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(pub u16);

impl Status {
    pub const CONTINUE: Self = Self(100);
    pub const OK: Self = Self(200);
    pub const CREATED: Self = Self(201);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const INSUFFICIENT_STORAGE: Self = Self(507);

    pub fn is_error(&self) -> bool {
        self.0 >= 400
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusError {
    /// No resource is registered under the requested path
    NotFound,
    /// The collaborator cannot take more requests right now
    QueueFull,
    /// The transport behind the collaborator is not usable
    Unavailable,
}

/// The internal publish/subscribe resource bus.
pub trait ResourceBus {
    /// Look up the runtime id of a resource path such as `/Meas/Acc/52`.
    fn resolve(&mut self, path: &str) -> Result<ResourceId, BusError>;

    /// Result arrives as `Event::SubscribeResult`.
    fn subscribe(&mut self, request: RequestId, resource: ResourceId) -> Result<(), BusError>;

    fn unsubscribe(&mut self, resource: ResourceId);

    /// Request the next page of a stored log. Result arrives as `Event::LogPage`.
    fn fetch_log_page(&mut self, request: RequestId, log_id: u32) -> Result<(), BusError>;

    /// Start receiving `Event::Peer` notifications.
    fn subscribe_peers(&mut self);

    /// Start receiving `Event::Route` notifications.
    fn subscribe_routes(&mut self);
}

/// The BLE GATT stack.
pub trait GattServer {
    /// Result arrives as `Event::ServiceCreated`.
    fn create_service(
        &mut self,
        request: RequestId,
        service: &ServiceDefinition,
    ) -> Result<(), BusError>;

    /// Result arrives as `Event::ServiceDescribed`.
    fn describe_service(&mut self, request: RequestId, service: u16) -> Result<(), BusError>;

    /// Start receiving writes and CCCD changes of a characteristic.
    fn subscribe_characteristic(&mut self, service: u16, characteristic: u16);

    fn unsubscribe_characteristic(&mut self, service: u16, characteristic: u16);

    /// Send one notification. Failures are reported but never retried.
    fn notify(&mut self, characteristic: u16, value: &[u8]) -> Result<(), BusError>;
}

/// Board level services used by the power state machine.
pub trait Board {
    /// Start a periodic timer. Ticks arrive as `Event::Timer`.
    fn start_timer(&mut self, period_ms: u32) -> TimerId;

    /// Stop future ticks. A tick already queued may still be delivered.
    fn stop_timer(&mut self, timer: TimerId);

    /// Short visual indication (blink).
    fn indicate(&mut self);

    /// Arm the accelerometer wake-up circuit.
    fn arm_wakeup(&mut self, wakeup: WakeupState);

    fn set_led(&mut self, on: bool);

    /// Enter full power-off. Only a wake-up source brings the device back.
    fn power_off(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_boundary() {
        assert!(!Status::CONTINUE.is_error());
        assert!(!Status::CREATED.is_error());
        assert!(Status::BAD_REQUEST.is_error());
        assert_eq!(Status::INSUFFICIENT_STORAGE.to_be_bytes(), [0x01, 0xFB]);
    }

    #[test]
    fn test_invalid_resource() {
        assert!(!ResourceId::INVALID.is_valid());
        assert!(ResourceId(3).is_valid());
    }
}
