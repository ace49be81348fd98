//! Queues between the BLE host tasks and the sensor data client.
//!
//! The client runs in its own task and only makes non-blocking calls, so
//! every collaborator call that "returns later" is a message into one of
//! these channels and its result comes back as an [`Inbound`] message.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use heapless::Vec;

use crate::bus::{BusError, GattServer, RequestId, ResourceId, Status, TimerId};
use crate::client::{Event, PeerState};
use crate::gatt::{CharacteristicInfo, ServiceDefinition};
use crate::protocol::frame::{Frame, HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::protocol::MAX_PATH_LEN;

/// Longest value accepted on the command characteristic.
pub const MAX_COMMAND_LEN: usize = HEADER_LEN + MAX_PATH_LEN;

const INBOUND_DEPTH: usize = 16;
const OUTBOUND_DEPTH: usize = 8;
const REQUEST_DEPTH: usize = 4;

/// Everything the client reacts to, in arrival order.
pub static INBOUND: Channel<CriticalSectionRawMutex, Inbound, INBOUND_DEPTH> = Channel::new();

/// Frames waiting to be notified on the data characteristic.
pub static OUTBOUND: Channel<CriticalSectionRawMutex, Frame, OUTBOUND_DEPTH> = Channel::new();

/// Service setup and routing requests for the BLE task.
pub static GATT_REQUESTS: Channel<CriticalSectionRawMutex, GattRequest, REQUEST_DEPTH> =
    Channel::new();

/// Owned form of [`Event`], so it can wait in a queue.
#[derive(Debug)]
pub enum Inbound {
    Peer(PeerState),
    Written {
        characteristic: u16,
        bytes: Vec<u8, MAX_COMMAND_LEN>,
    },
    NotificationsChanged {
        characteristic: u16,
        enabled: bool,
    },
    StreamData {
        resource: ResourceId,
        bytes: Vec<u8, MAX_PAYLOAD_LEN>,
    },
    SubscribeResult {
        request: RequestId,
        status: Status,
    },
    LogPage {
        request: RequestId,
        status: Status,
        bytes: Vec<u8, MAX_PAYLOAD_LEN>,
    },
    ServiceCreated {
        request: RequestId,
        status: Status,
        service: u16,
    },
    ServiceDescribed {
        request: RequestId,
        status: Status,
        characteristics: [CharacteristicInfo; 2],
    },
    Timer(TimerId),
}

impl Inbound {
    pub fn as_event(&self) -> Event<'_> {
        match self {
            Inbound::Peer(state) => Event::Peer(*state),
            Inbound::Written {
                characteristic,
                bytes,
            } => Event::CharacteristicWritten {
                characteristic: *characteristic,
                bytes,
            },
            Inbound::NotificationsChanged {
                characteristic,
                enabled,
            } => Event::NotificationsChanged {
                characteristic: *characteristic,
                enabled: *enabled,
            },
            Inbound::StreamData { resource, bytes } => Event::StreamData {
                resource: *resource,
                bytes,
            },
            Inbound::SubscribeResult { request, status } => Event::SubscribeResult {
                request: *request,
                status: *status,
            },
            Inbound::LogPage {
                request,
                status,
                bytes,
            } => Event::LogPage {
                request: *request,
                status: *status,
                bytes,
            },
            Inbound::ServiceCreated {
                request,
                status,
                service,
            } => Event::ServiceCreated {
                request: *request,
                status: *status,
                service: *service,
            },
            Inbound::ServiceDescribed {
                request,
                status,
                characteristics,
            } => Event::ServiceDescribed {
                request: *request,
                status: *status,
                characteristics,
            },
            Inbound::Timer(timer) => Event::Timer(*timer),
        }
    }
}

/// Queue a message for the client from synchronous code.
pub fn post(inbound: Inbound) {
    if INBOUND.try_send(inbound).is_err() {
        warn!("client queue full, message dropped");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattRequest {
    Create(RequestId),
    Describe(RequestId, u16),
    Route(u16, bool),
}

/// The client's handle on the BLE task.
///
/// The attribute table is fixed at build time, so creating the service only
/// asks the BLE task to report the handles it already has.
pub struct BleGatt;

impl BleGatt {
    fn request(&self, request: GattRequest) -> Result<(), BusError> {
        GATT_REQUESTS
            .try_send(request)
            .map_err(|_| BusError::QueueFull)
    }
}

impl GattServer for BleGatt {
    fn create_service(
        &mut self,
        request: RequestId,
        service: &ServiceDefinition,
    ) -> Result<(), BusError> {
        if *service != ServiceDefinition::sensor_data() {
            return Err(BusError::Unavailable);
        }
        self.request(GattRequest::Create(request))
    }

    fn describe_service(&mut self, request: RequestId, service: u16) -> Result<(), BusError> {
        self.request(GattRequest::Describe(request, service))
    }

    fn subscribe_characteristic(&mut self, _service: u16, characteristic: u16) {
        if self.request(GattRequest::Route(characteristic, true)).is_err() {
            error!("cannot route characteristic {}", characteristic);
        }
    }

    fn unsubscribe_characteristic(&mut self, _service: u16, characteristic: u16) {
        if self.request(GattRequest::Route(characteristic, false)).is_err() {
            warn!("cannot unroute characteristic {}", characteristic);
        }
    }

    fn notify(&mut self, _characteristic: u16, value: &[u8]) -> Result<(), BusError> {
        let frame = Frame::from_slice(value).map_err(|_| BusError::Unavailable)?;
        OUTBOUND.try_send(frame).map_err(|_| BusError::QueueFull)
    }
}
