use crate::bus::{RequestId, ResourceId, Status, TimerId};
use crate::gatt::CharacteristicInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerState {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RouteChange {
    Found,
    Lost,
}

/// Everything the sensor data client reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event<'a> {
    /// BLE peer connected or disconnected
    Peer(PeerState),
    /// Bus routing table change
    Route(RouteChange),

    /// A value was written to one of our characteristics
    CharacteristicWritten { characteristic: u16, bytes: &'a [u8] },
    /// The peer toggled notifications (CCCD) of a characteristic
    NotificationsChanged { characteristic: u16, enabled: bool },

    /// Serialised notification of a subscribed sensor resource
    StreamData { resource: ResourceId, bytes: &'a [u8] },
    /// Notification of a subscribed logbook data resource
    LogData {
        resource: ResourceId,
        offset: u32,
        bytes: &'a [u8],
    },

    SubscribeResult { request: RequestId, status: Status },
    LogPage {
        request: RequestId,
        status: Status,
        bytes: &'a [u8],
    },
    ServiceCreated {
        request: RequestId,
        status: Status,
        service: u16,
    },
    ServiceDescribed {
        request: RequestId,
        status: Status,
        characteristics: &'a [CharacteristicInfo],
    },

    Timer(TimerId),
}
