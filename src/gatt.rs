//! Custom sensor data GATT service and the resolution of its runtime handles.

use crate::bus::{BusError, GattServer, RequestId, Status};

/// 34802252-7185-4d5d-b431-630e7050e8f0
pub const SENSOR_DATA_SERVICE_UUID: u128 = 0x34802252_7185_4d5d_b431_630e7050e8f0;
/// 34800001-7185-4d5d-b431-630e7050e8f0
pub const COMMAND_CHAR_UUID: u128 = 0x34800001_7185_4d5d_b431_630e7050e8f0;
/// 34800002-7185-4d5d-b431-630e7050e8f0
pub const DATA_CHAR_UUID: u128 = 0x34800002_7185_4d5d_b431_630e7050e8f0;

pub const COMMAND_CHAR_UUID16: u16 = 0x0001;
pub const DATA_CHAR_UUID16: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Property {
    Write,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicDefinition {
    pub uuid: u128,
    pub property: Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceDefinition {
    pub uuid: u128,
    pub characteristics: [CharacteristicDefinition; 2],
}

impl ServiceDefinition {
    /// Write-only command characteristic and notify-only data characteristic.
    pub const fn sensor_data() -> Self {
        Self {
            uuid: SENSOR_DATA_SERVICE_UUID,
            characteristics: [
                CharacteristicDefinition {
                    uuid: COMMAND_CHAR_UUID,
                    property: Property::Write,
                },
                CharacteristicDefinition {
                    uuid: DATA_CHAR_UUID,
                    property: Property::Notify,
                },
            ],
        }
    }
}

/// A characteristic as reported back by the GATT stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicInfo {
    /// 128-bit UUID in little endian byte order
    pub uuid: [u8; 16],
    pub handle: Option<u16>,
}

impl CharacteristicInfo {
    /// The 16-bit sub-UUID at bytes 12..14 of the little endian UUID.
    pub fn uuid16(&self) -> u16 {
        u16::from_le_bytes([self.uuid[12], self.uuid[13]])
    }
}

/// Runtime handles of the service; `0` means unresolved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Handles {
    pub service: u16,
    pub command: u16,
    pub data: u16,
}

impl Handles {
    pub fn is_resolved(&self) -> bool {
        self.service != 0 && self.command != 0 && self.data != 0
    }

    /// Match the described characteristics against the known sub-UUIDs.
    pub fn resolve(service: u16, characteristics: &[CharacteristicInfo]) -> Result<Self, BootstrapError> {
        let mut handles = Handles {
            service,
            ..Default::default()
        };

        for characteristic in characteristics {
            let uuid16 = characteristic.uuid16();
            trace!("characteristic uuid16: {:#x}", uuid16);

            let handle = characteristic.handle.unwrap_or(0);
            match uuid16 {
                DATA_CHAR_UUID16 => handles.data = handle,
                COMMAND_CHAR_UUID16 => handles.command = handle,
                _ => {}
            }
        }

        if handles.command == 0 {
            return Err(BootstrapError::CommandUnresolved);
        }
        if handles.data == 0 {
            return Err(BootstrapError::DataUnresolved);
        }

        Ok(handles)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootstrapError {
    Bus(BusError),
    ServiceRejected(Status),
    DescriptionRejected(Status),
    CommandUnresolved,
    DataUnresolved,
}

impl From<BusError> for BootstrapError {
    fn from(e: BusError) -> Self {
        BootstrapError::Bus(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Bootstrap {
    Idle,
    Creating(RequestId),
    Describing { service: u16, request: RequestId },
    Ready(Handles),
    /// Halted; no retry
    Failed(BootstrapError),
}

/// One-shot service setup: create, describe, resolve, subscribe.
#[derive(Debug)]
pub struct ServiceBootstrap {
    state: Bootstrap,
}

impl ServiceBootstrap {
    pub fn new() -> Self {
        Self {
            state: Bootstrap::Idle,
        }
    }

    pub fn state(&self) -> Bootstrap {
        self.state
    }

    /// Resolved handles, or all zeros before the service is usable.
    pub fn handles(&self) -> Handles {
        match self.state {
            Bootstrap::Ready(handles) => handles,
            _ => Handles::default(),
        }
    }

    pub fn begin(&mut self, gatt: &mut impl GattServer, request: RequestId) {
        let definition = ServiceDefinition::sensor_data();
        self.state = match gatt.create_service(request, &definition) {
            Ok(()) => Bootstrap::Creating(request),
            Err(e) => self.fail(e.into()),
        };
    }

    pub fn on_created(
        &mut self,
        gatt: &mut impl GattServer,
        request: RequestId,
        status: Status,
        service: u16,
        describe: RequestId,
    ) {
        if self.state != Bootstrap::Creating(request) {
            debug!("unexpected service creation result {:?}", request);
            return;
        }

        if status != Status::CREATED {
            self.state = self.fail(BootstrapError::ServiceRejected(status));
            return;
        }

        info!("sensor data service created, handle {}", service);
        self.state = match gatt.describe_service(describe, service) {
            Ok(()) => Bootstrap::Describing {
                service,
                request: describe,
            },
            Err(e) => self.fail(e.into()),
        };
    }

    pub fn on_described(
        &mut self,
        gatt: &mut impl GattServer,
        request: RequestId,
        status: Status,
        characteristics: &[CharacteristicInfo],
    ) {
        let Bootstrap::Describing {
            service,
            request: expected,
        } = self.state
        else {
            debug!("unexpected service description {:?}", request);
            return;
        };
        if expected != request {
            return;
        }

        if status.is_error() {
            self.state = self.fail(BootstrapError::DescriptionRejected(status));
            return;
        }

        match Handles::resolve(service, characteristics) {
            Ok(handles) => {
                info!(
                    "characteristics resolved: command {}, data {}",
                    handles.command, handles.data
                );
                gatt.subscribe_characteristic(handles.service, handles.command);
                gatt.subscribe_characteristic(handles.service, handles.data);
                self.state = Bootstrap::Ready(handles);
            }
            Err(e) => self.state = self.fail(e),
        }
    }

    /// Forget the handles and unsubscribe from both characteristics.
    pub fn teardown(&mut self, gatt: &mut impl GattServer) {
        if let Bootstrap::Ready(handles) = self.state {
            gatt.unsubscribe_characteristic(handles.service, handles.command);
            gatt.unsubscribe_characteristic(handles.service, handles.data);
        }
        self.state = Bootstrap::Idle;
    }

    fn fail(&self, e: BootstrapError) -> Bootstrap {
        error!("sensor data service bootstrap halted: {:?}", e);
        Bootstrap::Failed(e)
    }
}

impl Default for ServiceBootstrap {
    fn default() -> Self {
        Self::new()
    }
}
