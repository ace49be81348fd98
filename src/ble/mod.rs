use core::cell::Cell;

use bt_hci::controller::ExternalController;
use config::{Config, Resources};
use embassy_futures::{join::join3, select::select};
use embassy_time::Timer;
use error::Error;
use esp_hal::peripherals::BT;
use esp_wifi::{ble::controller::BleConnector, EspWifiController};
use heapless::Vec;
use service::SensorDataService;
use state::{GattRequest, Inbound, GATT_REQUESTS, INBOUND, OUTBOUND};
use static_cell::StaticCell;
use trouble_host::prelude::*;

use crate::bus::Status;
use crate::client::PeerState;
use crate::gatt::{CharacteristicInfo, COMMAND_CHAR_UUID, DATA_CHAR_UUID, SENSOR_DATA_SERVICE_UUID};

mod config;
mod error;
mod service;
pub mod state;

pub use state::BleGatt;

static RESOURCES: StaticCell<Resources> = StaticCell::new();

#[gatt_server]
pub struct Server {
    sensor_data: SensorDataService,
}

/// Which characteristics the client asked to hear about.
#[derive(Default)]
struct Routing {
    command: Cell<bool>,
    data: Cell<bool>,
}

/// BLE stack and its connection state
pub struct Ble<'a> {
    config: Config,
    server: Server<'a>,
    routing: Routing,
}

impl<'a> Ble<'a> {
    fn new(config: Config) -> Result<Self, Error> {
        let server = Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
            name: config.name,
            appearance: &appearance::sensor::GENERIC_SENSOR,
        }))
        .map_err(|_| Error::Gatt)?;

        Ok(Self {
            config,
            server,
            routing: Routing::default(),
        })
    }

    /// Build the host and serve connections until the stack fails
    async fn start<C: Controller>(stack: &'a Stack<'a, C>, config: Config) -> Result<(), Error> {
        let Host {
            mut peripheral,
            runner,
            ..
        } = stack.build();

        let ble = Self::new(config)?;

        join3(
            ble_task(runner),
            ble.serve_gatt_requests(),
            ble.run_connection_loop(&mut peripheral),
        )
        .await;

        Ok(())
    }

    /// Advertise, serve one connection, repeat
    async fn run_connection_loop<C: Controller>(&self, peripheral: &mut Peripheral<'a, C>) {
        loop {
            embassy_futures::yield_now().await;

            match advertise(self.config.name, peripheral).await {
                Ok(conn) => {
                    info!("BLE connected");
                    INBOUND.send(Inbound::Peer(PeerState::Connected)).await;

                    // The notify task never returns, the event task ends with the link
                    select(self.gatt_events_task(&conn), self.notify_task(&conn)).await;

                    // Frames queued for this peer are not for the next one
                    OUTBOUND.clear();
                    info!("BLE disconnected");
                    INBOUND.send(Inbound::Peer(PeerState::Disconnected)).await;
                }
                Err(_) => {
                    error!("Error establishing a BLE connection");
                    Timer::after_secs(1).await;
                }
            }
        }
    }

    /// Answer the client's service requests from the static attribute table
    async fn serve_gatt_requests(&self) {
        let service = &self.server.sensor_data;

        loop {
            match GATT_REQUESTS.receive().await {
                GattRequest::Create(request) => {
                    INBOUND
                        .send(Inbound::ServiceCreated {
                            request,
                            status: Status::CREATED,
                            service: service.handle,
                        })
                        .await;
                }
                GattRequest::Describe(request, handle) => {
                    let status = if handle == service.handle {
                        Status::OK
                    } else {
                        Status::NOT_FOUND
                    };
                    let characteristics = [
                        CharacteristicInfo {
                            uuid: COMMAND_CHAR_UUID.to_le_bytes(),
                            handle: Some(service.command.handle),
                        },
                        CharacteristicInfo {
                            uuid: DATA_CHAR_UUID.to_le_bytes(),
                            handle: Some(service.data.handle),
                        },
                    ];
                    INBOUND
                        .send(Inbound::ServiceDescribed {
                            request,
                            status,
                            characteristics,
                        })
                        .await;
                }
                GattRequest::Route(handle, enabled) => {
                    if handle == service.command.handle {
                        self.routing.command.set(enabled);
                    } else if handle == service.data.handle {
                        self.routing.data.set(enabled);
                    } else {
                        warn!("route request for unknown handle {}", handle);
                    }
                }
            }
        }
    }

    /// Handle GATT events for the BLE server
    async fn gatt_events_task(&self, conn: &Connection<'_>) -> Result<(), Error> {
        loop {
            embassy_futures::yield_now().await;

            match conn.next().await {
                ConnectionEvent::Disconnected { reason: _ } => break,
                ConnectionEvent::Gatt { data } => match data.process(&self.server).await {
                    Ok(Some(event)) => {
                        if let GattEvent::Write(write) = &event {
                            self.on_write(write.handle(), write.data()).await;
                        }
                        if let Ok(reply) = event.accept() {
                            reply.send().await;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => break,
                },
            }
        }
        Ok(())
    }

    async fn on_write(&self, handle: u16, value: &[u8]) {
        let service = &self.server.sensor_data;

        if handle == service.command.handle && self.routing.command.get() {
            match Vec::from_slice(value) {
                Ok(bytes) => {
                    INBOUND
                        .send(Inbound::Written {
                            characteristic: handle,
                            bytes,
                        })
                        .await;
                }
                Err(_) => warn!("command of {} bytes dropped", value.len()),
            }
        } else if Some(handle) == service.data.cccd_handle && self.routing.data.get() {
            let enabled = value.first().is_some_and(|flags| flags & 0x01 != 0);
            INBOUND
                .send(Inbound::NotificationsChanged {
                    characteristic: service.data.handle,
                    enabled,
                })
                .await;
        }
    }

    /// Drain the outbound frame queue onto the data characteristic.
    /// A failed notification is dropped, never retried.
    async fn notify_task(&self, conn: &Connection<'_>) {
        let data = self.server.sensor_data.data;

        loop {
            let frame = OUTBOUND.receive().await;
            if data.notify(&self.server, conn, &frame).await.is_err() {
                warn!("notification lost, {} bytes", frame.len());
            }
        }
    }
}

/// Run the BLE host stack task
async fn ble_task<C: Controller>(mut runner: Runner<'_, C>) {
    loop {
        if let Err(e) = runner.run().await {
            panic!("[ble_task] error: {:?}", e);
        }

        embassy_futures::yield_now().await;
    }
}

/// Advertise the BLE device for incoming connections
async fn advertise<'a, C: Controller>(
    name: &'a str,
    peripheral: &mut Peripheral<'a, C>,
) -> Result<Connection<'a>, BleHostError<C::Error>> {
    let mut advertiser_data = [0; 31];

    let adv_len = AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids128(&[SENSOR_DATA_SERVICE_UUID.into()]),
        ],
        &mut advertiser_data[..],
    )?;

    let mut scan_data = [0; 31];
    let scan_len = AdStructure::encode_slice(
        &[AdStructure::ShortenedLocalName(name.as_bytes())],
        &mut scan_data[..],
    )?;

    let advertiser = peripheral
        .advertise(
            &Default::default(),
            Advertisement::ConnectableScannableUndirected {
                adv_data: &advertiser_data[..adv_len],
                scan_data: &scan_data[..scan_len],
            },
        )
        .await?;

    embassy_futures::yield_now().await;
    advertiser.accept().await
}

/// Initialize and start the BLE module (entry point for the BLE module)
#[embassy_executor::task]
pub async fn start(bt: BT, init: EspWifiController<'static>) {
    info!("starting BLE");
    let connector = BleConnector::new(&init, bt);

    let controller: ExternalController<_, 20> = ExternalController::new(connector);
    let resources = RESOURCES.init(Resources::new());

    let config = Config::default();
    let stack = trouble_host::new(controller, resources).set_random_address(config.address);

    if let Err(e) = Ble::start(&stack, config).await {
        error!("BLE stopped: {:?}", e);
    }
}
