#![cfg_attr(feature = "esp32", no_std)]
#![cfg_attr(feature = "esp32", no_main)]

#[cfg(feature = "esp32")]
mod firmware {
    use embassy_executor::Spawner;
    use esp_backtrace as _;
    use esp_hal::{
        clock::CpuClock,
        gpio::{Level, Output, OutputConfig},
        rng::Rng,
        rtc_cntl::Rtc,
        timer::timg::TimerGroup,
    };
    use esp_println as _;
    use sensorgate::ble::{self, state::INBOUND, BleGatt};
    use sensorgate::board::{self, EspBoard, LocalBus};
    use sensorgate::{power, SensorDataClient};

    #[esp_hal_embassy::main]
    async fn main(spawner: Spawner) {
        let peripherals =
            esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));

        // esp-wifi requires an allocator
        esp_alloc::heap_allocator!(72 * 1024);

        let timg0 = TimerGroup::new(peripherals.TIMG0);
        let init = match esp_wifi::init(
            timg0.timer0,
            Rng::new(peripherals.RNG),
            peripherals.RADIO_CLK,
        ) {
            Ok(init) => init,
            Err(e) => {
                defmt::error!("radio init failed: {:?}", defmt::Debug2Format(&e));
                return;
            }
        };

        let timg1 = TimerGroup::new(peripherals.TIMG1);
        esp_hal_embassy::init(timg1.timer0);

        defmt::info!("sensorgate starting");

        let led = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());
        let board = EspBoard::new(Rtc::new(peripherals.LPWR), peripherals.GPIO4, led);

        spawner.must_spawn(ble::start(peripherals.BT, init));
        spawner.must_spawn(board::timer_task());
        spawner.must_spawn(board::blink_task());
        spawner.must_spawn(board::uptime_task());
        spawner.must_spawn(client_task(board));
    }

    #[embassy_executor::task]
    async fn client_task(board: EspBoard) {
        let mut client =
            match SensorDataClient::new(LocalBus, BleGatt, board, power::Config::default()) {
                Ok(client) => client,
                Err(e) => {
                    defmt::error!("invalid power configuration: {:?}", e);
                    return;
                }
            };

        client.start();
        loop {
            let inbound = INBOUND.receive().await;
            client.handle(inbound.as_event());
        }
    }
}

/// Scripted session against the in-memory collaborators: bootstrap, a
/// greeting, one sensor stream, a paged log and the shutdown countdown.
#[cfg(not(feature = "esp32"))]
fn main() {
    use sensorgate::bus::{ResourceId, Status};
    use sensorgate::client::PeerState;
    use sensorgate::gatt::{CharacteristicInfo, COMMAND_CHAR_UUID, DATA_CHAR_UUID};
    use sensorgate::power::{self, PowerState};
    use sensorgate::receiver::{DataFrame, LogAssembler, StreamAssembler};
    use sensorgate::sim::{SimBoard, SimBus, SimGatt};
    use sensorgate::{Event, SensorDataClient};

    const COMMAND: u16 = 12;
    const DATA: u16 = 14;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bus = SimBus::with_resources(&[("/Meas/Acc/52", 52)]);
    let mut client =
        match SensorDataClient::new(bus, SimGatt::default(), SimBoard::default(), power::Config::default()) {
            Ok(client) => client,
            Err(e) => {
                log::error!("invalid power configuration: {:?}", e);
                return;
            }
        };

    client.start();
    let Some(request) = client.gatt().last_request() else {
        log::error!("service creation was not requested");
        return;
    };
    client.handle(Event::ServiceCreated {
        request,
        status: Status::CREATED,
        service: 10,
    });
    let Some(request) = client.gatt().last_request() else {
        log::error!("service description was not requested");
        return;
    };
    let characteristics = [
        CharacteristicInfo {
            uuid: COMMAND_CHAR_UUID.to_le_bytes(),
            handle: Some(COMMAND),
        },
        CharacteristicInfo {
            uuid: DATA_CHAR_UUID.to_le_bytes(),
            handle: Some(DATA),
        },
    ];
    client.handle(Event::ServiceDescribed {
        request,
        status: Status::OK,
        characteristics: &characteristics,
    });
    log::info!("bootstrap: {:?}", client.bootstrap_state());

    client.handle(Event::Peer(PeerState::Connected));
    let write = |client: &mut SensorDataClient<_, _, _>, bytes: &[u8]| {
        client.handle(Event::CharacteristicWritten {
            characteristic: COMMAND,
            bytes,
        })
    };

    write(&mut client, &[0, 1]);
    write(&mut client, b"\x01\x05/Meas/Acc/52");
    if let Some(request) = client.bus().last_subscribe() {
        client.handle(Event::SubscribeResult {
            request,
            status: Status::OK,
        });
    }
    let sample: Vec<u8> = (0..=255u8).cycle().take(220).collect();
    client.handle(Event::StreamData {
        resource: ResourceId(52),
        bytes: &sample,
    });

    write(&mut client, &[3, 7, 42, 0, 0, 0]);
    let log: Vec<u8> = (0..500u32).map(|i| (i * 7) as u8).collect();
    let mut pages = log.chunks(200).peekable();
    while let Some(page) = pages.next() {
        let Some(request) = client.bus().last_page_request() else {
            break;
        };
        let status = if pages.peek().is_some() {
            Status::CONTINUE
        } else {
            Status::OK
        };
        client.handle(Event::LogPage {
            request,
            status,
            bytes: page,
        });
    }

    // What the phone saw
    let mut stream = StreamAssembler::new(5);
    let mut logbook = LogAssembler::new(7);
    for frame in client.gatt().notifications() {
        match DataFrame::parse(frame) {
            Ok(parsed) if parsed.reference == 1 => {
                log::info!("command result: {:?}", parsed.command_result());
            }
            Ok(parsed) if parsed.reference == 5 => {
                if let Err(e) = stream.push(frame) {
                    log::warn!("stream frame rejected: {:?}", e);
                }
            }
            Ok(_) => {
                if let Err(e) = logbook.push(frame) {
                    log::warn!("log frame rejected: {:?}", e);
                }
            }
            Err(e) => log::warn!("undecodable frame: {:?}", e),
        }
    }
    stream.flush();
    while let Some(payload) = stream.next_payload() {
        log::info!("stream payload intact: {}", payload == sample);
    }
    log::info!(
        "log complete: {}, intact: {}",
        logbook.is_complete(),
        logbook.bytes() == log.as_slice()
    );

    client.handle(Event::Peer(PeerState::Disconnected));
    while client.power_state() == PowerState::CountingDown {
        let Some(timer) = client.board().active_timer() else {
            break;
        };
        client.handle(Event::Timer(timer));
    }
    log::info!(
        "power: {:?} after {} ms",
        client.power_state(),
        client.power().elapsed_ms()
    );

    client.stop();
}
