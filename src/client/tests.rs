use super::*;
use crate::gatt::{CharacteristicInfo, COMMAND_CHAR_UUID, DATA_CHAR_UUID};
use crate::power::{Config, WakeupState};
use crate::sim::{BoardCall, BusCall, GattCall, SimBoard, SimBus, SimGatt};
use crate::subscription::MAX_SUBSCRIPTIONS;

const SERVICE: u16 = 10;
const COMMAND: u16 = 12;
const DATA: u16 = 14;

type TestClient = SensorDataClient<SimBus, SimGatt, SimBoard>;

fn started() -> TestClient {
    let mut bus = SimBus::with_resources(&[("/Meas/Acc/52", 52), ("/Meas/Temp", 7)]);
    // Extra streams to fill the table with
    for i in 0..MAX_SUBSCRIPTIONS as u32 {
        bus.register(&format!("/Meas/Ecg/{}", 125 + i), ResourceId(1000 + i));
    }

    let mut client =
        SensorDataClient::new(bus, SimGatt::default(), SimBoard::default(), Config::default())
            .unwrap();
    client.start();

    let create = client.gatt().last_request().unwrap();
    client.handle(Event::ServiceCreated {
        request: create,
        status: Status::CREATED,
        service: SERVICE,
    });

    let describe = client.gatt().last_request().unwrap();
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
        request: describe,
        status: Status::OK,
        characteristics: &characteristics,
    });

    client
}

fn write(client: &mut TestClient, bytes: &[u8]) {
    client.handle(Event::CharacteristicWritten {
        characteristic: COMMAND,
        bytes,
    });
}

fn subscribe(client: &mut TestClient, reference: u8, path: &str) {
    let mut bytes = vec![1, reference];
    bytes.extend_from_slice(path.as_bytes());
    write(client, &bytes);
}

fn fill_table(client: &mut TestClient, count: usize) {
    for i in 0..count {
        subscribe(client, 100 + i as u8, &format!("/Meas/Ecg/{}", 125 + i));
    }
}

fn sent(client: &TestClient) -> Vec<Vec<u8>> {
    client
        .gatt()
        .notifications()
        .into_iter()
        .map(<[u8]>::to_vec)
        .collect()
}

fn offset_of(frame: &[u8]) -> u32 {
    u32::from_le_bytes(frame[2..6].try_into().unwrap())
}

#[test]
fn test_start_arms_timer_and_bootstraps() {
    let client = started();

    assert_eq!(client.power_state(), PowerState::CountingDown);
    assert!(client.board().active_timer().is_some());
    assert_eq!(
        client.bus().calls[..2],
        [BusCall::SubscribePeers, BusCall::SubscribeRoutes]
    );
    assert_eq!(
        client.handles(),
        Handles {
            service: SERVICE,
            command: COMMAND,
            data: DATA
        }
    );
    assert!(client.gatt().calls.contains(&GattCall::SubscribeCharacteristic(SERVICE, COMMAND)));
    assert!(client.gatt().calls.contains(&GattCall::SubscribeCharacteristic(SERVICE, DATA)));
}

#[test]
fn test_hello_echo() {
    let mut client = started();

    write(&mut client, &[0, 9]);

    assert_eq!(sent(&client), vec![vec![1, 9, b'H', b'e', b'l', b'l', b'o']]);
    assert_eq!(
        client.gatt().calls.last(),
        Some(&GattCall::Notify(DATA, b"\x01\x09Hello".to_vec()))
    );
}

#[test]
fn test_subscribe_into_last_free_slot() {
    let mut client = started();
    fill_table(&mut client, MAX_SUBSCRIPTIONS - 1);

    subscribe(&mut client, 5, "/Meas/Acc/52");

    let slot = client
        .subscriptions()
        .iter()
        .find(|s| s.client_reference == 5)
        .copied()
        .unwrap();
    assert_eq!(slot.resource, ResourceId(52));
    assert!(slot.sub_started);
    assert!(!slot.sub_completed);
    assert_eq!(client.subscriptions().len(), MAX_SUBSCRIPTIONS);

    let request = client.bus().last_subscribe().unwrap();
    assert_eq!(
        client.bus().calls.last(),
        Some(&BusCall::Subscribe(request, ResourceId(52)))
    );
    assert!(sent(&client).is_empty());
}

#[test]
fn test_subscribe_when_full_reports_insufficient_storage() {
    let mut client = started();
    fill_table(&mut client, MAX_SUBSCRIPTIONS);
    let subscribes = client.bus().calls.len();

    subscribe(&mut client, 5, "/Meas/Acc/52");

    assert_eq!(sent(&client), vec![vec![1, 5, 0x01, 0xFB]]);
    assert_eq!(client.bus().calls.len(), subscribes);
    assert_eq!(client.subscriptions().len(), MAX_SUBSCRIPTIONS);
}

#[test]
fn test_subscribe_acknowledged() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let request = client.bus().last_subscribe().unwrap();

    client.handle(Event::SubscribeResult {
        request,
        status: Status::OK,
    });

    let slot = client.subscriptions().iter().next().copied().unwrap();
    assert!(slot.sub_completed);
}

#[test]
fn test_subscribe_failure_releases_slot_silently() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let request = client.bus().last_subscribe().unwrap();

    client.handle(Event::SubscribeResult {
        request,
        status: Status::NOT_FOUND,
    });

    assert!(client.subscriptions().is_empty());
    assert!(sent(&client).is_empty());
}

#[test]
fn test_duplicate_subscribe_result_ignored() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let request = client.bus().last_subscribe().unwrap();
    client.handle(Event::SubscribeResult {
        request,
        status: Status::OK,
    });

    client.handle(Event::SubscribeResult {
        request,
        status: Status::BAD_REQUEST,
    });

    assert_eq!(client.subscriptions().len(), 1);
}

#[test]
fn test_subscribe_synchronous_failure_frees_slot() {
    let mut client = started();
    client.bus_mut().reject_subscribe = true;

    subscribe(&mut client, 5, "/Meas/Acc/52");

    assert!(client.subscriptions().is_empty());
}

#[test]
fn test_subscribe_unknown_path_ignored() {
    let mut client = started();

    subscribe(&mut client, 5, "/Meas/Nope");

    assert!(client.subscriptions().is_empty());
    assert!(client.bus().last_subscribe().is_none());
    assert!(sent(&client).is_empty());
}

#[test]
fn test_duplicate_reference_ignored() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");

    subscribe(&mut client, 5, "/Meas/Temp");

    assert_eq!(client.subscriptions().len(), 1);
    let subscribes = client
        .bus()
        .calls
        .iter()
        .filter(|c| matches!(c, BusCall::Subscribe(..)))
        .count();
    assert_eq!(subscribes, 1);
}

#[test]
fn test_unsubscribe() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");

    write(&mut client, &[2, 5]);

    assert!(client.subscriptions().is_empty());
    assert_eq!(client.bus().calls.last(), Some(&BusCall::Unsubscribe(ResourceId(52))));
}

#[test]
fn test_unsubscribe_unknown_reference_is_noop() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let before: Vec<_> = client.subscriptions().iter().copied().collect();
    let calls = client.bus().calls.len();

    write(&mut client, &[2, 6]);

    let after: Vec<_> = client.subscriptions().iter().copied().collect();
    assert_eq!(before, after);
    assert_eq!(client.bus().calls.len(), calls);
    assert!(sent(&client).is_empty());
}

#[test]
fn test_disconnect_clears_table_and_restarts_timer() {
    for count in 0..=MAX_SUBSCRIPTIONS {
        let mut client = started();
        client.handle(Event::Peer(PeerState::Connected));
        assert_eq!(client.power_state(), PowerState::Active);
        fill_table(&mut client, count);

        client.handle(Event::Peer(PeerState::Disconnected));

        assert!(client.subscriptions().is_empty());
        let unsubscribes = client
            .bus()
            .calls
            .iter()
            .filter(|c| matches!(c, BusCall::Unsubscribe(_)))
            .count();
        assert_eq!(unsubscribes, count);
        assert_eq!(client.power_state(), PowerState::CountingDown);
        assert_eq!(client.power().elapsed_ms(), 0);
        assert_eq!(client.board().count(&BoardCall::StartTimer(5_000)), 2);
    }
}

#[test]
fn test_route_events_drive_power() {
    let mut client = started();

    client.handle(Event::Route(RouteChange::Found));
    assert_eq!(client.power_state(), PowerState::Active);
    assert_eq!(client.board().active_timer(), None);

    client.handle(Event::Route(RouteChange::Lost));
    assert_eq!(client.power_state(), PowerState::CountingDown);
    assert!(client.board().active_timer().is_some());
}

#[test]
fn test_route_lost_clears_table() {
    let mut client = started();
    client.handle(Event::Route(RouteChange::Found));
    fill_table(&mut client, MAX_SUBSCRIPTIONS);

    client.handle(Event::Route(RouteChange::Lost));

    assert!(client.subscriptions().is_empty());
    let unsubscribes = client
        .bus()
        .calls
        .iter()
        .filter(|c| matches!(c, BusCall::Unsubscribe(_)))
        .count();
    assert_eq!(unsubscribes, MAX_SUBSCRIPTIONS);
}

#[test]
fn test_fetch_log_after_refilling_table_across_reconnect() {
    let mut client = started();
    client.handle(Event::Peer(PeerState::Connected));
    // Results for these never arrive
    fill_table(&mut client, MAX_SUBSCRIPTIONS);
    client.handle(Event::Peer(PeerState::Disconnected));
    client.handle(Event::Peer(PeerState::Connected));
    fill_table(&mut client, MAX_SUBSCRIPTIONS);
    assert_eq!(client.subscriptions().len(), MAX_SUBSCRIPTIONS);

    write(&mut client, &[3, 101, 42, 0, 0, 0]);
    let request = client.bus().last_page_request().unwrap();
    client.handle(Event::LogPage {
        request,
        status: Status::OK,
        bytes: &[9; 20],
    });

    let frames = sent(&client);
    assert_eq!(frames.len(), 2);
    assert_eq!(offset_of(&frames[0]), 0);
    assert_eq!(frames[1], vec![2, 101, 20, 0, 0, 0]);
    assert!(!client.log_fetch().is_active());
}

#[test]
fn test_result_of_unsubscribed_request_ignored() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let stale = client.bus().last_subscribe().unwrap();
    write(&mut client, &[2, 5]);
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let current = client.bus().last_subscribe().unwrap();
    assert_ne!(stale, current);

    client.handle(Event::SubscribeResult {
        request: stale,
        status: Status::NOT_FOUND,
    });

    let slot = client.subscriptions().iter().next().copied().unwrap();
    assert_eq!(slot.client_reference, 5);
    assert!(!slot.sub_completed);

    client.handle(Event::SubscribeResult {
        request: current,
        status: Status::OK,
    });
    assert!(client.subscriptions().iter().next().unwrap().sub_completed);
}

#[test]
fn test_fetch_log_opens_session() {
    let mut client = started();

    write(&mut client, &[3, 101, 42, 0, 0, 0]);

    let fetch = client.log_fetch();
    assert!(fetch.is_active());
    assert_eq!(fetch.log_id(), 42);
    assert_eq!(fetch.offset(), 0);
    assert_eq!(fetch.reference(), 101);

    let request = client.bus().last_page_request().unwrap();
    assert_eq!(client.bus().calls.last(), Some(&BusCall::FetchLogPage(request, 42)));
}

#[test]
fn test_fetch_log_streams_pages_until_end_marker() {
    let mut client = started();
    write(&mut client, &[3, 101, 42, 0, 0, 0]);

    let first = client.bus().last_page_request().unwrap();
    client.handle(Event::LogPage {
        request: first,
        status: Status::CONTINUE,
        bytes: &[7; 200],
    });

    let second = client.bus().last_page_request().unwrap();
    assert_ne!(first, second);
    assert_eq!(client.bus().calls.last(), Some(&BusCall::FetchLogPage(second, 42)));

    client.handle(Event::LogPage {
        request: second,
        status: Status::OK,
        bytes: &[8; 50],
    });

    let frames = sent(&client);
    assert_eq!(frames.len(), 4);
    assert_eq!(&frames[0][..2], &[2, 101]);
    assert_eq!(offset_of(&frames[0]), 0);
    assert_eq!(&frames[1][..2], &[3, 101]);
    assert_eq!(offset_of(&frames[1]), 150);
    assert_eq!(offset_of(&frames[2]), 200);
    assert_eq!(frames[3], vec![2, 101, 250, 0, 0, 0]);

    assert!(!client.log_fetch().is_active());
    assert_eq!(client.log_fetch().offset(), 0);
    assert_eq!(client.bus().last_page_request(), Some(second));
}

#[test]
fn test_fetch_log_error_aborts_silently() {
    let mut client = started();
    write(&mut client, &[3, 101, 42, 0, 0, 0]);
    let request = client.bus().last_page_request().unwrap();

    client.handle(Event::LogPage {
        request,
        status: Status::NOT_FOUND,
        bytes: &[],
    });

    assert!(sent(&client).is_empty());
    assert!(client.log_fetch().is_active());
    assert_eq!(client.bus().last_page_request(), Some(request));
}

#[test]
fn test_new_fetch_replaces_session() {
    let mut client = started();
    write(&mut client, &[3, 101, 42, 0, 0, 0]);
    let stale = client.bus().last_page_request().unwrap();

    write(&mut client, &[3, 102, 43, 0, 0, 0]);
    client.handle(Event::LogPage {
        request: stale,
        status: Status::CONTINUE,
        bytes: &[1; 10],
    });

    assert!(sent(&client).is_empty());
    assert_eq!(client.log_fetch().log_id(), 43);
    assert_eq!(client.log_fetch().reference(), 102);
}

#[test]
fn test_stream_data_forwarded_without_offset() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");
    let payload: Vec<u8> = (0..180).map(|i| i as u8).collect();

    client.handle(Event::StreamData {
        resource: ResourceId(52),
        bytes: &payload,
    });
    client.handle(Event::StreamData {
        resource: ResourceId(99),
        bytes: &payload,
    });

    let frames = sent(&client);
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0][..2], &[2, 5]);
    assert_eq!(&frames[0][2..], &payload[..150]);
    assert_eq!(&frames[1][..2], &[3, 5]);
    assert_eq!(&frames[1][2..], &payload[150..]);
}

#[test]
fn test_log_data_notification_keeps_offset() {
    let mut client = started();
    client
        .bus_mut()
        .register("/Mem/Logbook/byId/3/Data", ResourceId(300));
    subscribe(&mut client, 8, "/Mem/Logbook/byId/3/Data");

    client.handle(Event::LogData {
        resource: ResourceId(300),
        offset: 1_000,
        bytes: &[4; 160],
    });

    let frames = sent(&client);
    assert_eq!(frames.len(), 2);
    assert_eq!(offset_of(&frames[0]), 1_000);
    assert_eq!(offset_of(&frames[1]), 1_150);
    assert_eq!(frames[1].len(), 6 + 10);
}

#[test]
fn test_notification_state_tracked() {
    let mut client = started();

    client.handle(Event::NotificationsChanged {
        characteristic: DATA,
        enabled: true,
    });
    assert!(client.notifications_enabled());

    client.handle(Event::NotificationsChanged {
        characteristic: COMMAND,
        enabled: false,
    });
    assert!(client.notifications_enabled());
}

#[test]
fn test_unknown_and_malformed_commands_ignored() {
    let mut client = started();

    write(&mut client, &[7, 1]);
    write(&mut client, &[0]);
    write(&mut client, &[3, 1, 42]);

    assert!(sent(&client).is_empty());
    assert!(!client.log_fetch().is_active());
}

#[test]
fn test_writes_to_other_characteristics_ignored() {
    let mut client = started();

    client.handle(Event::CharacteristicWritten {
        characteristic: DATA,
        bytes: &[0, 9],
    });

    assert!(sent(&client).is_empty());
}

#[test]
fn test_commands_before_bootstrap_ignored() {
    let mut client = SensorDataClient::new(
        SimBus::default(),
        SimGatt::default(),
        SimBoard::default(),
        Config::default(),
    )
    .unwrap();
    client.start();

    write(&mut client, &[0, 9]);

    assert!(sent(&client).is_empty());
}

#[test]
fn test_lost_notification_not_retried() {
    let mut client = started();
    client.gatt_mut().drop_notifications = true;

    write(&mut client, &[0, 9]);
    client.gatt_mut().drop_notifications = false;
    write(&mut client, &[0, 10]);

    assert_eq!(sent(&client), vec![b"\x01\x0aHello".to_vec()]);
}

#[test]
fn test_countdown_powers_off_once() {
    let mut client = started();

    for _ in 0..20 {
        if let Some(timer) = client.board().active_timer() {
            client.handle(Event::Timer(timer));
        }
    }
    client.handle(Event::Timer(crate::bus::TimerId(1)));

    assert_eq!(client.power_state(), PowerState::PoweredOff);
    assert_eq!(client.board().count(&BoardCall::Indicate), 11);
    assert_eq!(client.board().count(&BoardCall::PowerOff), 1);
    assert_eq!(
        client
            .board()
            .count(&BoardCall::ArmWakeup(WakeupState::default())),
        1
    );
}

#[test]
fn test_stop_tears_down() {
    let mut client = started();
    subscribe(&mut client, 5, "/Meas/Acc/52");

    client.stop();

    assert!(client.subscriptions().is_empty());
    assert_eq!(client.board().active_timer(), None);
    assert_eq!(client.handles(), Handles::default());
    assert!(client
        .gatt()
        .calls
        .contains(&GattCall::UnsubscribeCharacteristic(SERVICE, COMMAND)));
    assert!(client
        .gatt()
        .calls
        .contains(&GattCall::UnsubscribeCharacteristic(SERVICE, DATA)));
}

#[test]
fn test_invalid_config_rejected() {
    let config = Config {
        tick_ms: 0,
        ..Config::default()
    };

    let result = SensorDataClient::new(SimBus::default(), SimGatt::default(), SimBoard::default(), config);

    assert!(matches!(result, Err(ConfigError::ZeroTick)));
}
