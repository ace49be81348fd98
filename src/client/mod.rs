//! The sensor data client: one value owning the subscription table, the log
//! fetch session, the power state machine and the GATT bootstrap.
//!
//! All entry points take `&mut self` and run to completion, so nothing in
//! here needs a lock. Results of asynchronous requests are matched back to
//! the work that issued them through the `pending` map.

mod event;

pub use event::{Event, PeerState, RouteChange};

use heapless::FnvIndexMap;

use crate::bus::{Board, GattServer, RequestId, ResourceBus, ResourceId, Status};
use crate::gatt::{Bootstrap, Handles, ServiceBootstrap};
use crate::logbook::{LogFetch, Step};
use crate::power::{self, ConfigError, PowerManager, PowerState};
use crate::protocol::{frame, Command, Frames};
use crate::subscription::{SubscriptionTable, MAX_SUBSCRIPTIONS};

/// In-flight requests: one per subscription, a log page and the bootstrap.
const MAX_PENDING: usize = 16;

/// Continuation of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Pending {
    Subscribe { reference: u8, resource: ResourceId },
    LogPage { log_id: u32 },
    CreateService,
    DescribeService,
}

pub struct SensorDataClient<B, G, D> {
    bus: B,
    gatt: G,
    board: D,

    subscriptions: SubscriptionTable,
    log_fetch: LogFetch,
    power: PowerManager,
    bootstrap: ServiceBootstrap,

    pending: FnvIndexMap<RequestId, Pending, MAX_PENDING>,
    next_request: u16,
    notifications_enabled: bool,
}

impl<B, G, D> SensorDataClient<B, G, D>
where
    B: ResourceBus,
    G: GattServer,
    D: Board,
{
    pub fn new(bus: B, gatt: G, board: D, config: power::Config) -> Result<Self, ConfigError> {
        Ok(Self {
            bus,
            gatt,
            board,
            subscriptions: SubscriptionTable::new(),
            log_fetch: LogFetch::new(),
            power: PowerManager::new(config)?,
            bootstrap: ServiceBootstrap::new(),
            pending: FnvIndexMap::new(),
            next_request: 0,
            notifications_enabled: false,
        })
    }

    /// Start the module: nobody is connected yet, so the shutdown countdown
    /// begins right away.
    pub fn start(&mut self) {
        info!("starting sensor data client");

        self.subscriptions = SubscriptionTable::new();
        self.power.arm(&mut self.board);

        self.bus.subscribe_peers();
        self.bus.subscribe_routes();

        let Some(request) = self.track(Pending::CreateService) else {
            error!("no room to track service creation");
            return;
        };
        self.bootstrap.begin(&mut self.gatt, request);
        if !matches!(self.bootstrap.state(), Bootstrap::Creating(_)) {
            self.pending.remove(&request);
        }
    }

    pub fn stop(&mut self) {
        info!("stopping sensor data client");

        self.power.stop(&mut self.board);
        self.unsubscribe_all();
        self.bootstrap.teardown(&mut self.gatt);
        self.notifications_enabled = false;
    }

    pub fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Peer(PeerState::Connected) | Event::Route(RouteChange::Found) => {
                debug!("link up: {:?}", event);
                self.power.on_link_up(&mut self.board);
            }
            Event::Peer(PeerState::Disconnected) | Event::Route(RouteChange::Lost) => {
                debug!("link down: {:?}", event);
                // Nobody is listening; don't keep sensors running
                self.unsubscribe_all();
                self.power.on_link_down(&mut self.board);
            }

            Event::CharacteristicWritten {
                characteristic,
                bytes,
            } => {
                let handles = self.handles();
                if handles.command != 0 && characteristic == handles.command {
                    self.handle_command(bytes);
                }
            }
            Event::NotificationsChanged {
                characteristic,
                enabled,
            } => {
                let handles = self.handles();
                if handles.data != 0 && characteristic == handles.data {
                    debug!("data notifications enabled: {}", enabled);
                    self.notifications_enabled = enabled;
                }
            }

            Event::StreamData { resource, bytes } => self.forward_stream(resource, bytes),
            Event::LogData {
                resource,
                offset,
                bytes,
            } => self.forward_log_data(resource, offset, bytes),

            Event::SubscribeResult { request, status } => self.on_subscribe_result(request, status),
            Event::LogPage {
                request,
                status,
                bytes,
            } => self.on_log_page(request, status, bytes),
            Event::ServiceCreated {
                request,
                status,
                service,
            } => {
                if self.take(request) != Some(Pending::CreateService) {
                    return;
                }
                let Some(describe) = self.track(Pending::DescribeService) else {
                    error!("no room to track service description");
                    return;
                };
                self.bootstrap
                    .on_created(&mut self.gatt, request, status, service, describe);
                if !matches!(self.bootstrap.state(), Bootstrap::Describing { .. }) {
                    self.pending.remove(&describe);
                }
            }
            Event::ServiceDescribed {
                request,
                status,
                characteristics,
            } => {
                if self.take(request) != Some(Pending::DescribeService) {
                    return;
                }
                self.bootstrap
                    .on_described(&mut self.gatt, request, status, characteristics);
            }

            Event::Timer(timer) => self.power.on_tick(timer, &mut self.board),
        }
    }

    pub fn handles(&self) -> Handles {
        self.bootstrap.handles()
    }

    pub fn bootstrap_state(&self) -> Bootstrap {
        self.bootstrap.state()
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn log_fetch(&self) -> &LogFetch {
        &self.log_fetch
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn power(&self) -> &PowerManager {
        &self.power
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn gatt(&self) -> &G {
        &self.gatt
    }

    pub fn board(&self) -> &D {
        &self.board
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn gatt_mut(&mut self) -> &mut G {
        &mut self.gatt
    }

    pub fn board_mut(&mut self) -> &mut D {
        &mut self.board
    }

    fn handle_command(&mut self, bytes: &[u8]) {
        let command = match Command::parse(bytes) {
            Ok(command) => command,
            Err(e) => {
                warn!("ignoring command: {:?}", e);
                return;
            }
        };
        debug!("command: {:?}", command);

        match command {
            Command::Hello { reference } => self.send(&frame::hello(reference)),
            Command::Subscribe { reference, path } => self.subscribe(reference, path),
            Command::Unsubscribe { reference } => self.unsubscribe(reference),
            Command::FetchLog { reference, log_id } => {
                self.log_fetch.begin(log_id, reference);
                self.request_log_page();
            }
        }
    }

    fn subscribe(&mut self, reference: u8, path: &str) {
        if self.subscriptions.find_by_reference(reference).is_some() {
            warn!("reference {} already subscribed", reference);
            return;
        }

        let Some(slot) = self.subscriptions.allocate() else {
            warn!("no free subscription slot for {}", path);
            self.send(&frame::status(reference, Status::INSUFFICIENT_STORAGE));
            return;
        };

        let resource = match self.bus.resolve(path) {
            Ok(resource) => resource,
            Err(e) => {
                warn!("cannot resolve {}: {:?}", path, e);
                return;
            }
        };
        slot.start(reference, resource);

        let Some(request) = self.track(Pending::Subscribe {
            reference,
            resource,
        }) else {
            warn!("too many requests in flight, {} not subscribed", path);
            self.release(reference);
            self.send(&frame::status(reference, Status::INSUFFICIENT_STORAGE));
            return;
        };
        if let Err(e) = self.bus.subscribe(request, resource) {
            warn!("subscribe to {} failed: {:?}", path, e);
            self.pending.remove(&request);
            self.release(reference);
        }
    }

    /// Free the slot of `reference` and forget its outstanding subscribe.
    fn release(&mut self, reference: u8) {
        if let Some(slot) = self.subscriptions.find_by_reference(reference) {
            slot.release();
        }
        self.pending.retain(|_, pending| {
            !matches!(pending, Pending::Subscribe { reference: r, .. } if *r == reference)
        });
    }

    fn unsubscribe(&mut self, reference: u8) {
        let Some(slot) = self.subscriptions.find_by_reference(reference) else {
            debug!("unsubscribe: no subscription for {}", reference);
            return;
        };

        self.bus.unsubscribe(slot.resource);
        self.release(reference);
    }

    fn unsubscribe_all(&mut self) {
        for resource in self.subscriptions.clear() {
            self.bus.unsubscribe(resource);
        }
        self.pending
            .retain(|_, pending| !matches!(pending, Pending::Subscribe { .. }));
    }

    fn on_subscribe_result(&mut self, request: RequestId, status: Status) {
        let Some(Pending::Subscribe {
            reference,
            resource,
        }) = self.take(request)
        else {
            debug!("subscribe result for unknown request {:?}", request);
            return;
        };

        let Some(slot) = self
            .subscriptions
            .find_by_reference(reference)
            .filter(|slot| slot.resource == resource)
        else {
            debug!("subscription {} is gone", reference);
            return;
        };

        if slot.sub_completed {
            return;
        }

        if status.is_error() {
            // The client notices by never receiving data
            warn!("subscription {} rejected: {}", reference, status.0);
            slot.release();
        } else {
            slot.sub_completed = true;
        }
    }

    fn request_log_page(&mut self) {
        let log_id = self.log_fetch.log_id();
        let Some(request) = self.track(Pending::LogPage { log_id }) else {
            warn!("too many requests in flight, log {} abandoned", log_id);
            self.log_fetch.abandon();
            return;
        };

        match self.bus.fetch_log_page(request, log_id) {
            Ok(()) => self.log_fetch.page_requested(request),
            Err(e) => {
                warn!("log {} page request failed: {:?}", log_id, e);
                self.pending.remove(&request);
                self.log_fetch.abandon();
            }
        }
    }

    fn on_log_page(&mut self, request: RequestId, status: Status, bytes: &[u8]) {
        if !matches!(self.take(request), Some(Pending::LogPage { .. })) {
            return;
        }
        if !self.log_fetch.owns(request) {
            debug!("dropping page of a replaced log fetch");
            return;
        }

        let page = self.log_fetch.on_page(status, bytes);
        for frame in &page.frames {
            self.send(frame);
        }

        if page.step == Step::NextPage {
            self.request_log_page();
        }
    }

    fn forward_stream(&mut self, resource: ResourceId, bytes: &[u8]) {
        let Some(slot) = self.subscriptions.find_by_resource(resource) else {
            debug!("no subscription for resource {:?}", resource);
            return;
        };
        let reference = slot.client_reference;

        match Frames::without_offset(reference, bytes) {
            Ok(frames) => self.send_all(&frames),
            Err(e) => warn!("dropping notification for {}: {:?}", reference, e),
        }
    }

    fn forward_log_data(&mut self, resource: ResourceId, offset: u32, bytes: &[u8]) {
        let Some(slot) = self.subscriptions.find_by_resource(resource) else {
            debug!("no subscription for log resource {:?}", resource);
            return;
        };
        let reference = slot.client_reference;

        match Frames::with_offset(reference, offset, bytes) {
            Ok(frames) => self.send_all(&frames),
            Err(e) => warn!("dropping log data for {}: {:?}", reference, e),
        }
    }

    fn send_all(&mut self, frames: &Frames) {
        for frame in frames.iter() {
            self.send(frame);
        }
    }

    fn send(&mut self, frame: &[u8]) {
        let data = self.handles().data;
        if data == 0 {
            warn!("data characteristic unresolved, dropping frame");
            return;
        }

        if let Err(e) = self.gatt.notify(data, frame) {
            warn!("notification lost: {:?}", e);
        }
    }

    /// Allocate a request id for `pending`, or `None` when the map is full.
    /// A request that cannot be tracked must not be issued.
    fn track(&mut self, pending: Pending) -> Option<RequestId> {
        if self.pending.len() == self.pending.capacity() {
            return None;
        }

        loop {
            self.next_request = self.next_request.wrapping_add(1);
            let request = RequestId(self.next_request);
            if !self.pending.contains_key(&request) {
                self.pending.insert(request, pending).ok()?;
                return Some(request);
            }
        }
    }

    fn take(&mut self, request: RequestId) -> Option<Pending> {
        self.pending.remove(&request)
    }
}

// Table capacity and the pending map must agree
const _: () = assert!(MAX_PENDING >= MAX_SUBSCRIPTIONS + 2);

#[cfg(test)]
mod tests;
