//! In-memory collaborators that record every call. Used by the host binary
//! and by the unit tests.

use std::collections::HashMap;
use std::string::String;
use std::vec::Vec;

use crate::bus::{Board, BusError, GattServer, RequestId, ResourceBus, ResourceId, TimerId};
use crate::gatt::ServiceDefinition;
use crate::power::WakeupState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Subscribe(RequestId, ResourceId),
    Unsubscribe(ResourceId),
    FetchLogPage(RequestId, u32),
    SubscribePeers,
    SubscribeRoutes,
}

/// Resource bus with a fixed path registry.
#[derive(Debug, Default)]
pub struct SimBus {
    pub calls: Vec<BusCall>,
    resources: HashMap<String, ResourceId>,
    /// Makes every subscribe call fail synchronously
    pub reject_subscribe: bool,
}

impl SimBus {
    pub fn with_resources(paths: &[(&str, u32)]) -> Self {
        Self {
            resources: paths
                .iter()
                .map(|&(path, id)| (path.to_string(), ResourceId(id)))
                .collect(),
            ..Self::default()
        }
    }

    pub fn register(&mut self, path: &str, resource: ResourceId) {
        self.resources.insert(path.to_string(), resource);
    }

    /// Request id of the most recent subscribe call.
    pub fn last_subscribe(&self) -> Option<RequestId> {
        self.calls.iter().rev().find_map(|call| match call {
            BusCall::Subscribe(request, _) => Some(*request),
            _ => None,
        })
    }

    /// Request id of the most recent log page request.
    pub fn last_page_request(&self) -> Option<RequestId> {
        self.calls.iter().rev().find_map(|call| match call {
            BusCall::FetchLogPage(request, _) => Some(*request),
            _ => None,
        })
    }

    pub fn count(&self, call: &BusCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl ResourceBus for SimBus {
    fn resolve(&mut self, path: &str) -> Result<ResourceId, BusError> {
        self.resources.get(path).copied().ok_or(BusError::NotFound)
    }

    fn subscribe(&mut self, request: RequestId, resource: ResourceId) -> Result<(), BusError> {
        if self.reject_subscribe {
            return Err(BusError::Unavailable);
        }
        self.calls.push(BusCall::Subscribe(request, resource));
        Ok(())
    }

    fn unsubscribe(&mut self, resource: ResourceId) {
        self.calls.push(BusCall::Unsubscribe(resource));
    }

    fn fetch_log_page(&mut self, request: RequestId, log_id: u32) -> Result<(), BusError> {
        self.calls.push(BusCall::FetchLogPage(request, log_id));
        Ok(())
    }

    fn subscribe_peers(&mut self) {
        self.calls.push(BusCall::SubscribePeers);
    }

    fn subscribe_routes(&mut self) {
        self.calls.push(BusCall::SubscribeRoutes);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCall {
    CreateService(RequestId, ServiceDefinition),
    DescribeService(RequestId, u16),
    SubscribeCharacteristic(u16, u16),
    UnsubscribeCharacteristic(u16, u16),
    Notify(u16, Vec<u8>),
}

#[derive(Debug, Default)]
pub struct SimGatt {
    pub calls: Vec<GattCall>,
    /// Makes every notification fail
    pub drop_notifications: bool,
}

impl SimGatt {
    /// Values notified so far, in order.
    pub fn notifications(&self) -> Vec<&[u8]> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                GattCall::Notify(_, value) => Some(value.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn last_request(&self) -> Option<RequestId> {
        self.calls.iter().rev().find_map(|call| match call {
            GattCall::CreateService(request, _) | GattCall::DescribeService(request, _) => {
                Some(*request)
            }
            _ => None,
        })
    }
}

impl GattServer for SimGatt {
    fn create_service(
        &mut self,
        request: RequestId,
        service: &ServiceDefinition,
    ) -> Result<(), BusError> {
        self.calls.push(GattCall::CreateService(request, *service));
        Ok(())
    }

    fn describe_service(&mut self, request: RequestId, service: u16) -> Result<(), BusError> {
        self.calls.push(GattCall::DescribeService(request, service));
        Ok(())
    }

    fn subscribe_characteristic(&mut self, service: u16, characteristic: u16) {
        self.calls
            .push(GattCall::SubscribeCharacteristic(service, characteristic));
    }

    fn unsubscribe_characteristic(&mut self, service: u16, characteristic: u16) {
        self.calls
            .push(GattCall::UnsubscribeCharacteristic(service, characteristic));
    }

    fn notify(&mut self, characteristic: u16, value: &[u8]) -> Result<(), BusError> {
        if self.drop_notifications {
            return Err(BusError::Unavailable);
        }
        self.calls.push(GattCall::Notify(characteristic, value.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardCall {
    StartTimer(u32),
    StopTimer(TimerId),
    Indicate,
    ArmWakeup(WakeupState),
    SetLed(bool),
    PowerOff,
}

/// Board with numbered timers; only one is expected to run at a time.
#[derive(Debug, Default)]
pub struct SimBoard {
    pub calls: Vec<BoardCall>,
    next_timer: u16,
    active: Option<TimerId>,
}

impl SimBoard {
    pub fn active_timer(&self) -> Option<TimerId> {
        self.active
    }

    pub fn count(&self, call: &BoardCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl Board for SimBoard {
    fn start_timer(&mut self, period_ms: u32) -> TimerId {
        self.calls.push(BoardCall::StartTimer(period_ms));
        self.next_timer += 1;
        let timer = TimerId(self.next_timer);
        self.active = Some(timer);
        timer
    }

    fn stop_timer(&mut self, timer: TimerId) {
        self.calls.push(BoardCall::StopTimer(timer));
        if self.active == Some(timer) {
            self.active = None;
        }
    }

    fn indicate(&mut self) {
        self.calls.push(BoardCall::Indicate);
    }

    fn arm_wakeup(&mut self, wakeup: WakeupState) {
        self.calls.push(BoardCall::ArmWakeup(wakeup));
    }

    fn set_led(&mut self, on: bool) {
        self.calls.push(BoardCall::SetLed(on));
    }

    fn power_off(&mut self) {
        self.calls.push(BoardCall::PowerOff);
    }
}
