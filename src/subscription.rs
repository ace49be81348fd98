use heapless::Vec;

use crate::bus::ResourceId;

/// Concurrent subscriptions one peer can hold.
pub const MAX_SUBSCRIPTIONS: usize = 8;

/// One client subscription to an internal resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Subscription {
    /// Chosen by the client, never zero while the slot is occupied
    pub client_reference: u8,
    pub resource: ResourceId,
    pub sub_started: bool,
    pub sub_completed: bool,
}

impl Subscription {
    pub const FREE: Self = Self {
        client_reference: 0,
        resource: ResourceId::INVALID,
        sub_started: false,
        sub_completed: false,
    };

    pub fn is_free(&self) -> bool {
        self.client_reference == 0 && !self.resource.is_valid()
    }

    /// Occupy the slot for a subscribe request that is about to be issued.
    pub fn start(&mut self, client_reference: u8, resource: ResourceId) {
        *self = Self {
            client_reference,
            resource,
            sub_started: true,
            sub_completed: false,
        };
    }

    pub fn release(&mut self) {
        *self = Self::FREE;
    }
}

/// Fixed capacity table mapping client references to bus resources.
#[derive(Debug)]
pub struct SubscriptionTable {
    slots: [Subscription; MAX_SUBSCRIPTIONS],
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            slots: [Subscription::FREE; MAX_SUBSCRIPTIONS],
        }
    }

    pub fn find_by_resource(&mut self, resource: ResourceId) -> Option<&mut Subscription> {
        if !resource.is_valid() {
            return None;
        }
        self.slots.iter_mut().find(|s| s.resource == resource)
    }

    pub fn find_by_reference(&mut self, client_reference: u8) -> Option<&mut Subscription> {
        if client_reference == 0 {
            return None;
        }
        self.slots
            .iter_mut()
            .find(|s| s.client_reference == client_reference)
    }

    /// First free slot, or `None` when the table is full.
    pub fn allocate(&mut self) -> Option<&mut Subscription> {
        self.slots.iter_mut().find(|s| s.is_free())
    }

    /// Release every occupied slot, returning the resources they held.
    pub fn clear(&mut self) -> Vec<ResourceId, MAX_SUBSCRIPTIONS> {
        let mut released = Vec::new();
        for slot in self.slots.iter_mut().filter(|s| !s.is_free()) {
            if slot.resource.is_valid() {
                // At most MAX_SUBSCRIPTIONS slots exist
                let _ = released.push(slot.resource);
            }
            slot.release();
        }
        released
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.slots.iter().filter(|s| !s.is_free())
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}
