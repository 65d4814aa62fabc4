// 7.0: everything the ledger tells the outside world goes through here. balance changes,
// loss socialization, movements. subscribers get owned copies, never references into state.

use crate::account::Account;
use crate::transfer::LedgerMovement;
use crate::types::{Amount, AssetId, MarketId, PartyId, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub trace_id: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, trace_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            trace_id: trace_id.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // Account events
    AccountUpdated(AccountEvent),
    AccountRemoved(AccountEvent),
    AssetEnabled(AssetEnabledEvent),

    // Settlement events
    LossSocialization(LossSocializationEvent),
    LedgerMovements(LedgerMovementsEvent),
}

/// Carries a full copy of the account as it was right after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEvent {
    pub account: Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEnabledEvent {
    pub asset: AssetId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossSocializationEvent {
    pub market: MarketId,
    pub party: PartyId,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerMovementsEvent {
    pub movements: Vec<LedgerMovement>,
}

/// Where engine events go. fire and forget: publishing cannot fail the ledger.
pub trait EventSink {
    fn publish(&mut self, event: Event);

    fn publish_batch(&mut self, events: Vec<Event>) {
        for event in events {
            self.publish(event);
        }
    }
}

#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    batches: usize,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of `publish_batch` calls seen so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.batches = 0;
    }

    pub fn loss_socializations(&self) -> Vec<&LossSocializationEvent> {
        self.events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::LossSocialization(evt) => Some(evt),
                _ => None,
            })
            .collect()
    }

    pub fn account_updates(&self) -> Vec<&Account> {
        self.events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::AccountUpdated(evt) => Some(&evt.account),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventCollector {
    fn publish(&mut self, event: Event) {
        self.events.push(event);
    }

    fn publish_batch(&mut self, events: Vec<Event>) {
        self.batches += 1;
        self.events.extend(events);
    }
}

/// Drops everything. for callers that only care about balances.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&mut self, _event: Event) {}
}
