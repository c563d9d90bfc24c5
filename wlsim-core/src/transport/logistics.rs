//! Requests, supplies and transfers, stored in id-keyed arenas.
//!
//! Ids are allocated from one shared counter and never reused, so a stale id
//! simply fails to resolve.

use crate::object::{Serial, Time};
use crate::transport::{Economy, EconomyId, RequestId, SupplyId, TransferId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wldata::{DescriptionIndex, WareWorker};

/// Who gets the requested item when it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestTarget {
    /// Input queue `slot` of a building (or its soldier slots).
    Building { building: Serial, slot: usize },
    /// A road asking for its carrier.
    Road(Serial),
    /// Worker for a flag job.
    FlagJob { flag: Serial, job: u32 },
}

impl RequestTarget {
    /// Object the transferred item is delivered to.
    pub fn destination(&self) -> Serial {
        match *self {
            RequestTarget::Building { building, .. } => building,
            RequestTarget::Road(road) => road,
            RequestTarget::FlagJob { flag, .. } => flag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub target: RequestTarget,
    pub kind: WareWorker,
    pub index: DescriptionIndex,
    /// Items still wanted, including those already under way.
    pub count: u32,
    pub economy: Option<EconomyId>,
    pub transfers: Vec<TransferId>,
    pub required_time: Time,
}

impl Request {
    /// Items that nobody is bringing yet.
    pub fn open(&self) -> u32 {
        self.count.saturating_sub(self.transfers.len() as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupplySource {
    /// The stock of a warehouse (one supply per item kind and warehouse).
    Warehouse(Serial),
    /// A ware lying around without a request.
    IdleWare(Serial),
    /// A worker looking for a warehouse.
    IdleWorker(Serial),
}

impl SupplySource {
    pub fn object(&self) -> Serial {
        match *self {
            SupplySource::Warehouse(s) | SupplySource::IdleWare(s) | SupplySource::IdleWorker(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supply {
    pub source: SupplySource,
    pub kind: WareWorker,
    pub economy: Option<EconomyId>,
}

/// An item under way. Transfers without a request move idle items into
/// storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub request: Option<RequestId>,
    pub item: Serial,
    pub kind: WareWorker,
    pub destination: Serial,
}

/// Result of asking a transfer where to go from a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// The item is at its destination.
    Arrived,
    /// The destination can no longer be reached.
    Fail,
    /// Move to this flag, road or building next.
    Go(Serial),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logistics {
    pub economies: BTreeMap<EconomyId, Economy>,
    pub requests: BTreeMap<RequestId, Request>,
    pub supplies: BTreeMap<SupplyId, Supply>,
    pub transfers: BTreeMap<TransferId, Transfer>,
    next_id: u32,
}

impl Logistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn transfer(&self, id: TransferId) -> Option<&Transfer> {
        self.transfers.get(&id)
    }

    /// Open requests of an economy, by id.
    pub fn open_requests(&self, economy: EconomyId) -> Vec<RequestId> {
        self.requests
            .iter()
            .filter(|(_, r)| r.economy == Some(economy) && r.open() > 0)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Supplies of an economy, by id.
    pub fn supplies_of(&self, economy: EconomyId) -> Vec<SupplyId> {
        self.supplies
            .iter()
            .filter(|(_, s)| s.economy == Some(economy))
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn transfers_of_request(&self, request: RequestId) -> Vec<TransferId> {
        self.requests
            .get(&request)
            .map(|r| r.transfers.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_counts_transfers_under_way() {
        let r = Request {
            target: RequestTarget::Road(Serial(3)),
            kind: WareWorker::Worker,
            index: 0,
            count: 2,
            economy: Some(1),
            transfers: vec![7],
            required_time: 0,
        };
        assert_eq!(r.open(), 1);
        assert_eq!(r.target.destination(), Serial(3));
    }

    #[test]
    fn test_ids_are_unique_across_arenas() {
        let mut l = Logistics::new();
        let a = l.next_id();
        let b = l.next_id();
        assert_ne!(a, b);
    }
}
