//! Economies: connected components of the flag graph and the matching of
//! requests with supplies inside them.
//!
//! Economies are maintained incrementally. Building a road merges the
//! economies at its ends (the higher id is absorbed into the lower one);
//! removing a road splits off the part no longer reachable. After every
//! topology change [`Game::update_registrations`] moves requests, supplies
//! and warehouses to their new economy and fails transfers whose item lost
//! the connection to its destination.

use crate::bob::{Bob, State};
use crate::building::Building;
use crate::cmd_queue::Command;
use crate::error::EngineError;
use crate::game::Game;
use crate::object::{Body, Serial};
use crate::player::PlayerNumber;
use crate::tasks::TaskKind;
use crate::transport::{
    EconomyId, Flag, NextStep, Request, RequestId, RequestTarget, Road, RoadKind, Supply,
    SupplyId, SupplySource, Transfer, TransferId, WareInstance, FLAG_START,
};
use game_pathfinding::{AStar, Graph};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use wldata::{DescriptionIndex, WareWorker};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Economy {
    pub id: EconomyId,
    pub owner: PlayerNumber,
    pub kind: WareWorker,
    pub flags: BTreeSet<Serial>,
    pub warehouses: BTreeSet<Serial>,
    /// Bumped for every scheduled balance; older balance commands are stale.
    pub balance_timer: u32,
    pub balance_pending: bool,
}

impl Economy {
    pub fn new(id: EconomyId, owner: PlayerNumber, kind: WareWorker) -> Self {
        Self {
            id,
            owner,
            kind,
            flags: BTreeSet::new(),
            warehouses: BTreeSet::new(),
            balance_timer: 0,
            balance_pending: false,
        }
    }
}

/// Road kinds that connect an economy of the given kind.
fn connects(road: RoadKind, kind: WareWorker) -> bool {
    kind == WareWorker::Ware || road == RoadKind::Road
}

impl Game {
    pub fn economy(&self, id: EconomyId) -> Option<&Economy> {
        self.logistics.economies.get(&id)
    }

    fn create_economy(&mut self, owner: PlayerNumber, kind: WareWorker) -> EconomyId {
        let id = self.logistics.next_id();
        log::debug!("Player {}: new {:?} economy {}", owner, kind, id);
        self.logistics
            .economies
            .insert(id, Economy::new(id, owner, kind));
        id
    }

    /// The flag an object is connected through: a flag itself, a building's
    /// flag, a road's start flag, or the base flag of whatever holds a ware
    /// or worker.
    pub fn base_flag(&self, serial: Serial) -> Option<Serial> {
        match &self.objects.object(serial)?.body {
            Body::Flag(_) => Some(serial),
            Body::Building(b) => Some(b.flag),
            Body::Road(r) => Some(r.flags[FLAG_START]),
            Body::Ware(w) => self.base_flag(w.location?),
            Body::Bob(b) => self.base_flag(b.location?),
            Body::Battle(_) => None,
        }
    }

    pub fn economy_of(&self, serial: Serial, kind: WareWorker) -> Option<EconomyId> {
        let flag = self.base_flag(serial)?;
        self.objects.get::<Flag>(flag)?.economy(kind)
    }

    /// Flags an item must reach to be delivered to `dest`.
    pub(crate) fn target_flags(&self, dest: Serial) -> Vec<Serial> {
        match self.objects.object(dest).map(|o| &o.body) {
            Some(Body::Flag(_)) => vec![dest],
            Some(Body::Building(b)) => vec![b.flag],
            Some(Body::Road(r)) => r.flags.to_vec(),
            _ => Vec::new(),
        }
    }

    /// A freshly placed flag forms its own economies.
    pub(crate) fn add_flag_to_new_economies(&mut self, flag: Serial) -> Result<(), EngineError> {
        let owner = self
            .objects
            .owner(flag)
            .ok_or(EngineError::MissingObject(flag))?;
        for kind in WareWorker::ALL {
            let id = self.create_economy(owner, kind);
            if let Some(e) = self.logistics.economies.get_mut(&id) {
                e.flags.insert(flag);
            }
            self.objects
                .get_mut::<Flag>(flag)
                .ok_or(EngineError::MissingObject(flag))?
                .economy[kind.slot()] = Some(id);
        }
        Ok(())
    }

    /// A road joined two flags.
    pub(crate) fn connect_road(&mut self, road: Serial) -> Result<(), EngineError> {
        let r = self
            .objects
            .get::<Road>(road)
            .ok_or(EngineError::MissingObject(road))?;
        let (flags, road_kind) = (r.flags, r.kind);
        for kind in WareWorker::ALL {
            if !connects(road_kind, kind) {
                continue;
            }
            let a = self.economy_of(flags[0], kind);
            let b = self.economy_of(flags[1], kind);
            if let (Some(a), Some(b)) = (a, b) {
                if a != b {
                    self.merge_economies(a.min(b), a.max(b));
                }
            }
        }
        self.update_registrations()
    }

    fn merge_economies(&mut self, keep: EconomyId, absorb: EconomyId) {
        let Some(gone) = self.logistics.economies.remove(&absorb) else {
            return;
        };
        log::debug!("Merging economy {} into {}", absorb, keep);
        let slot = gone.kind.slot();
        for &flag in &gone.flags {
            if let Some(f) = self.objects.get_mut::<Flag>(flag) {
                f.economy[slot] = Some(keep);
            }
        }
        if let Some(e) = self.logistics.economies.get_mut(&keep) {
            e.flags.extend(gone.flags);
        }
    }

    /// Flags reachable from `start` for items of `kind`.
    fn connected_flags(&self, start: Serial, kind: WareWorker) -> BTreeSet<Serial> {
        let graph = self.flag_graph();
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(flag) = queue.pop_front() {
            for next in graph.neighbors(flag, &kind) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// A road between `flags` is gone: split off the far side if the ends
    /// are no longer connected.
    pub(crate) fn split_after_road_removal(
        &mut self,
        flags: [Serial; 2],
        road_kind: RoadKind,
    ) -> Result<(), EngineError> {
        for kind in WareWorker::ALL {
            if !connects(road_kind, kind) {
                continue;
            }
            let Some(old) = self.economy_of(flags[0], kind) else {
                continue;
            };
            if !self.objects.contains(flags[1]) {
                continue;
            }
            if self.connected_flags(flags[0], kind).contains(&flags[1]) {
                continue;
            }
            let owner = self.objects.owner(flags[1]).unwrap_or_default();
            let new = self.create_economy(owner, kind);
            log::debug!("Splitting economy {} off {}", new, old);
            let moved = self.connected_flags(flags[1], kind);
            for &flag in &moved {
                if let Some(f) = self.objects.get_mut::<Flag>(flag) {
                    f.economy[kind.slot()] = Some(new);
                }
            }
            if let Some(e) = self.logistics.economies.get_mut(&old) {
                e.flags.retain(|f| !moved.contains(f));
            }
            if let Some(e) = self.logistics.economies.get_mut(&new) {
                e.flags = moved;
            }
        }
        self.update_registrations()
    }

    /// A flag (with all its roads already gone) leaves its economies.
    pub(crate) fn remove_flag_from_economies(&mut self, flag: Serial) -> Result<(), EngineError> {
        let Some(f) = self.objects.get::<Flag>(flag) else {
            return Ok(());
        };
        for id in f.economy.into_iter().flatten() {
            let empty = match self.logistics.economies.get_mut(&id) {
                Some(e) => {
                    e.flags.remove(&flag);
                    e.flags.is_empty()
                }
                None => false,
            };
            if empty {
                log::debug!("Economy {} dissolved", id);
                self.logistics.economies.remove(&id);
            }
        }
        if let Some(f) = self.objects.get_mut::<Flag>(flag) {
            f.economy = [None, None];
        }
        self.update_registrations()
    }

    /// Re-derive the economy of every request, supply and warehouse from
    /// the current flag economies, then fail transfers that can no longer
    /// arrive.
    pub(crate) fn update_registrations(&mut self) -> Result<(), EngineError> {
        let requests: Vec<(RequestId, Serial, WareWorker)> = self
            .logistics
            .requests
            .iter()
            .map(|(&id, r)| (id, r.target.destination(), r.kind))
            .collect();
        for (id, dest, kind) in requests {
            let econ = self.economy_of(dest, kind);
            if let Some(r) = self.logistics.requests.get_mut(&id) {
                r.economy = econ;
            }
        }

        let supplies: Vec<(SupplyId, Serial, WareWorker)> = self
            .logistics
            .supplies
            .iter()
            .map(|(&id, s)| (id, s.source.object(), s.kind))
            .collect();
        for (id, source, kind) in supplies {
            let econ = self.economy_of(source, kind);
            if let Some(s) = self.logistics.supplies.get_mut(&id) {
                s.economy = econ;
            }
        }

        for e in self.logistics.economies.values_mut() {
            e.warehouses.clear();
        }
        for wh in self.objects.serials_of::<Building>() {
            let is_warehouse = self
                .objects
                .get::<Building>(wh)
                .is_some_and(|b| b.is_warehouse());
            if !is_warehouse {
                continue;
            }
            for kind in WareWorker::ALL {
                if let Some(id) = self.economy_of(wh, kind) {
                    if let Some(e) = self.logistics.economies.get_mut(&id) {
                        e.warehouses.insert(wh);
                    }
                }
            }
        }

        let broken: Vec<TransferId> = self
            .logistics
            .transfers
            .iter()
            .filter(|(_, t)| {
                let item = self.economy_of(t.item, t.kind);
                item.is_none() || item != self.economy_of(t.destination, t.kind)
            })
            .map(|(&id, _)| id)
            .collect();
        for id in broken {
            log::debug!("Transfer {} lost its connection", id);
            self.fail_transfer(id)?;
        }

        let all: Vec<EconomyId> = self.logistics.economies.keys().copied().collect();
        for id in all {
            self.schedule_balance(id);
        }
        Ok(())
    }

    pub(crate) fn create_request(
        &mut self,
        target: RequestTarget,
        kind: WareWorker,
        index: DescriptionIndex,
        count: u32,
    ) -> RequestId {
        let id = self.logistics.next_id();
        let economy = self.economy_of(target.destination(), kind);
        self.logistics.requests.insert(
            id,
            Request {
                target,
                kind,
                index,
                count,
                economy,
                transfers: Vec::new(),
                required_time: self.time,
            },
        );
        if let Some(e) = economy {
            self.schedule_balance(e);
        }
        id
    }

    /// Change the wanted amount; surplus transfers are cancelled, newest first.
    pub(crate) fn set_request_count(&mut self, id: RequestId, count: u32) -> Result<(), EngineError> {
        let Some(r) = self.logistics.requests.get_mut(&id) else {
            return Ok(());
        };
        r.count = count;
        let surplus: Vec<TransferId> = r.transfers.iter().skip(count as usize).copied().collect();
        let economy = r.economy;
        for t in surplus.into_iter().rev() {
            self.cancel_transfer(t)?;
        }
        if let Some(e) = economy {
            self.schedule_balance(e);
        }
        Ok(())
    }

    pub(crate) fn remove_request(&mut self, id: RequestId) -> Result<(), EngineError> {
        let Some(r) = self.logistics.requests.get(&id) else {
            return Ok(());
        };
        for t in r.transfers.clone() {
            self.cancel_transfer(t)?;
        }
        self.logistics.requests.remove(&id);
        Ok(())
    }

    pub(crate) fn add_supply(&mut self, source: SupplySource, kind: WareWorker) -> SupplyId {
        let id = self.logistics.next_id();
        let economy = self.economy_of(source.object(), kind);
        self.logistics.supplies.insert(
            id,
            Supply {
                source,
                kind,
                economy,
            },
        );
        if let Some(e) = economy {
            self.schedule_balance(e);
        }
        id
    }

    pub(crate) fn remove_supply(&mut self, id: SupplyId) {
        self.logistics.supplies.remove(&id);
    }

    /// Register a transfer of `item` to `destination`.
    pub(crate) fn start_transfer(
        &mut self,
        request: Option<RequestId>,
        item: Serial,
        kind: WareWorker,
        destination: Serial,
    ) -> TransferId {
        let id = self.logistics.next_id();
        self.logistics.transfers.insert(
            id,
            Transfer {
                request,
                item,
                kind,
                destination,
            },
        );
        if let Some(r) = request.and_then(|r| self.logistics.requests.get_mut(&r)) {
            r.transfers.push(id);
        }
        match kind {
            WareWorker::Ware => {
                if let Some(w) = self.objects.get_mut::<WareInstance>(item) {
                    w.transfer = Some(id);
                }
            }
            WareWorker::Worker => {
                if let Some(b) = self.objects.get_mut::<Bob>(item) {
                    b.transfer = Some(id);
                }
            }
        }
        log::trace!("Transfer {}: {} -> {}", id, item, destination);
        id
    }

    /// Unlink a transfer from its request and item without telling the item.
    fn drop_transfer(&mut self, id: TransferId) -> Option<Transfer> {
        let t = self.logistics.transfers.remove(&id)?;
        let mut economy = None;
        if let Some(r) = t.request.and_then(|r| self.logistics.requests.get_mut(&r)) {
            r.transfers.retain(|&x| x != id);
            economy = r.economy;
        }
        if let Some(e) = economy {
            self.schedule_balance(e);
        }
        match t.kind {
            WareWorker::Ware => {
                if let Some(w) = self.objects.get_mut::<WareInstance>(t.item) {
                    if w.transfer == Some(id) {
                        w.transfer = None;
                    }
                }
            }
            WareWorker::Worker => {
                if let Some(b) = self.objects.get_mut::<Bob>(t.item) {
                    if b.transfer == Some(id) {
                        b.transfer = None;
                    }
                }
            }
        }
        Some(t)
    }

    /// Let the item know it has nothing to do any more.
    fn release_item(&mut self, t: &Transfer) -> Result<(), EngineError> {
        match t.kind {
            WareWorker::Ware => self.ware_update(t.item),
            WareWorker::Worker => self.send_signal(t.item, "cancel"),
        }
    }

    /// The request side gave up on the transfer.
    pub(crate) fn cancel_transfer(&mut self, id: TransferId) -> Result<(), EngineError> {
        if let Some(t) = self.drop_transfer(id) {
            self.release_item(&t)?;
        }
        Ok(())
    }

    /// The transfer can no longer be completed; the request reopens.
    pub(crate) fn fail_transfer(&mut self, id: TransferId) -> Result<(), EngineError> {
        if let Some(t) = self.drop_transfer(id) {
            self.metrics.transfers_failed += 1;
            self.release_item(&t)?;
        }
        Ok(())
    }

    /// Bookkeeping-only failure, used by an item that handles the
    /// consequences itself.
    pub(crate) fn transfer_failed(&mut self, id: TransferId) {
        if self.drop_transfer(id).is_some() {
            self.metrics.transfers_failed += 1;
        }
    }

    /// The item reached its destination.
    pub(crate) fn transfer_finished(&mut self, id: TransferId) -> Result<(), EngineError> {
        let Some(t) = self.drop_transfer(id) else {
            return Ok(());
        };
        self.metrics.transfers_finished += 1;
        let Some(rid) = t.request else {
            return self.incorporate_item(t.destination, t.item, t.kind);
        };
        let Some(r) = self.logistics.requests.get_mut(&rid) else {
            // The request vanished while the item was arriving.
            return self.release_item(&t);
        };
        r.count = r.count.saturating_sub(1);
        let target = r.target;
        let done = r.count == 0 && r.transfers.is_empty();
        match target {
            RequestTarget::Building { building, slot } => {
                self.building_receive(building, slot, t.item, t.kind)?;
            }
            RequestTarget::Road(road) => {
                if done {
                    self.logistics.requests.remove(&rid);
                }
                self.road_receive_carrier(road, t.item)?;
            }
            RequestTarget::FlagJob { flag, job } => {
                if done {
                    self.logistics.requests.remove(&rid);
                }
                self.flag_job_receive(flag, job, t.item)?;
            }
        }
        Ok(())
    }

    /// Where an item under transfer `id` should go from `location`.
    pub fn transfer_next_step(&self, id: TransferId, location: Serial) -> Result<NextStep, EngineError> {
        let Some(t) = self.logistics.transfers.get(&id) else {
            return Ok(NextStep::Fail);
        };
        let dest = t.destination;
        if location == dest {
            return Ok(NextStep::Arrived);
        }
        if !self.objects.contains(dest) {
            return Ok(NextStep::Fail);
        }
        let here = self.economy_of(location, t.kind);
        if here.is_none() || here != self.economy_of(dest, t.kind) {
            return Ok(NextStep::Fail);
        }
        if self.objects.get::<Flag>(location).is_none() {
            // Buildings and roads are left through their base flag.
            return Ok(self.base_flag(location).map_or(NextStep::Fail, NextStep::Go));
        }
        let targets = self.target_flags(dest);
        if targets.contains(&location) {
            return Ok(NextStep::Go(dest));
        }
        match self.find_route_to_any(location, &targets, t.kind) {
            Some((route, _)) if route.len() >= 2 => Ok(NextStep::Go(route[1])),
            _ => Err(EngineError::InconsistentEconomy(format!(
                "no route from flag {} to {} inside economy {:?}",
                location, dest, here
            ))),
        }
    }

    pub(crate) fn schedule_balance(&mut self, economy: EconomyId) {
        let due = self.time + self.config.balance_delay_ms;
        let Some(e) = self.logistics.economies.get_mut(&economy) else {
            return;
        };
        if e.balance_pending {
            return;
        }
        e.balance_timer += 1;
        e.balance_pending = true;
        let timer = e.balance_timer;
        self.queue
            .enqueue(due, Command::EconomyBalance { economy, timer });
    }

    /// Match open requests with supplies, then send idle items to storage.
    #[tracing::instrument(skip_all, name = "economy_balance")]
    pub(crate) fn balance(&mut self, economy: EconomyId, timer: u32) -> Result<(), EngineError> {
        match self.logistics.economies.get_mut(&economy) {
            Some(e) if e.balance_timer == timer => e.balance_pending = false,
            _ => return Ok(()),
        }
        self.metrics.balances += 1;
        self.process_requests(economy)?;
        self.handle_active_supplies(economy)
    }

    fn process_requests(&mut self, economy: EconomyId) -> Result<(), EngineError> {
        for rid in self.logistics.open_requests(economy) {
            loop {
                let still_open = self
                    .logistics
                    .requests
                    .get(&rid)
                    .is_some_and(|r| r.open() > 0 && r.economy == Some(economy));
                if !still_open {
                    break;
                }
                let Some(supply) = self.find_best_supply(economy, rid) else {
                    log::trace!("Request {}: no supply in economy {}", rid, economy);
                    break;
                };
                self.launch_supply(supply, rid)?;
            }
        }
        Ok(())
    }

    /// Cheapest supply for a request; ties go to the older supply.
    fn find_best_supply(&self, economy: EconomyId, rid: RequestId) -> Option<SupplyId> {
        let r = self.logistics.requests.get(&rid)?;
        let graph = self.flag_graph();
        let mut costs: BTreeMap<Serial, u32> = BTreeMap::new();
        for flag in self.target_flags(r.target.destination()) {
            for (f, c) in AStar::distances(&graph, flag, &r.kind, None) {
                let e = costs.entry(f).or_insert(u32::MAX);
                *e = (*e).min(c);
            }
        }
        let mut best: Option<(u32, SupplyId)> = None;
        for sid in self.logistics.supplies_of(economy) {
            if !self.supply_provides(sid, r.kind, r.index) {
                continue;
            }
            let Some(source) = self.logistics.supplies.get(&sid).map(|s| s.source) else {
                continue;
            };
            // An item lying at the requesting building is of no use to it.
            if source.object() == r.target.destination() {
                continue;
            }
            let Some(&cost) = self.base_flag(source.object()).and_then(|f| costs.get(&f)) else {
                continue;
            };
            if best.map_or(true, |(c, _)| cost < c) {
                best = Some((cost, sid));
            }
        }
        best.map(|(_, sid)| sid)
    }

    fn supply_provides(&self, sid: SupplyId, kind: WareWorker, index: DescriptionIndex) -> bool {
        let Some(s) = self.logistics.supplies.get(&sid) else {
            return false;
        };
        if s.kind != kind {
            return false;
        }
        let idle = |transfer: Option<TransferId>| {
            transfer.map_or(true, |t| {
                self.logistics
                    .transfers
                    .get(&t)
                    .map_or(true, |t| t.request.is_none())
            })
        };
        match s.source {
            SupplySource::Warehouse(wh) => self.warehouse_can_supply(wh, kind, index),
            SupplySource::IdleWare(w) => self
                .objects
                .get::<WareInstance>(w)
                .is_some_and(|w| w.descr == index && idle(w.transfer)),
            SupplySource::IdleWorker(b) => self
                .objects
                .get::<Bob>(b)
                .is_some_and(|b| b.descr == index && idle(b.transfer)),
        }
    }

    fn launch_supply(&mut self, sid: SupplyId, rid: RequestId) -> Result<(), EngineError> {
        let Some(source) = self.logistics.supplies.get(&sid).map(|s| s.source) else {
            return Ok(());
        };
        let Some((kind, index, dest)) = self
            .logistics
            .requests
            .get(&rid)
            .map(|r| (r.kind, r.index, r.target.destination()))
        else {
            return Ok(());
        };
        match source {
            SupplySource::Warehouse(wh) => match kind {
                WareWorker::Ware => {
                    let ware = self.launch_ware(wh, index)?;
                    self.start_transfer(Some(rid), ware, kind, dest);
                    self.ware_update(ware)
                }
                WareWorker::Worker => {
                    let worker = self.launch_worker(wh, index)?;
                    self.start_transfer(Some(rid), worker, kind, dest);
                    self.push_task(worker, State::new(TaskKind::Transfer), 0)
                }
            },
            SupplySource::IdleWare(ware) => {
                let storage = self.objects.get::<WareInstance>(ware).and_then(|w| w.transfer);
                if let Some(old) = storage {
                    self.drop_transfer(old);
                }
                self.start_transfer(Some(rid), ware, kind, dest);
                self.ware_update(ware)
            }
            SupplySource::IdleWorker(worker) => {
                let storage = self.bob(worker)?.transfer;
                if let Some(old) = storage {
                    self.drop_transfer(old);
                }
                self.start_transfer(Some(rid), worker, kind, dest);
                self.send_signal(worker, "transfer")
            }
        }
    }

    /// Send idle wares and workers to the nearest warehouse.
    fn handle_active_supplies(&mut self, economy: EconomyId) -> Result<(), EngineError> {
        for sid in self.logistics.supplies_of(economy) {
            let Some(s) = self.logistics.supplies.get(&sid) else {
                continue;
            };
            let (item, kind) = match s.source {
                SupplySource::Warehouse(_) => continue,
                SupplySource::IdleWare(w) => (w, WareWorker::Ware),
                SupplySource::IdleWorker(b) => (b, WareWorker::Worker),
            };
            let busy = match kind {
                WareWorker::Ware => self
                    .objects
                    .get::<WareInstance>(item)
                    .map_or(true, |w| w.transfer.is_some()),
                WareWorker::Worker => self
                    .objects
                    .get::<Bob>(item)
                    .map_or(true, |b| b.transfer.is_some()),
            };
            if busy {
                continue;
            }
            let Some(wh) = self.find_nearest_warehouse(item, kind, economy) else {
                continue;
            };
            self.start_transfer(None, item, kind, wh);
            match kind {
                WareWorker::Ware => self.ware_update(item)?,
                WareWorker::Worker => self.send_signal(item, "transfer")?,
            }
        }
        Ok(())
    }

    pub(crate) fn find_nearest_warehouse(
        &self,
        item: Serial,
        kind: WareWorker,
        economy: EconomyId,
    ) -> Option<Serial> {
        let from = self.base_flag(item)?;
        let costs = self.route_costs_from(from, kind);
        let e = self.logistics.economies.get(&economy)?;
        let mut best: Option<(u32, Serial)> = None;
        for &wh in &e.warehouses {
            let Some(flag) = self.objects.get::<Building>(wh).map(|b| b.flag) else {
                continue;
            };
            let Some(&cost) = costs.get(&flag) else {
                continue;
            };
            if best.map_or(true, |(c, _)| cost < c) {
                best = Some((cost, wh));
            }
        }
        best.map(|(_, wh)| wh)
    }
}

#[cfg(test)]
#[path = "economy_tests.rs"]
mod economy_tests;
