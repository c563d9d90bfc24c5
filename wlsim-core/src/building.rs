//! # Buildings
//!
//! Buildings are the request targets and supply sources of an economy.
//!
//! | Kind | Requests | Supplies |
//! |------|----------|----------|
//! | Warehouse | - | stock wares and workers |
//! | ProductionSite | one per input queue | produced wares (via the flag) |
//! | MilitarySite | soldiers up to capacity | - |
//!
//! A building sits north-west of its base flag. Warehouses and production
//! sites keep a helper inside that fetches arriving wares from the flag and
//! carries outgoing wares out to it.

use crate::bob::Bob;
use crate::cmd_queue::Command;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Map};
use crate::notification::Note;
use crate::object::{Attackable, Body, OPtr, Serial, SoldierControl, Time};
use crate::player::PlayerNumber;
use crate::tasks::soldier::{start_task_attack, start_task_defense};
use crate::tasks::TaskKind;
use crate::transport::{Flag, RequestId, RequestTarget, SupplyId, SupplySource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use wldata::{BuildingKind, CostItem, DescriptionIndex, WareWorker, WorkerKind};

/// Heal and production retry tick.
const BUILDING_TICK_MS: Time = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputQueue {
    pub ware: DescriptionIndex,
    pub max_fill: u32,
    pub filled: u32,
    pub request: Option<RequestId>,
}

impl InputQueue {
    /// Wares still wanted, counting those under way.
    pub fn missing(&self) -> u32 {
        self.max_fill.saturating_sub(self.filled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingState {
    Warehouse {
        wares: BTreeMap<DescriptionIndex, u32>,
        workers: BTreeMap<DescriptionIndex, u32>,
        /// Supply registration per [`WareWorker`] slot.
        supplies: [Option<SupplyId>; 2],
    },
    ProductionSite {
        inputs: Vec<InputQueue>,
        outputs: Vec<DescriptionIndex>,
        work_ms: u32,
        working_since: Option<Time>,
    },
    MilitarySite {
        /// All soldiers belonging to the site, inside or out.
        soldiers: Vec<Serial>,
        /// Soldiers currently out attacking or defending.
        outside: Vec<Serial>,
        capacity: u32,
        request: Option<RequestId>,
        conquers: u32,
        heal_per_second: u32,
        conquered: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub descr: DescriptionIndex,
    pub position: Coords,
    pub flag: Serial,
    pub vision_range: u32,
    pub state: BuildingState,
    /// Wares waiting to be carried out to the flag.
    pub outbox: VecDeque<Serial>,
    pub helper: OPtr<Bob>,
    pub actid: u32,
}

impl Building {
    pub fn is_warehouse(&self) -> bool {
        matches!(self.state, BuildingState::Warehouse { .. })
    }

    pub fn is_military(&self) -> bool {
        matches!(self.state, BuildingState::MilitarySite { .. })
    }

    /// Stationed soldiers not out on a mission.
    pub fn soldiers_inside(&self) -> Vec<Serial> {
        match &self.state {
            BuildingState::MilitarySite {
                soldiers, outside, ..
            } => soldiers
                .iter()
                .filter(|s| !outside.contains(s))
                .copied()
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn stock(&self, kind: WareWorker, index: DescriptionIndex) -> u32 {
        match &self.state {
            BuildingState::Warehouse { wares, workers, .. } => {
                let stock = match kind {
                    WareWorker::Ware => wares,
                    WareWorker::Worker => workers,
                };
                stock.get(&index).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }
}

impl Attackable for Building {
    fn can_be_attacked(&self) -> bool {
        self.is_military()
    }

    fn attack_target_position(&self, map: &Map) -> Coords {
        map.brn(self.position)
    }
}

impl SoldierControl for Building {
    fn stationed_soldiers(&self) -> &[Serial] {
        match &self.state {
            BuildingState::MilitarySite { soldiers, .. } => soldiers,
            _ => &[],
        }
    }

    fn soldier_capacity(&self) -> u32 {
        match self.state {
            BuildingState::MilitarySite { capacity, .. } => capacity,
            _ => 0,
        }
    }
}

impl Game {
    fn building_mut(&mut self, building: Serial) -> Result<&mut Building, EngineError> {
        self.objects
            .get_mut::<Building>(building)
            .ok_or(EngineError::MissingObject(building))
    }

    /// Place a building north-west of `coords`' flag position. An existing
    /// flag of the owner there is reused.
    pub(crate) fn place_building(
        &mut self,
        owner: PlayerNumber,
        coords: Coords,
        descr: DescriptionIndex,
    ) -> Result<Serial, EngineError> {
        let coords = self.map.normalize(coords);
        let building_descr = self
            .descriptions
            .building(descr)
            .cloned()
            .ok_or_else(|| EngineError::InconsistentEconomy(format!("unknown building {}", descr)))?;
        let flag_pos = self.map.brn(coords);
        let existing = self
            .map
            .field(flag_pos)
            .immovable
            .filter(|&f| self.objects.get::<Flag>(f).is_some() && self.objects.owner(f) == Some(owner));
        let flag = match existing {
            Some(f) => f,
            None => self.place_flag(owner, flag_pos)?,
        };

        let state = match &building_descr.kind {
            BuildingKind::Warehouse => BuildingState::Warehouse {
                wares: BTreeMap::new(),
                workers: BTreeMap::new(),
                supplies: [None, None],
            },
            BuildingKind::ProductionSite {
                inputs,
                outputs,
                work_ms,
            } => BuildingState::ProductionSite {
                inputs: inputs
                    .iter()
                    .map(|i| InputQueue {
                        ware: i.ware,
                        max_fill: i.max_fill,
                        filled: 0,
                        request: None,
                    })
                    .collect(),
                outputs: outputs.clone(),
                work_ms: *work_ms,
                working_since: None,
            },
            BuildingKind::MilitarySite {
                max_soldiers,
                conquers,
                heal_per_second,
            } => BuildingState::MilitarySite {
                soldiers: Vec::new(),
                outside: Vec::new(),
                capacity: *max_soldiers,
                request: None,
                conquers: *conquers,
                heal_per_second: *heal_per_second,
                conquered: false,
            },
        };
        let building = self.objects.insert(
            owner,
            Body::Building(Building {
                descr,
                position: coords,
                flag,
                vision_range: building_descr.vision_range,
                state,
                outbox: VecDeque::new(),
                helper: OPtr::null(),
                actid: 0,
            }),
        );
        self.map.field_mut(coords).immovable = Some(building);
        self.flag_mut(flag)?.building = Some(building);
        if let Some(p) = self.players.get_mut(&owner) {
            p.see_area(&self.map, coords, building_descr.vision_range);
        }
        log::debug!(
            "Player {}: {} {} at {}",
            owner,
            building_descr.name,
            building,
            coords
        );

        match &building_descr.kind {
            BuildingKind::Warehouse => {
                let mut supplies = [None, None];
                for kind in WareWorker::ALL {
                    supplies[kind.slot()] = Some(self.add_supply(SupplySource::Warehouse(building), kind));
                }
                if let BuildingState::Warehouse { supplies: s, .. } = &mut self.building_mut(building)?.state {
                    *s = supplies;
                }
            }
            BuildingKind::ProductionSite { inputs, .. } => {
                for (slot, input) in inputs.iter().enumerate() {
                    let rid = self.create_request(
                        RequestTarget::Building { building, slot },
                        WareWorker::Ware,
                        input.ware,
                        input.max_fill,
                    );
                    if let BuildingState::ProductionSite { inputs, .. } = &mut self.building_mut(building)?.state {
                        inputs[slot].request = Some(rid);
                    }
                }
            }
            BuildingKind::MilitarySite { max_soldiers, .. } => {
                if let Some(soldier) = self.descriptions.worker_of_kind(WorkerKind::Soldier) {
                    let rid = self.create_request(
                        RequestTarget::Building { building, slot: 0 },
                        WareWorker::Worker,
                        soldier,
                        *max_soldiers,
                    );
                    if let BuildingState::MilitarySite { request, .. } = &mut self.building_mut(building)?.state {
                        *request = Some(rid);
                    }
                }
            }
        }

        if !matches!(building_descr.kind, BuildingKind::MilitarySite { .. }) {
            let carrier = self.descriptions.carrier();
            let helper = self.create_bob(owner, carrier, coords)?;
            self.bob_mut(helper)?.location = Some(building);
            self.building_mut(building)?.helper = OPtr::new(helper);
            self.schedule_act(helper, 0)?;
        }
        self.update_registrations()?;
        Ok(building)
    }

    /// Tear down a building. Its workers lose their location; wares inside
    /// are lost.
    pub(crate) fn destroy_building(&mut self, building: Serial) -> Result<(), EngineError> {
        let Some(b) = self.objects.get::<Building>(building) else {
            return Ok(());
        };
        let (position, flag, vision, owner) = (
            b.position,
            b.flag,
            b.vision_range,
            self.objects.owner(building).unwrap_or_default(),
        );
        let outbox: Vec<Serial> = b.outbox.iter().copied().collect();
        let mut requests = Vec::new();
        let mut supplies = Vec::new();
        let mut conquered = None;
        match &b.state {
            BuildingState::Warehouse { supplies: s, .. } => supplies.extend(s.iter().flatten().copied()),
            BuildingState::ProductionSite { inputs, .. } => {
                requests.extend(inputs.iter().filter_map(|i| i.request))
            }
            BuildingState::MilitarySite {
                request,
                conquers,
                conquered: c,
                ..
            } => {
                requests.extend(*request);
                if *c {
                    conquered = Some(*conquers);
                }
            }
        }
        log::debug!("Removing building {} at {}", building, position);

        for rid in requests {
            self.remove_request(rid)?;
        }
        for sid in supplies {
            self.remove_supply(sid);
        }
        for ware in outbox {
            self.destroy_ware(ware)?;
        }
        if let Some(radius) = conquered {
            self.unconquer_area(owner, position, radius)?;
        }
        if let Some(p) = self.players.get_mut(&owner) {
            p.unsee_area(&self.map, position, vision);
        }
        if let Some(f) = self.objects.get_mut::<Flag>(flag) {
            if f.building == Some(building) {
                f.building = None;
            }
        }
        if self.map.field(position).immovable == Some(building) {
            self.map.field_mut(position).immovable = None;
        }
        self.objects.remove(building);
        self.orphan_bobs_of(building)?;
        self.update_registrations()
    }

    /// A bob standing inside its location building without a task.
    pub(crate) fn worker_inside_building(&mut self, worker: Serial, building: Serial) -> Result<(), EngineError> {
        let Some(b) = self.objects.get::<Building>(building) else {
            return crate::tasks::worker::start_task_gowarehouse(self, worker);
        };
        let stationed = b.stationed_soldiers().contains(&worker);
        if b.helper.is(worker) || stationed {
            return self.push_task(worker, crate::bob::State::new(TaskKind::BuildingWork), 0);
        }
        if b.is_warehouse() {
            return self.incorporate_item(building, worker, WareWorker::Worker);
        }
        crate::tasks::worker::start_task_gowarehouse(self, worker)
    }

    fn wake_helper(&mut self, building: Serial, signal: &str) -> Result<(), EngineError> {
        let Some(helper) = self
            .objects
            .get::<Building>(building)
            .and_then(|b| b.helper.serial())
        else {
            return Ok(());
        };
        let idle = self
            .objects
            .get::<Bob>(helper)
            .is_some_and(|b| b.top_task() == Some(TaskKind::BuildingWork) && !b.in_act);
        if idle {
            self.send_signal(helper, signal)?;
        }
        Ok(())
    }

    /// A ware at the base flag wants into the building.
    pub(crate) fn building_fetch_from_flag(&mut self, building: Serial) -> Result<(), EngineError> {
        self.wake_helper(building, "fetch")
    }

    pub(crate) fn building_take_outgoing(&mut self, building: Serial) -> Option<Serial> {
        self.objects
            .get_mut::<Building>(building)?
            .outbox
            .pop_front()
    }

    /// A ware ended up inside without a transfer that wants it here.
    pub(crate) fn building_keep_ware(&mut self, building: Serial, ware: Serial) -> Result<(), EngineError> {
        if self
            .objects
            .get::<Building>(building)
            .is_some_and(|b| b.is_warehouse())
        {
            return self.incorporate_item(building, ware, WareWorker::Ware);
        }
        self.building_mut(building)?.outbox.push_back(ware);
        self.wake_helper(building, "wakeup")
    }

    /// Store an item in a warehouse.
    pub(crate) fn incorporate_item(
        &mut self,
        warehouse: Serial,
        item: Serial,
        kind: WareWorker,
    ) -> Result<(), EngineError> {
        let index = match kind {
            WareWorker::Ware => self.objects.get::<crate::transport::WareInstance>(item).map(|w| w.descr),
            WareWorker::Worker => self.objects.get::<Bob>(item).map(|b| b.descr),
        }
        .ok_or(EngineError::MissingObject(item))?;
        let b = self.building_mut(warehouse)?;
        let BuildingState::Warehouse { wares, workers, .. } = &mut b.state else {
            return Err(EngineError::InconsistentEconomy(format!(
                "{:?} {} delivered into non-warehouse {}",
                kind, item, warehouse
            )));
        };
        let stock = match kind {
            WareWorker::Ware => wares,
            WareWorker::Worker => workers,
        };
        *stock.entry(index).or_insert(0) += 1;
        log::trace!("Warehouse {}: stored {:?} {} ({})", warehouse, kind, item, index);
        match kind {
            WareWorker::Ware => self.destroy_ware(item)?,
            WareWorker::Worker => {
                if let Some(s) = self.bob_mut(item)?.supply.take() {
                    self.remove_supply(s);
                }
                self.schedule_destroy(item);
            }
        }
        if let Some(e) = self.economy_of(warehouse, kind) {
            self.schedule_balance(e);
        }
        Ok(())
    }

    /// Add stock to a warehouse, e.g. the starting goods of a headquarters.
    pub fn warehouse_insert(
        &mut self,
        warehouse: Serial,
        kind: WareWorker,
        index: DescriptionIndex,
        count: u32,
    ) -> Result<(), EngineError> {
        let b = self.building_mut(warehouse)?;
        if let BuildingState::Warehouse { wares, workers, .. } = &mut b.state {
            let stock = match kind {
                WareWorker::Ware => wares,
                WareWorker::Worker => workers,
            };
            *stock.entry(index).or_insert(0) += count;
        }
        if let Some(e) = self.economy_of(warehouse, kind) {
            self.schedule_balance(e);
        }
        Ok(())
    }

    pub(crate) fn warehouse_can_supply(&self, warehouse: Serial, kind: WareWorker, index: DescriptionIndex) -> bool {
        let Some(b) = self.objects.get::<Building>(warehouse) else {
            return false;
        };
        if b.stock(kind, index) > 0 {
            return true;
        }
        kind == WareWorker::Worker && self.can_create_worker(b, index)
    }

    /// Whether the warehouse can assemble a worker from its build cost.
    fn can_create_worker(&self, warehouse: &Building, index: DescriptionIndex) -> bool {
        let Some(descr) = self.descriptions.worker(index) else {
            return false;
        };
        if descr.is_buildable_from_nothing() {
            return true;
        }
        descr.buildcost.iter().all(|&(item, amount)| match item {
            CostItem::Ware(w) => warehouse.stock(WareWorker::Ware, w) >= amount,
            CostItem::Worker(w) => {
                warehouse.stock(WareWorker::Worker, w) >= amount
                    || self
                        .descriptions
                        .worker(w)
                        .is_some_and(|d| d.is_buildable_from_nothing())
            }
        })
    }

    /// Take a ware out of stock. The helper carries it to the flag.
    pub(crate) fn launch_ware(&mut self, warehouse: Serial, index: DescriptionIndex) -> Result<Serial, EngineError> {
        let owner = self.objects.owner(warehouse).unwrap_or_default();
        let b = self.building_mut(warehouse)?;
        let BuildingState::Warehouse { wares, .. } = &mut b.state else {
            return Err(EngineError::InconsistentEconomy(format!("{} is no warehouse", warehouse)));
        };
        match wares.get_mut(&index) {
            Some(n) if *n > 0 => *n -= 1,
            _ => {
                return Err(EngineError::InconsistentEconomy(format!(
                    "warehouse {} has no ware {}",
                    warehouse, index
                )))
            }
        }
        let ware = self.create_ware(owner, index, Some(warehouse));
        self.building_mut(warehouse)?.outbox.push_back(ware);
        self.wake_helper(warehouse, "wakeup")?;
        Ok(ware)
    }

    /// Take a worker out of stock, creating it from its build cost if needed.
    /// Worker parts of the cost that are not in stock are created from
    /// nothing when their kind allows it.
    pub(crate) fn launch_worker(&mut self, warehouse: Serial, index: DescriptionIndex) -> Result<Serial, EngineError> {
        let owner = self.objects.owner(warehouse).unwrap_or_default();
        let descr = self
            .descriptions
            .worker(index)
            .cloned()
            .ok_or_else(|| EngineError::InconsistentEconomy(format!("unknown worker {}", index)))?;
        let b = self
            .objects
            .get::<Building>(warehouse)
            .ok_or(EngineError::MissingObject(warehouse))?;
        let stocked = b.stock(WareWorker::Worker, index) > 0;
        if !stocked && !self.can_create_worker(b, index) {
            return Err(EngineError::InconsistentEconomy(format!(
                "warehouse {} cannot provide worker {}",
                warehouse, descr.name
            )));
        }
        let consume: Vec<(WareWorker, DescriptionIndex, u32)> = if stocked {
            vec![(WareWorker::Worker, index, 1)]
        } else {
            descr
                .buildcost
                .iter()
                .filter_map(|&(item, n)| match item {
                    CostItem::Ware(w) => Some((WareWorker::Ware, w, n)),
                    CostItem::Worker(w) => {
                        (b.stock(WareWorker::Worker, w) >= n).then_some((WareWorker::Worker, w, n))
                    }
                })
                .collect()
        };
        let position = b.position;
        if let BuildingState::Warehouse { wares, workers, .. } = &mut self.building_mut(warehouse)?.state {
            for (kind, w, n) in consume {
                let stock = match kind {
                    WareWorker::Ware => &mut *wares,
                    WareWorker::Worker => &mut *workers,
                };
                if let Some(have) = stock.get_mut(&w) {
                    *have = have.saturating_sub(n);
                }
            }
        }
        let worker = self.create_bob(owner, index, position)?;
        self.bob_mut(worker)?.location = Some(warehouse);
        log::debug!("Warehouse {}: launched {} {}", warehouse, descr.name, worker);
        Ok(worker)
    }

    /// A requested item arrived at `slot` of the building.
    pub(crate) fn building_receive(
        &mut self,
        building: Serial,
        slot: usize,
        item: Serial,
        kind: WareWorker,
    ) -> Result<(), EngineError> {
        let Some(b) = self.objects.get::<Building>(building) else {
            return Ok(());
        };
        match (kind, b.is_military()) {
            (WareWorker::Ware, false) => {
                let descr = self
                    .objects
                    .get::<crate::transport::WareInstance>(item)
                    .map(|w| w.descr)
                    .ok_or(EngineError::MissingObject(item))?;
                let mut working = true;
                if let BuildingState::ProductionSite {
                    inputs,
                    working_since,
                    ..
                } = &mut self.building_mut(building)?.state
                {
                    if let Some(q) = inputs.get_mut(slot) {
                        q.filled += 1;
                    }
                    working = working_since.is_some();
                }
                self.destroy_ware(item)?;
                self.metrics.wares_delivered += 1;
                let time = self.time;
                self.notes.publish(&Note::WareDelivered {
                    ware: descr,
                    building,
                    time,
                });
                if !working {
                    self.schedule_building_act(building, 0)?;
                }
                Ok(())
            }
            (WareWorker::Worker, true) => self.soldier_arrived(building, item),
            _ => {
                log::warn!("building {}: unexpected {:?} {} for slot {}", building, kind, item, slot);
                match kind {
                    WareWorker::Ware => self.building_keep_ware(building, item),
                    WareWorker::Worker => self.reset_tasks(item),
                }
            }
        }
    }

    fn soldier_arrived(&mut self, building: Serial, soldier: Serial) -> Result<(), EngineError> {
        let owner = self.objects.owner(building).unwrap_or_default();
        let b = self.building_mut(building)?;
        let site_pos = b.position;
        let (first, conquers) = match &mut b.state {
            BuildingState::MilitarySite {
                soldiers,
                conquered,
                conquers,
                ..
            } => {
                soldiers.push(soldier);
                let first = !*conquered;
                *conquered = true;
                (first, *conquers)
            }
            _ => return Ok(()),
        };
        let b = self.bob_mut(soldier)?;
        b.location = Some(building);
        if let Some(s) = b.soldier_mut() {
            s.home = Some(building);
        }
        log::debug!("Military site {}: soldier {} arrived", building, soldier);
        if first {
            self.conquer_area(owner, site_pos, conquers)?;
        }
        self.schedule_building_act(building, BUILDING_TICK_MS)?;
        self.reset_tasks(soldier)
    }

    pub(crate) fn schedule_building_act(&mut self, building: Serial, delay: Time) -> Result<(), EngineError> {
        let due = self.time + delay;
        let data = self.building_mut(building)?.actid;
        self.queue.enqueue(due, Command::Act { serial: building, data });
        Ok(())
    }

    /// Entry point of `Command::Act` for buildings.
    pub(crate) fn building_act(&mut self, building: Serial, data: u32) -> Result<(), EngineError> {
        let Some(b) = self.objects.get_mut::<Building>(building) else {
            return Ok(());
        };
        if b.actid != data {
            self.metrics.stale_acts += 1;
            return Ok(());
        }
        b.actid += 1;
        match b.state {
            BuildingState::ProductionSite { .. } => self.production_act(building),
            BuildingState::MilitarySite { .. } => self.heal_act(building),
            BuildingState::Warehouse { .. } => Ok(()),
        }
    }

    /// Finish a running work cycle, then start the next one if every input
    /// queue has a ware.
    fn production_act(&mut self, building: Serial) -> Result<(), EngineError> {
        let owner = self.objects.owner(building).unwrap_or_default();
        let now = self.time;
        let BuildingState::ProductionSite {
            inputs,
            outputs,
            work_ms,
            working_since,
        } = &mut self.building_mut(building)?.state
        else {
            return Ok(());
        };
        let work_ms = *work_ms as Time;
        let mut produced = Vec::new();
        let mut refill = Vec::new();
        if let Some(start) = *working_since {
            let done = start + work_ms;
            if now < done {
                return self.schedule_building_act(building, done - now);
            }
            for q in inputs.iter_mut() {
                q.filled = q.filled.saturating_sub(1);
                refill.extend(q.request.map(|r| (r, q.missing())));
            }
            produced = outputs.clone();
            *working_since = None;
        }
        let ready = !inputs.is_empty() && inputs.iter().all(|q| q.filled > 0);
        if ready {
            *working_since = Some(now);
        }

        for (rid, count) in refill {
            self.set_request_count(rid, count)?;
        }
        if !produced.is_empty() {
            log::debug!("Production site {}: produced {:?}", building, produced);
        }
        for index in produced {
            let ware = self.create_ware(owner, index, Some(building));
            self.building_mut(building)?.outbox.push_back(ware);
        }
        self.wake_helper(building, "wakeup")?;
        if ready {
            self.schedule_building_act(building, work_ms)?;
        }
        Ok(())
    }

    /// Heal soldiers inside; keep ticking while somebody is injured.
    fn heal_act(&mut self, building: Serial) -> Result<(), EngineError> {
        let b = self
            .objects
            .get::<Building>(building)
            .ok_or(EngineError::MissingObject(building))?;
        let heal = match b.state {
            BuildingState::MilitarySite { heal_per_second, .. } => heal_per_second,
            _ => return Ok(()),
        };
        let mut injured = false;
        for soldier in b.soldiers_inside() {
            if let Some(s) = self.objects.get_mut::<Bob>(soldier).and_then(|b| b.soldier_mut()) {
                if s.health > 0 && s.battle.is_null() {
                    s.health = (s.health + heal).min(s.stats.max_health);
                }
                injured |= s.health < s.stats.max_health;
            }
        }
        if injured {
            self.schedule_building_act(building, BUILDING_TICK_MS)?;
        }
        Ok(())
    }

    /// Change how many wares an input queue keeps stocked.
    pub(crate) fn set_input_max_fill(
        &mut self,
        building: Serial,
        ware: DescriptionIndex,
        max_fill: u32,
    ) -> Result<bool, EngineError> {
        let Some(Building {
            state: BuildingState::ProductionSite { inputs, .. },
            ..
        }) = self.objects.get_mut::<Building>(building)
        else {
            return Ok(false);
        };
        let Some(q) = inputs.iter_mut().find(|q| q.ware == ware) else {
            return Ok(false);
        };
        q.max_fill = max_fill;
        let (rid, count) = (q.request, q.missing());
        if let Some(rid) = rid {
            self.set_request_count(rid, count)?;
        }
        Ok(true)
    }

    /// Claim the land around a newly occupied military site.
    pub(crate) fn conquer_area(&mut self, owner: PlayerNumber, center: Coords, radius: u32) -> Result<(), EngineError> {
        if let Some(p) = self.players.get_mut(&owner) {
            p.add_influence(&self.map, center, radius);
        }
        self.recalc_ownership(center, radius)
    }

    pub(crate) fn unconquer_area(&mut self, owner: PlayerNumber, center: Coords, radius: u32) -> Result<(), EngineError> {
        if let Some(p) = self.players.get_mut(&owner) {
            p.remove_influence(&self.map, center, radius);
        }
        self.recalc_ownership(center, radius)
    }

    /// Give every field in the region to the player with the most military
    /// influence on it. Ties and fields without influence keep their owner.
    fn recalc_ownership(&mut self, center: Coords, radius: u32) -> Result<(), EngineError> {
        let mut changed: BTreeMap<PlayerNumber, Vec<Coords>> = BTreeMap::new();
        for c in self.map.region(center, radius) {
            let current = self.map.field(c).owner;
            let mut best: Option<(u16, PlayerNumber)> = None;
            for (&number, p) in &self.players {
                let influence = p.influence(&self.map, c);
                if influence == 0 {
                    continue;
                }
                best = match best {
                    Some((b, _)) if influence < b => best,
                    Some((b, n)) if influence == b && current != Some(number) => Some((b, n)),
                    _ => Some((influence, number)),
                };
            }
            let Some((_, winner)) = best else {
                continue;
            };
            if current != Some(winner) {
                self.map.field_mut(c).owner = Some(winner);
                changed.entry(winner).or_default().push(c);
            }
        }

        for (owner, fields) in changed {
            log::debug!("Player {}: conquered {} fields", owner, fields.len());
            // Foreign flags and roads on lost land are burnt down.
            for &c in &fields {
                let Some(imm) = self.map.field(c).immovable else {
                    continue;
                };
                if self.objects.owner(imm) == Some(owner) {
                    continue;
                }
                match self.objects.object(imm).map(|o| &o.body) {
                    Some(Body::Flag(_)) => self.destroy_flag(imm)?,
                    Some(Body::Road(_)) => self.destroy_road(imm)?,
                    Some(Body::Building(_)) => {
                        let flag = self.building_flag(imm);
                        self.destroy_building(imm)?;
                        if let Some(f) = flag {
                            self.destroy_flag(f)?;
                        }
                    }
                    _ => {}
                }
            }
            self.notes.publish(&Note::OwnershipChanged {
                owner: Some(owner),
                fields,
            });
        }
        Ok(())
    }

    /// Send up to `count` soldiers from the player's military sites in range
    /// of `target`. Every site keeps one soldier at home. Returns how many
    /// soldiers were launched.
    pub(crate) fn launch_attack(
        &mut self,
        player: PlayerNumber,
        target: Serial,
        count: u32,
    ) -> Result<u32, EngineError> {
        let Some(t) = self.objects.get::<Building>(target) else {
            return Ok(0);
        };
        if !t.can_be_attacked() || self.objects.owner(target) == Some(player) {
            return Ok(0);
        }
        let target_pos = t.position;
        let sites: Vec<Serial> = self
            .objects
            .serials_of::<Building>()
            .into_iter()
            .filter(|&s| self.objects.owner(s) == Some(player))
            .filter(|&s| {
                self.objects.get::<Building>(s).is_some_and(|b| {
                    b.is_military() && self.map.calc_distance(b.position, target_pos) <= b.vision_range
                })
            })
            .collect();
        let mut launched = 0;
        for site in sites {
            let inside = self
                .objects
                .get::<Building>(site)
                .map(|b| b.soldiers_inside())
                .unwrap_or_default();
            let ready: Vec<Serial> = inside
                .into_iter()
                .filter(|&s| {
                    self.objects
                        .get::<Bob>(s)
                        .and_then(|b| b.soldier())
                        .is_some_and(|s| s.health > 0 && !s.should_retreat())
                })
                .collect();
            for &soldier in ready.iter().skip(1) {
                if launched >= count {
                    return Ok(launched);
                }
                if let BuildingState::MilitarySite { outside, .. } = &mut self.building_mut(site)?.state {
                    outside.push(soldier);
                }
                log::debug!("MO({}): attacking {} from {}", soldier, target, site);
                start_task_attack(self, soldier, target)?;
                launched += 1;
            }
        }
        Ok(launched)
    }

    /// An attacker stands at the flag of `building`. Send out a defender and
    /// start a battle; `false` if nobody is left to defend.
    pub(crate) fn defend_request(&mut self, building: Serial, attacker: Serial) -> Result<bool, EngineError> {
        let Some(b) = self.objects.get::<Building>(building) else {
            return Ok(false);
        };
        let defender = b.soldiers_inside().into_iter().find(|&s| {
            self.objects
                .get::<Bob>(s)
                .and_then(|b| b.soldier())
                .is_some_and(|s| s.health > 0 && s.battle.is_null())
        });
        let Some(defender) = defender else {
            return Ok(false);
        };
        if let BuildingState::MilitarySite { outside, .. } = &mut self.building_mut(building)?.state {
            outside.push(defender);
        }
        self.start_battle(attacker, defender)?;
        start_task_defense(self, defender, building)?;
        Ok(true)
    }

    /// Nobody defends `building` any more: the attacker's player takes it.
    /// The site is razed.
    pub(crate) fn conquer_site(&mut self, building: Serial, attacker: Serial) -> Result<(), EngineError> {
        let old_owner = self.objects.owner(building).unwrap_or_default();
        let new_owner = self.objects.owner(attacker).unwrap_or_default();
        let position = self
            .objects
            .get::<Building>(building)
            .map(|b| b.position)
            .ok_or(EngineError::MissingObject(building))?;
        log::info!("Player {} conquered building {} of player {}", new_owner, building, old_owner);
        self.notes.publish(&Note::BuildingConquered {
            building,
            old_owner,
            new_owner,
        });
        self.send_message(
            old_owner,
            "Building lost",
            "An enemy conquered one of your military sites.".to_string(),
            Some(position),
        );
        self.send_message(
            new_owner,
            "Building conquered",
            "Your soldiers conquered an enemy military site.".to_string(),
            Some(position),
        );
        self.destroy_building(building)
    }

    /// A soldier is back inside its site.
    pub(crate) fn soldier_returned(&mut self, building: Serial, soldier: Serial) -> Result<(), EngineError> {
        if let BuildingState::MilitarySite { outside, .. } = &mut self.building_mut(building)?.state {
            outside.retain(|&s| s != soldier);
        }
        self.bob_mut(soldier)?.location = Some(building);
        self.schedule_building_act(building, BUILDING_TICK_MS)
    }

    /// Forget a soldier at its home site and ask for a replacement.
    pub(crate) fn soldier_died(&mut self, soldier: Serial) -> Result<(), EngineError> {
        let Some(home) = self
            .objects
            .get::<Bob>(soldier)
            .and_then(|b| b.soldier())
            .and_then(|s| s.home)
        else {
            return Ok(());
        };
        let Some(b) = self.objects.get_mut::<Building>(home) else {
            return Ok(());
        };
        let BuildingState::MilitarySite {
            soldiers,
            outside,
            capacity,
            request,
            ..
        } = &mut b.state
        else {
            return Ok(());
        };
        soldiers.retain(|&s| s != soldier);
        outside.retain(|&s| s != soldier);
        let (missing, request) = (capacity.saturating_sub(soldiers.len() as u32), *request);
        if let Some(s) = self.objects.get_mut::<Bob>(soldier).and_then(|b| b.soldier_mut()) {
            s.home = None;
        }
        if let Some(rid) = request {
            self.set_request_count(rid, missing)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "building_tests.rs"]
mod building_tests;
