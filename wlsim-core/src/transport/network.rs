//! Game-level operations on flags and roads: construction and teardown,
//! moving wares between flags and carriers, and staffing roads and flag
//! jobs.

use crate::bob::{Bob, Role, State};
use crate::building::Building;
use crate::error::EngineError;
use crate::game::Game;
use crate::geometry::{Coords, Path};
use crate::object::{Body, OPtr, Serial};
use crate::player::PlayerNumber;
use crate::tasks::{self, TaskKind};
use crate::transport::{
    Flag, FlagJobKind, NextStep, RequestTarget, Road, RoadKind, SupplySource, WareInstance,
};
use wldata::{WareWorker, WorkerKind};

/// Places a geologist looks at before returning.
pub const GEOLOGIST_ATTEMPTS: i64 = 8;
pub const GEOLOGIST_RADIUS: i64 = 6;

impl Game {
    pub(crate) fn place_flag(&mut self, owner: PlayerNumber, coords: Coords) -> Result<Serial, EngineError> {
        let coords = self.map.normalize(coords);
        let flag = self.objects.insert(
            owner,
            Body::Flag(Flag::new(coords, self.config.flag_capacity)),
        );
        self.map.field_mut(coords).immovable = Some(flag);
        self.add_flag_to_new_economies(flag)?;
        log::debug!("Player {}: flag {} at {}", owner, flag, coords);
        Ok(flag)
    }

    /// Connect two flags along `path` and request a carrier for it.
    pub(crate) fn place_road(
        &mut self,
        owner: PlayerNumber,
        kind: RoadKind,
        start: Serial,
        end: Serial,
        path: Path,
    ) -> Result<Serial, EngineError> {
        let (Some(&first), Some(&last)) = (path.steps.first(), path.steps.last()) else {
            return Err(EngineError::InconsistentEconomy(format!(
                "road between {} and {} has no steps",
                start, end
            )));
        };
        let interior: Vec<Coords> = {
            let coords = path.coords(&self.map);
            coords[1..coords.len() - 1].to_vec()
        };
        let road = self
            .objects
            .insert(owner, Body::Road(Road::new(kind, start, end, path)));
        self.flag_mut(start)?.roads[first.index()] = OPtr::new(road);
        self.flag_mut(end)?.roads[last.opposite().index()] = OPtr::new(road);
        for c in interior {
            self.map.field_mut(c).immovable = Some(road);
        }
        self.connect_road(road)?;

        let carrier = match kind {
            RoadKind::Road => Some(self.descriptions.carrier()),
            RoadKind::Waterway => self.descriptions.ferry(),
        };
        if let Some(index) = carrier {
            let rid = self.create_request(RequestTarget::Road(road), WareWorker::Worker, index, 1);
            if let Some(r) = self.objects.get_mut::<Road>(road) {
                r.carrier_request = Some(rid);
            }
        }
        log::debug!("Player {}: {} {} between {} and {}", owner, kind.name(), road, start, end);
        Ok(road)
    }

    pub(crate) fn flag_mut(&mut self, flag: Serial) -> Result<&mut Flag, EngineError> {
        self.objects
            .get_mut::<Flag>(flag)
            .ok_or(EngineError::MissingObject(flag))
    }

    pub(crate) fn destroy_road(&mut self, road: Serial) -> Result<(), EngineError> {
        let Some(r) = self.objects.get::<Road>(road) else {
            return Ok(());
        };
        let (flags, kind, carrier, request) = (r.flags, r.kind, r.carrier, r.carrier_request);
        let interior: Vec<Coords> = {
            let coords = r.path.coords(&self.map);
            coords[1..coords.len().saturating_sub(1).max(1)].to_vec()
        };
        log::debug!("Removing {} {}", kind.name(), road);
        if let Some(rid) = request {
            self.remove_request(rid)?;
        }
        for c in interior {
            let field = self.map.field_mut(c);
            if field.immovable == Some(road) {
                field.immovable = None;
            }
        }
        for flag in flags {
            if let Some(f) = self.objects.get_mut::<Flag>(flag) {
                for slot in f.roads.iter_mut() {
                    if slot.is(road) {
                        *slot = OPtr::null();
                    }
                }
                for pw in f.wares.iter_mut() {
                    if carrier.serial().is_some_and(|c| pw.acked_by.is(c)) {
                        pw.acked_by = OPtr::null();
                        pw.pending = true;
                    }
                }
            }
        }
        self.objects.remove(road);
        if let Some(c) = carrier.serial() {
            self.worker_lost_location(c)?;
        }
        self.split_after_road_removal(flags, kind)?;
        // Wares routed over the road need a new next step.
        for flag in flags {
            let wares: Vec<Serial> = self
                .objects
                .get::<Flag>(flag)
                .map(|f| f.wares.iter().filter_map(|pw| pw.ware.serial()).collect())
                .unwrap_or_default();
            for w in wares {
                self.ware_update(w)?;
            }
        }
        Ok(())
    }

    pub(crate) fn destroy_flag(&mut self, flag: Serial) -> Result<(), EngineError> {
        let Some(f) = self.objects.get::<Flag>(flag) else {
            return Ok(());
        };
        let building = f.building;
        let roads: Vec<Serial> = f.attached_roads().collect();
        let position = f.position;
        log::debug!("Removing flag {} at {}", flag, position);
        if let Some(b) = building {
            self.destroy_building(b)?;
        }
        for road in roads {
            self.destroy_road(road)?;
        }
        let Some(f) = self.objects.get::<Flag>(flag) else {
            return Ok(());
        };
        let wares: Vec<Serial> = f.wares.iter().filter_map(|pw| pw.ware.serial()).collect();
        let waiting: Vec<Serial> = f.capacity_wait.iter().filter_map(|w| w.serial()).collect();
        let jobs: Vec<_> = f.flag_jobs.iter().filter_map(|j| j.request).collect();
        for w in wares {
            self.destroy_ware(w)?;
        }
        for rid in jobs {
            self.remove_request(rid)?;
        }
        self.remove_flag_from_economies(flag)?;
        if self.map.field(position).immovable == Some(flag) {
            self.map.field_mut(position).immovable = None;
        }
        self.objects.remove(flag);
        for w in waiting {
            self.send_signal(w, "fail")?;
        }
        self.orphan_bobs_of(flag)?;
        self.update_registrations()
    }

    /// Workers whose location was `serial` lose it.
    pub(crate) fn orphan_bobs_of(&mut self, serial: Serial) -> Result<(), EngineError> {
        let orphans: Vec<Serial> = self
            .objects
            .serials_of::<Bob>()
            .into_iter()
            .filter(|&b| {
                self.objects
                    .get::<Bob>(b)
                    .is_some_and(|b| b.location == Some(serial))
            })
            .collect();
        for bob in orphans {
            self.worker_lost_location(bob)?;
        }
        Ok(())
    }

    /// The worker's flag, road or building disappeared: its transfer fails,
    /// a carried ware is lost and its tasks get a "location" signal.
    pub(crate) fn worker_lost_location(&mut self, bob: Serial) -> Result<(), EngineError> {
        let Some(b) = self.objects.get_mut::<Bob>(bob) else {
            return Ok(());
        };
        let transfer = b.transfer;
        let carried = b.carried_ware.take();
        b.location = None;
        b.set_promised_pickup(None);
        if let Some(t) = transfer {
            self.transfer_failed(t);
        }
        if let Some(w) = carried {
            self.destroy_ware(w)?;
        }
        self.send_signal(bob, "location")
    }

    pub(crate) fn destroy_ware(&mut self, ware: Serial) -> Result<(), EngineError> {
        let Some(w) = self.objects.get::<WareInstance>(ware) else {
            return Ok(());
        };
        let (transfer, supply, location) = (w.transfer, w.supply, w.location);
        if let Some(t) = transfer {
            self.transfer_failed(t);
        }
        if let Some(s) = supply {
            self.remove_supply(s);
        }
        self.objects.remove(ware);
        if let Some(flag) = location.filter(|&l| self.objects.get::<Flag>(l).is_some()) {
            self.flag_mut(flag)?.remove_ware(ware);
            self.wake_up_capacity_queue(flag)?;
        }
        Ok(())
    }

    /// Put a ware onto a flag and route it on.
    pub fn add_ware_to_flag(&mut self, flag: Serial, ware: Serial) -> Result<(), EngineError> {
        let f = self.flag_mut(flag)?;
        if !f.has_capacity() {
            return Err(EngineError::FlagFull {
                flag,
                capacity: f.ware_capacity,
            });
        }
        f.push_ware(ware);
        if let Some(w) = self.objects.get_mut::<WareInstance>(ware) {
            w.location = Some(flag);
        }
        self.ware_update(ware)
    }

    /// Re-evaluate where a ware should go: keep its idle supply current,
    /// follow the transfer's next step and call a carrier for it.
    pub(crate) fn ware_update(&mut self, ware: Serial) -> Result<(), EngineError> {
        let Some(w) = self.objects.get::<WareInstance>(ware) else {
            return Ok(());
        };
        let Some(location) = w.location else {
            return Ok(());
        };
        let (transfer, supply) = (w.transfer, w.supply);
        let on_flag = self.objects.get::<Flag>(location).is_some();
        let requested = transfer
            .and_then(|t| self.logistics.transfer(t))
            .is_some_and(|t| t.request.is_some());

        if requested {
            if let Some(s) = supply {
                self.remove_supply(s);
                self.ware_mut(ware)?.supply = None;
            }
        } else if on_flag && supply.is_none() {
            let s = self.add_supply(SupplySource::IdleWare(ware), WareWorker::Ware);
            self.ware_mut(ware)?.supply = Some(s);
        }

        if self.objects.get::<Bob>(location).is_some() {
            // Carried: the carrier routes it when dropping it.
            return Ok(());
        }
        let Some(tid) = transfer else {
            self.ware_mut(ware)?.nextstep = None;
            if on_flag {
                self.call_carrier(location, ware, None)?;
            }
            return Ok(());
        };
        match self.transfer_next_step(tid, location)? {
            NextStep::Arrived => {
                self.ware_mut(ware)?.nextstep = None;
                self.transfer_finished(tid)
            }
            NextStep::Fail => {
                self.transfer_failed(tid);
                self.ware_update(ware)
            }
            NextStep::Go(next) => {
                self.ware_mut(ware)?.nextstep = Some(next);
                if on_flag {
                    self.call_carrier(location, ware, Some(next))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn ware_mut(&mut self, ware: Serial) -> Result<&mut WareInstance, EngineError> {
        self.objects
            .get_mut::<WareInstance>(ware)
            .ok_or(EngineError::MissingObject(ware))
    }

    /// Mark the ware on `flag` as waiting for `nextstep` and tell whoever
    /// has to move it.
    fn call_carrier(&mut self, flag: Serial, ware: Serial, nextstep: Option<Serial>) -> Result<(), EngineError> {
        let Some(f) = self.objects.get::<Flag>(flag) else {
            return Ok(());
        };
        let building = f.building;
        let Some(pw) = f.wares.iter().find(|pw| pw.ware.is(ware)) else {
            return Ok(());
        };
        if nextstep.is_some() && pw.nextstep == nextstep && !pw.acked_by.is_null() {
            // Already promised to a carrier for this hop.
            return Ok(());
        }
        let road = nextstep.and_then(|next| {
            f.attached_roads().find_map(|r| {
                let road = self.objects.get::<Road>(r)?;
                (road.other_flag(flag) == Some(next)).then(|| (r, road.end_of(flag)))
            })
        });

        match (nextstep, road) {
            (Some(next), _) if Some(next) == building => {
                let pw = self.pending_ware_mut(flag, ware)?;
                pw.pending = false;
                pw.nextstep = Some(next);
                pw.acked_by = OPtr::null();
                self.building_fetch_from_flag(next)
            }
            (Some(next), Some((road, Some(end)))) => {
                let pw = self.pending_ware_mut(flag, ware)?;
                pw.pending = true;
                pw.nextstep = Some(next);
                pw.acked_by = OPtr::null();
                self.notify_carrier(road, end)
            }
            (next, _) => {
                if next.is_some() {
                    log::warn!("flag {}: ware {} has unreachable next step {:?}", flag, ware, next);
                }
                let pw = self.pending_ware_mut(flag, ware)?;
                pw.pending = false;
                pw.nextstep = None;
                pw.acked_by = OPtr::null();
                Ok(())
            }
        }
    }

    fn pending_ware_mut(
        &mut self,
        flag: Serial,
        ware: Serial,
    ) -> Result<&mut crate::transport::PendingWare, EngineError> {
        self.flag_mut(flag)?
            .pending_ware_mut(ware)
            .ok_or(EngineError::MissingObject(ware))
    }

    /// A ware waits at end `end` of `road`.
    fn notify_carrier(&mut self, road: Serial, end: usize) -> Result<(), EngineError> {
        let Some(carrier) = self.objects.get::<Road>(road).and_then(|r| r.carrier.serial()) else {
            return Ok(());
        };
        tasks::carrier::notify_ware(self, carrier, end)?;
        Ok(())
    }

    /// Hand a waiting ware over to a carrier standing on the flag.
    pub(crate) fn fetch_pending_ware(
        &mut self,
        flag: Serial,
        carrier: Serial,
        dest: Serial,
    ) -> Result<Option<Serial>, EngineError> {
        let ware = self.flag_mut(flag)?.fetch_pending_ware(carrier, dest);
        if let Some(w) = ware {
            self.ware_mut(w)?.location = Some(carrier);
            self.wake_up_capacity_queue(flag)?;
        }
        Ok(ware)
    }

    /// Trade `ware` for the one `carrier` acked towards `back`. The slot the
    /// pickup frees is refilled at once, so waiting workers only hear about
    /// it when the flag still has room afterwards.
    pub(crate) fn swap_ware(
        &mut self,
        flag: Serial,
        carrier: Serial,
        back: Serial,
        ware: Serial,
    ) -> Result<Option<Serial>, EngineError> {
        let other = self.flag_mut(flag)?.fetch_pending_ware(carrier, back);
        if let Some(w) = other {
            self.ware_mut(w)?.location = Some(carrier);
        }
        self.add_ware_to_flag(flag, ware)?;
        let room = self.objects.get::<Flag>(flag).is_some_and(|f| f.has_capacity());
        if other.is_some() && room {
            self.wake_up_capacity_queue(flag)?;
        }
        Ok(other)
    }

    /// Give back every pickup `carrier` acked on the flags of its road, so
    /// whoever serves the road next can take those wares.
    pub(crate) fn release_pickups(&mut self, carrier: Serial) -> Result<(), EngineError> {
        let Some(b) = self.objects.get_mut::<Bob>(carrier) else {
            return Ok(());
        };
        b.set_promised_pickup(None);
        let location = b.location;
        let Some(road) = location.and_then(|l| self.objects.get::<Road>(l)) else {
            return Ok(());
        };
        let flags = road.flags;
        for (end, flag) in flags.into_iter().enumerate() {
            let dest = flags[end ^ 1];
            let Some(f) = self.objects.get_mut::<Flag>(flag) else {
                continue;
            };
            while f
                .wares
                .iter()
                .any(|pw| pw.nextstep == Some(dest) && pw.acked_by.is(carrier))
            {
                if let Some(ware) = f.cancel_pickup(carrier, dest) {
                    log::trace!("flag {}: ack of {} on ware {} released", flag, carrier, ware);
                }
            }
        }
        Ok(())
    }

    /// Take a ware waiting for the flag's building.
    pub(crate) fn fetch_ware_for_building(
        &mut self,
        flag: Serial,
        building: Serial,
        worker: Serial,
    ) -> Result<Option<Serial>, EngineError> {
        let ware = self.flag_mut(flag)?.fetch_ware_for_building(building);
        if let Some(w) = ware {
            self.ware_mut(w)?.location = Some(worker);
            self.wake_up_capacity_queue(flag)?;
        }
        Ok(ware)
    }

    /// A slot on `flag` became free: wake the first worker still waiting.
    pub(crate) fn wake_up_capacity_queue(&mut self, flag: Serial) -> Result<(), EngineError> {
        loop {
            let Some(front) = self
                .objects
                .get_mut::<Flag>(flag)
                .and_then(|f| f.capacity_wait.pop_front())
            else {
                return Ok(());
            };
            let Some(worker) = front.serial() else {
                continue;
            };
            let waiting = self.objects.get::<Bob>(worker).is_some_and(|b| {
                b.stack
                    .last()
                    .is_some_and(|s| s.task == TaskKind::WaitForCapacity && s.objvar1 == Some(flag))
            });
            if waiting {
                log::trace!("flag {}: wake up {}", flag, worker);
                return self.send_signal(worker, "wakeup");
            }
        }
    }

    /// A worker requested for `road` arrived and becomes its carrier.
    pub(crate) fn road_receive_carrier(&mut self, road: Serial, worker: Serial) -> Result<(), EngineError> {
        let Some(r) = self.objects.get_mut::<Road>(road) else {
            return Ok(());
        };
        r.carrier = OPtr::new(worker);
        r.carrier_request = None;
        let b = self.bob_mut(worker)?;
        b.location = Some(road);
        if !matches!(b.role, Role::Carrier { .. }) {
            b.role = Role::Carrier {
                promised_pickup_to: None,
            };
        }
        log::debug!("MO({}): carrier for road {}", worker, road);
        self.reset_tasks(worker)
    }

    /// Queue a job at `flag` and request the worker for it.
    pub(crate) fn add_flag_job(&mut self, flag: Serial, kind: FlagJobKind) -> Result<u32, EngineError> {
        let worker_kind = match kind {
            FlagJobKind::Geologist => WorkerKind::Geologist,
            FlagJobKind::Scout => WorkerKind::Scout,
        };
        let index = self.descriptions.worker_of_kind(worker_kind).ok_or_else(|| {
            EngineError::InconsistentEconomy(format!("tribe has no {:?} worker", worker_kind))
        })?;
        let job = self.flag_mut(flag)?.add_flag_job(kind);
        let rid = self.create_request(RequestTarget::FlagJob { flag, job }, WareWorker::Worker, index, 1);
        if let Some(j) = self
            .flag_mut(flag)?
            .flag_jobs
            .iter_mut()
            .find(|j| j.id == job)
        {
            j.request = Some(rid);
        }
        Ok(job)
    }

    /// The worker for a flag job arrived: drop the job and start its program.
    pub(crate) fn flag_job_receive(&mut self, flag: Serial, job: u32, worker: Serial) -> Result<(), EngineError> {
        let f = self.flag_mut(flag)?;
        let Some(index) = f.flag_jobs.iter().position(|j| j.id == job) else {
            return Ok(());
        };
        let job = f.flag_jobs.remove(index);
        log::debug!("MO({}): starts {} at flag {}", worker, job.program, flag);
        self.bob_mut(worker)?.location = Some(flag);
        self.reset_tasks(worker)?;
        let state = match job.kind {
            FlagJobKind::Geologist => State::new(TaskKind::Geologist)
                .objvar1(flag)
                .ivar1(GEOLOGIST_ATTEMPTS)
                .ivar2(GEOLOGIST_RADIUS),
            FlagJobKind::Scout => State::new(TaskKind::Scout)
                .objvar1(flag)
                .ivar1(tasks::scout::SCOUT_DURATION_MS),
        };
        self.push_task(worker, state.svar1(job.program), 0)
    }

    /// Base flag of a building.
    pub fn building_flag(&self, building: Serial) -> Option<Serial> {
        self.objects.get::<Building>(building).map(|b| b.flag)
    }
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod network_tests;
