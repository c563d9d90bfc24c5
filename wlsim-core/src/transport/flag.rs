//! Flags: transport graph nodes with a bounded ware store.
//!
//! The pickup protocol is a two-phase commit between a flag and the carriers
//! of its roads:
//!
//! 1. [`Flag::has_pending_ware`] tells a carrier there is work towards a
//!    neighbouring flag.
//! 2. [`Flag::ack_pickup`] reserves one such ware for exactly that carrier.
//! 3. [`Flag::fetch_pending_ware`] hands the ware over once the carrier
//!    stands on the flag. Wares acked by another carrier are never handed out.
//!
//! [`Flag::cancel_pickup`] undoes an ack, e.g. when the carrier gave up.

use crate::bob::Bob;
use crate::geometry::{Coords, Direction};
use crate::object::{OPtr, Serial};
use crate::transport::{EconomyId, RequestId, Road, WareInstance};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use wldata::WareWorker;

/// A ware stored on a flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWare {
    pub ware: OPtr<WareInstance>,
    /// Waiting for a carrier (`false` once acked or when it stays put).
    pub pending: bool,
    /// Grows while the ware waits, up to the configured maximum.
    pub priority: u32,
    /// Flag or building the ware moves to next.
    pub nextstep: Option<Serial>,
    /// Carrier holding the ack for this ware.
    pub acked_by: OPtr<Bob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlagJobKind {
    Geologist,
    Scout,
}

impl FlagJobKind {
    pub fn program(self) -> &'static str {
        match self {
            FlagJobKind::Geologist => "expedition",
            FlagJobKind::Scout => "scout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagJob {
    pub id: u32,
    pub kind: FlagJobKind,
    pub program: String,
    pub request: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub position: Coords,
    /// Road attachments by walking direction (slot = direction - 1).
    pub roads: [OPtr<Road>; 6],
    /// Building north-west of the flag.
    pub building: Option<Serial>,
    pub wares: Vec<PendingWare>,
    pub ware_capacity: usize,
    /// Workers waiting to drop a ware here, oldest first.
    pub capacity_wait: VecDeque<OPtr<Bob>>,
    pub flag_jobs: Vec<FlagJob>,
    pub next_job_id: u32,
    /// Economy per [`WareWorker`] slot.
    pub economy: [Option<EconomyId>; 2],
}

impl Flag {
    pub fn new(position: Coords, ware_capacity: usize) -> Self {
        Self {
            position,
            roads: [OPtr::null(); 6],
            building: None,
            wares: Vec::new(),
            ware_capacity,
            capacity_wait: VecDeque::new(),
            flag_jobs: Vec::new(),
            next_job_id: 0,
            economy: [None, None],
        }
    }

    pub fn economy(&self, kind: WareWorker) -> Option<EconomyId> {
        self.economy[kind.slot()]
    }

    pub fn road(&self, dir: Direction) -> OPtr<Road> {
        self.roads[dir.index()]
    }

    pub fn attached_roads(&self) -> impl Iterator<Item = Serial> + '_ {
        self.roads.iter().filter_map(|r| r.serial())
    }

    pub fn ware_filled(&self) -> usize {
        self.wares.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.wares.len() < self.ware_capacity
    }

    pub fn is_congested(&self, threshold: usize) -> bool {
        self.wares.len() > threshold
    }

    pub fn current_wares(&self) -> usize {
        self.wares.len()
    }

    /// Append a ware. Callers check the capacity first.
    pub(crate) fn push_ware(&mut self, ware: Serial) {
        self.wares.push(PendingWare {
            ware: OPtr::new(ware),
            pending: true,
            priority: 0,
            nextstep: None,
            acked_by: OPtr::null(),
        });
    }

    pub fn has_pending_ware(&self, dest: Serial) -> bool {
        self.wares
            .iter()
            .any(|pw| pw.pending && pw.nextstep == Some(dest))
    }

    /// Reserve the highest priority pending ware towards `dest` for `carrier`.
    ///
    /// Every ware that becomes the new best candidate during the scan gains
    /// one priority point, so waiting wares overtake fresh ones. Ties keep the
    /// earlier ware, so once priorities are clamped service is first in,
    /// first out.
    pub fn ack_pickup(&mut self, carrier: Serial, dest: Serial, max_priority: u32) -> bool {
        let mut best: Option<(usize, u32)> = None;
        for (i, pw) in self.wares.iter_mut().enumerate() {
            if !pw.pending || pw.nextstep != Some(dest) {
                continue;
            }
            if best.map_or(true, |(_, p)| pw.priority > p) {
                best = Some((i, pw.priority));
                if pw.priority < max_priority {
                    pw.priority += 1;
                }
            }
        }
        match best {
            Some((i, _)) => {
                let pw = &mut self.wares[i];
                pw.pending = false;
                pw.acked_by = OPtr::new(carrier);
                true
            }
            None => false,
        }
    }

    /// Release an ack towards `dest`, preferring one held by `carrier`, else
    /// the lowest priority one. Returns the ware that became pending again.
    pub fn cancel_pickup(&mut self, carrier: Serial, dest: Serial) -> Option<Serial> {
        let candidates = || {
            self.wares
                .iter()
                .enumerate()
                .filter(|(_, pw)| !pw.pending && pw.nextstep == Some(dest) && !pw.acked_by.is_null())
        };
        let own = candidates()
            .filter(|(_, pw)| pw.acked_by.is(carrier))
            .min_by_key(|(_, pw)| pw.priority)
            .map(|(i, _)| i);
        let index = own.or_else(|| candidates().min_by_key(|(_, pw)| pw.priority).map(|(i, _)| i))?;
        let pw = &mut self.wares[index];
        pw.pending = true;
        pw.acked_by = OPtr::null();
        pw.ware.serial()
    }

    /// Hand a ware towards `dest` to `carrier`: one acked by the carrier if
    /// possible, otherwise an unreserved pending one.
    pub fn fetch_pending_ware(&mut self, carrier: Serial, dest: Serial) -> Option<Serial> {
        let index = self
            .wares
            .iter()
            .position(|pw| pw.nextstep == Some(dest) && pw.acked_by.is(carrier))
            .or_else(|| {
                self.wares
                    .iter()
                    .position(|pw| pw.nextstep == Some(dest) && pw.pending)
            })?;
        self.wares.remove(index).ware.serial()
    }

    /// Take a ware that is waiting for the flag's own building.
    pub fn fetch_ware_for_building(&mut self, building: Serial) -> Option<Serial> {
        let index = self
            .wares
            .iter()
            .position(|pw| pw.nextstep == Some(building))?;
        self.wares.remove(index).ware.serial()
    }

    pub fn remove_ware(&mut self, ware: Serial) -> bool {
        let before = self.wares.len();
        self.wares.retain(|pw| !pw.ware.is(ware));
        self.wares.len() != before
    }

    pub fn pending_ware_mut(&mut self, ware: Serial) -> Option<&mut PendingWare> {
        self.wares.iter_mut().find(|pw| pw.ware.is(ware))
    }

    pub fn wait_for_capacity(&mut self, worker: Serial) {
        if !self.capacity_wait.iter().any(|w| w.is(worker)) {
            self.capacity_wait.push_back(OPtr::new(worker));
        }
    }

    pub fn skip_wait_for_capacity(&mut self, worker: Serial) {
        self.capacity_wait.retain(|w| !w.is(worker));
    }

    pub fn is_waiting_for_capacity(&self, worker: Serial) -> bool {
        self.capacity_wait.iter().any(|w| w.is(worker))
    }

    pub(crate) fn add_flag_job(&mut self, kind: FlagJobKind) -> u32 {
        let id = self.next_job_id;
        self.next_job_id += 1;
        self.flag_jobs.push(FlagJob {
            id,
            kind,
            program: kind.program().to_string(),
            request: None,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEST: Serial = Serial(100);
    const OTHER: Serial = Serial(101);

    fn flag_with(n: u32, dest: Serial) -> Flag {
        let mut f = Flag::new(Coords::new(0, 0), 8);
        for i in 0..n {
            f.push_ware(Serial(i + 1));
            f.wares[i as usize].nextstep = Some(dest);
        }
        f
    }

    #[test]
    fn test_second_ack_fails_when_single_ware() {
        let mut f = flag_with(1, DEST);
        assert!(f.ack_pickup(Serial(50), DEST, 16));
        assert!(!f.ack_pickup(Serial(51), DEST, 16));
        assert!(!f.has_pending_ware(DEST));
    }

    #[test]
    fn test_acked_ware_only_fetched_by_acker() {
        let mut f = flag_with(1, DEST);
        assert!(f.ack_pickup(Serial(50), DEST, 16));
        assert_eq!(f.fetch_pending_ware(Serial(51), DEST), None);
        assert_eq!(f.fetch_pending_ware(Serial(50), DEST), Some(Serial(1)));
        assert_eq!(f.ware_filled(), 0);
    }

    #[test]
    fn test_ack_prefers_older_ware_on_tie() {
        let mut f = flag_with(3, DEST);
        assert!(f.ack_pickup(Serial(50), DEST, 16));
        assert!(f.wares[0].acked_by.is(Serial(50)));
        // The first ware became the best candidate and gained priority.
        assert_eq!(f.wares[0].priority, 1);
        assert_eq!(f.wares[1].priority, 0);
    }

    #[test]
    fn test_priority_clamped_keeps_fifo() {
        let mut f = flag_with(2, DEST);
        f.wares[0].priority = 16;
        f.wares[1].priority = 16;
        assert!(f.ack_pickup(Serial(50), DEST, 16));
        assert!(f.wares[0].acked_by.is(Serial(50)));
        assert_eq!(f.wares[0].priority, 16);
    }

    #[test]
    fn test_waiting_ware_overtakes() {
        let mut f = flag_with(2, DEST);
        f.wares[1].priority = 5;
        assert!(f.ack_pickup(Serial(50), DEST, 16));
        assert!(f.wares[1].acked_by.is(Serial(50)));
        assert_eq!(f.wares[1].priority, 6);
    }

    #[test]
    fn test_cancel_pickup_prefers_own_ack() {
        let mut f = flag_with(2, DEST);
        assert!(f.ack_pickup(Serial(50), DEST, 16));
        assert!(f.ack_pickup(Serial(51), DEST, 16));
        assert_eq!(f.cancel_pickup(Serial(51), DEST), Some(Serial(2)));
        assert!(f.has_pending_ware(DEST));
        assert!(f.wares[0].acked_by.is(Serial(50)));
    }

    #[test]
    fn test_fetch_ignores_other_destinations() {
        let mut f = flag_with(1, OTHER);
        assert_eq!(f.fetch_pending_ware(Serial(50), DEST), None);
        assert!(!f.has_pending_ware(DEST));
    }

    #[test]
    fn test_capacity_queue_is_fifo_and_unique() {
        let mut f = Flag::new(Coords::new(0, 0), 8);
        f.wait_for_capacity(Serial(1));
        f.wait_for_capacity(Serial(2));
        f.wait_for_capacity(Serial(1));
        assert_eq!(f.capacity_wait.len(), 2);
        f.skip_wait_for_capacity(Serial(1));
        assert_eq!(f.capacity_wait.front(), Some(&OPtr::new(Serial(2))));
    }

    #[derive(Debug, Clone)]
    enum FlagOp {
        Add(bool),
        Ack(u32, bool),
        Cancel(u32, bool),
        Fetch(u32, bool),
    }

    fn flag_op() -> impl Strategy<Value = FlagOp> {
        prop_oneof![
            any::<bool>().prop_map(FlagOp::Add),
            (0u32..3, any::<bool>()).prop_map(|(c, d)| FlagOp::Ack(c, d)),
            (0u32..3, any::<bool>()).prop_map(|(c, d)| FlagOp::Cancel(c, d)),
            (0u32..3, any::<bool>()).prop_map(|(c, d)| FlagOp::Fetch(c, d)),
        ]
    }

    proptest! {
        #[test]
        fn prop_capacity_is_never_exceeded(
            capacity in 1usize..6,
            ops in proptest::collection::vec(flag_op(), 1..60),
        ) {
            let dest = |other: bool| if other { OTHER } else { DEST };
            let mut f = Flag::new(Coords::new(0, 0), capacity);
            let mut next_ware = 1;
            for op in ops {
                match op {
                    FlagOp::Add(other) => {
                        let before = f.current_wares();
                        if f.has_capacity() {
                            f.push_ware(Serial(next_ware));
                            f.wares[before].nextstep = Some(dest(other));
                            next_ware += 1;
                        }
                    }
                    FlagOp::Ack(c, other) => {
                        f.ack_pickup(Serial(50 + c), dest(other), 16);
                    }
                    FlagOp::Cancel(c, other) => {
                        f.cancel_pickup(Serial(50 + c), dest(other));
                    }
                    FlagOp::Fetch(c, other) => {
                        let before = f.current_wares();
                        if let Some(w) = f.fetch_pending_ware(Serial(50 + c), dest(other)) {
                            prop_assert!(f.wares.iter().all(|pw| !pw.ware.is(w)));
                            prop_assert_eq!(f.current_wares(), before - 1);
                        }
                    }
                }
                prop_assert!(f.current_wares() <= capacity);
                prop_assert_eq!(f.has_capacity(), f.current_wares() < capacity);
                // Acked wares are never pending at the same time.
                prop_assert!(f.wares.iter().all(|pw| !(pw.pending && !pw.acked_by.is_null())));
            }
        }

        #[test]
        fn prop_at_most_one_ack_per_ware(n in 1u32..8, carriers in 1u32..12) {
            let mut f = flag_with(n, DEST);
            let mut successes = 0;
            for c in 0..carriers {
                if f.ack_pickup(Serial(1000 + c), DEST, 16) {
                    successes += 1;
                }
            }
            prop_assert_eq!(successes, n.min(carriers));
            let mut ackers: Vec<_> = f.wares.iter().filter_map(|pw| pw.acked_by.serial()).collect();
            let total = ackers.len();
            ackers.sort();
            ackers.dedup();
            prop_assert_eq!(ackers.len(), total);
        }
    }
}
