//! # Tribe descriptions
//!
//! Immutable content data consumed by the simulation: wares, workers and
//! buildings, addressed by [`DescriptionIndex`]. The simulation never mutates
//! a description; it only holds indices and looks them up here.
//!
//! Descriptions come from a JSON tribe file ([`Descriptions::load_json`]) or
//! from the built-in default tribe ([`Descriptions::default_tribe`]).

pub mod error;
pub mod raw;

pub use error::DescriptionError;

use raw::{RawBuildingKind, RawTribe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Index of a ware, worker or building description within its table.
pub type DescriptionIndex = u16;

const DEFAULT_TRIBE: &str = include_str!("../data/default_tribe.json");

/// Distinguishes the two kinds of economy items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WareWorker {
    Ware,
    Worker,
}

impl WareWorker {
    pub const ALL: [WareWorker; 2] = [WareWorker::Ware, WareWorker::Worker];

    pub fn slot(self) -> usize {
        match self {
            WareWorker::Ware => 0,
            WareWorker::Worker => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Carrier,
    Ferry,
    Soldier,
    Scout,
    Geologist,
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WareDescr {
    pub name: String,
}

/// Combat values of a soldier. Health and attack are in hit points,
/// defense and evade in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoldierStats {
    pub max_health: u32,
    pub attack_min: u32,
    pub attack_max: u32,
    pub defense: u32,
    pub evade: u32,
    pub retreat_health_percent: u32,
}

/// One entry of a worker's build cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CostItem {
    Ware(DescriptionIndex),
    Worker(DescriptionIndex),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescr {
    pub name: String,
    pub kind: WorkerKind,
    pub walk_step_ms: u32,
    pub vision_range: u32,
    pub buildcost: Vec<(CostItem, u32)>,
    pub soldier: Option<SoldierStats>,
}

impl WorkerDescr {
    /// Workers without build cost are created by warehouses on demand.
    pub fn is_buildable_from_nothing(&self) -> bool {
        self.buildcost.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescr {
    pub ware: DescriptionIndex,
    pub max_fill: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildingKind {
    Warehouse,
    ProductionSite {
        inputs: Vec<InputDescr>,
        outputs: Vec<DescriptionIndex>,
        work_ms: u32,
    },
    MilitarySite {
        max_soldiers: u32,
        conquers: u32,
        heal_per_second: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildingDescr {
    pub name: String,
    pub kind: BuildingKind,
    pub vision_range: u32,
}

/// Resolved description tables for one tribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptions {
    pub tribe: String,
    wares: Vec<WareDescr>,
    workers: Vec<WorkerDescr>,
    buildings: Vec<BuildingDescr>,
    carrier: DescriptionIndex,
    ferry: Option<DescriptionIndex>,
}

impl Descriptions {
    /// The tribe shipped with the engine.
    pub fn default_tribe() -> Result<Self, DescriptionError> {
        Self::from_json_str(DEFAULT_TRIBE)
    }

    pub fn load_json(path: &Path) -> Result<Self, DescriptionError> {
        log::info!("Loading tribe descriptions from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, DescriptionError> {
        let raw: RawTribe = serde_json::from_str(text)?;
        Self::from_raw(raw)
    }

    /// Resolve names to indices and validate cross references.
    pub fn from_raw(raw: RawTribe) -> Result<Self, DescriptionError> {
        let mut ware_names = BTreeMap::new();
        let mut wares = Vec::with_capacity(raw.wares.len());
        for (idx, w) in raw.wares.iter().enumerate() {
            if ware_names.insert(w.name.clone(), idx as DescriptionIndex).is_some() {
                return Err(DescriptionError::Duplicate {
                    kind: "ware",
                    name: w.name.clone(),
                });
            }
            wares.push(WareDescr {
                name: w.name.clone(),
            });
        }

        let mut worker_names = BTreeMap::new();
        for (idx, w) in raw.workers.iter().enumerate() {
            if worker_names.insert(w.name.clone(), idx as DescriptionIndex).is_some() {
                return Err(DescriptionError::Duplicate {
                    kind: "worker",
                    name: w.name.clone(),
                });
            }
        }

        let mut workers = Vec::with_capacity(raw.workers.len());
        for w in &raw.workers {
            if w.walk_step_ms == 0 {
                return Err(DescriptionError::InvalidValue {
                    owner: w.name.clone(),
                    field: "walk_step_ms",
                    reason: "must be positive".to_string(),
                });
            }
            let mut buildcost = Vec::new();
            for (name, amount) in &w.buildcost {
                let item = if let Some(&i) = ware_names.get(name) {
                    CostItem::Ware(i)
                } else if let Some(&i) = worker_names.get(name) {
                    CostItem::Worker(i)
                } else {
                    return Err(DescriptionError::UnknownName {
                        owner: w.name.clone(),
                        kind: "ware or worker",
                        name: name.clone(),
                    });
                };
                buildcost.push((item, *amount));
            }
            let soldier = match (&w.soldier, w.kind) {
                (Some(s), _) => {
                    if s.attack_min > s.attack_max {
                        return Err(DescriptionError::InvalidValue {
                            owner: w.name.clone(),
                            field: "attack_min",
                            reason: "larger than attack_max".to_string(),
                        });
                    }
                    Some(SoldierStats {
                        max_health: s.max_health,
                        attack_min: s.attack_min,
                        attack_max: s.attack_max,
                        defense: s.defense.min(100),
                        evade: s.evade.min(100),
                        retreat_health_percent: s.retreat_health_percent.min(100),
                    })
                }
                (None, WorkerKind::Soldier) => {
                    return Err(DescriptionError::MissingSoldierStats(w.name.clone()));
                }
                (None, _) => None,
            };
            workers.push(WorkerDescr {
                name: w.name.clone(),
                kind: w.kind,
                walk_step_ms: w.walk_step_ms,
                vision_range: w.vision_range,
                buildcost,
                soldier,
            });
        }

        let carrier = workers
            .iter()
            .position(|w| w.kind == WorkerKind::Carrier)
            .ok_or_else(|| DescriptionError::MissingCarrier(raw.name.clone()))?
            as DescriptionIndex;
        let ferry = workers
            .iter()
            .position(|w| w.kind == WorkerKind::Ferry)
            .map(|i| i as DescriptionIndex);

        let mut building_names = BTreeMap::new();
        let mut buildings = Vec::with_capacity(raw.buildings.len());
        for b in &raw.buildings {
            if building_names.insert(b.name.clone(), ()).is_some() {
                return Err(DescriptionError::Duplicate {
                    kind: "building",
                    name: b.name.clone(),
                });
            }
            let resolve = |name: &String| {
                ware_names
                    .get(name)
                    .copied()
                    .ok_or_else(|| DescriptionError::UnknownName {
                        owner: b.name.clone(),
                        kind: "ware",
                        name: name.clone(),
                    })
            };
            let kind = match &b.kind {
                RawBuildingKind::Warehouse => BuildingKind::Warehouse,
                RawBuildingKind::ProductionSite {
                    inputs,
                    outputs,
                    work_ms,
                } => BuildingKind::ProductionSite {
                    inputs: inputs
                        .iter()
                        .map(|i| {
                            Ok(InputDescr {
                                ware: resolve(&i.ware)?,
                                max_fill: i.max_fill,
                            })
                        })
                        .collect::<Result<_, DescriptionError>>()?,
                    outputs: outputs.iter().map(resolve).collect::<Result<_, _>>()?,
                    work_ms: *work_ms,
                },
                RawBuildingKind::MilitarySite {
                    max_soldiers,
                    conquers,
                    heal_per_second,
                } => {
                    if *max_soldiers == 0 {
                        return Err(DescriptionError::InvalidValue {
                            owner: b.name.clone(),
                            field: "max_soldiers",
                            reason: "must be at least 1".to_string(),
                        });
                    }
                    BuildingKind::MilitarySite {
                        max_soldiers: *max_soldiers,
                        conquers: *conquers,
                        heal_per_second: *heal_per_second,
                    }
                }
            };
            buildings.push(BuildingDescr {
                name: b.name.clone(),
                kind,
                vision_range: b.vision_range,
            });
        }

        log::debug!(
            "Tribe '{}': {} wares, {} workers, {} buildings",
            raw.name,
            wares.len(),
            workers.len(),
            buildings.len()
        );

        Ok(Self {
            tribe: raw.name,
            wares,
            workers,
            buildings,
            carrier,
            ferry,
        })
    }

    pub fn nr_wares(&self) -> usize {
        self.wares.len()
    }

    pub fn nr_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn ware(&self, index: DescriptionIndex) -> Option<&WareDescr> {
        self.wares.get(index as usize)
    }

    pub fn worker(&self, index: DescriptionIndex) -> Option<&WorkerDescr> {
        self.workers.get(index as usize)
    }

    pub fn building(&self, index: DescriptionIndex) -> Option<&BuildingDescr> {
        self.buildings.get(index as usize)
    }

    pub fn ware_index(&self, name: &str) -> Option<DescriptionIndex> {
        self.wares
            .iter()
            .position(|w| w.name == name)
            .map(|i| i as DescriptionIndex)
    }

    pub fn worker_index(&self, name: &str) -> Option<DescriptionIndex> {
        self.workers
            .iter()
            .position(|w| w.name == name)
            .map(|i| i as DescriptionIndex)
    }

    pub fn building_index(&self, name: &str) -> Option<DescriptionIndex> {
        self.buildings
            .iter()
            .position(|b| b.name == name)
            .map(|i| i as DescriptionIndex)
    }

    /// First worker description of the given kind.
    pub fn worker_of_kind(&self, kind: WorkerKind) -> Option<DescriptionIndex> {
        self.workers
            .iter()
            .position(|w| w.kind == kind)
            .map(|i| i as DescriptionIndex)
    }

    pub fn carrier(&self) -> DescriptionIndex {
        self.carrier
    }

    pub fn ferry(&self) -> Option<DescriptionIndex> {
        self.ferry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tribe_loads() {
        let d = Descriptions::default_tribe().unwrap();
        assert_eq!(d.tribe, "frisians");
        assert_eq!(d.worker(d.carrier()).unwrap().name, "carrier");
        assert!(d.ferry().is_some());
        assert!(d.ware_index("planks").is_some());
    }

    #[test]
    fn test_soldier_buildcost_resolves() {
        let d = Descriptions::default_tribe().unwrap();
        let soldier = d.worker(d.worker_index("soldier").unwrap()).unwrap();
        let ax = d.ware_index("ax").unwrap();
        assert!(soldier.buildcost.contains(&(CostItem::Ware(ax), 1)));
        assert!(soldier.soldier.is_some());
        assert!(!soldier.is_buildable_from_nothing());
        assert!(d.worker(d.carrier()).unwrap().is_buildable_from_nothing());
    }

    #[test]
    fn test_unknown_input_ware_rejected() {
        let json = r#"{
            "name": "t",
            "wares": [],
            "workers": [{ "name": "carrier", "kind": "carrier" }],
            "buildings": [{ "name": "mill", "type": "productionsite",
                            "inputs": [{ "ware": "grain", "max_fill": 4 }],
                            "outputs": [], "work_ms": 1000 }]
        }"#;
        match Descriptions::from_json_str(json) {
            Err(DescriptionError::UnknownName { name, .. }) => assert_eq!(name, "grain"),
            other => panic!("expected unknown name, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_carrier_rejected() {
        let json = r#"{ "name": "t", "wares": [], "workers": [], "buildings": [] }"#;
        assert!(matches!(
            Descriptions::from_json_str(json),
            Err(DescriptionError::MissingCarrier(_))
        ));
    }

    #[test]
    fn test_duplicate_ware_rejected() {
        let json = r#"{ "name": "t", "wares": [{"name":"log"},{"name":"log"}],
                        "workers": [{ "name": "carrier", "kind": "carrier" }] }"#;
        assert!(matches!(
            Descriptions::from_json_str(json),
            Err(DescriptionError::Duplicate { kind: "ware", .. })
        ));
    }

    #[test]
    fn test_soldier_without_stats_rejected() {
        let json = r#"{ "name": "t",
                        "workers": [{ "name": "carrier", "kind": "carrier" },
                                    { "name": "soldier", "kind": "soldier" }] }"#;
        assert!(matches!(
            Descriptions::from_json_str(json),
            Err(DescriptionError::MissingSoldierStats(_))
        ));
    }
}
