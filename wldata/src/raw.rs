//! Serde mirror of the tribe JSON files.
//!
//! These types only describe the on-disk shape; names are resolved to
//! indices in [`crate::Descriptions::from_raw`].

use crate::WorkerKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_walk_step() -> u32 {
    1800
}

fn default_vision() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTribe {
    pub name: String,
    #[serde(default)]
    pub wares: Vec<RawWare>,
    #[serde(default)]
    pub workers: Vec<RawWorker>,
    #[serde(default)]
    pub buildings: Vec<RawBuilding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWare {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWorker {
    pub name: String,
    pub kind: WorkerKind,
    #[serde(default = "default_walk_step")]
    pub walk_step_ms: u32,
    #[serde(default)]
    pub buildcost: BTreeMap<String, u32>,
    #[serde(default = "default_vision")]
    pub vision_range: u32,
    #[serde(default)]
    pub soldier: Option<RawSoldierStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSoldierStats {
    pub max_health: u32,
    pub attack_min: u32,
    pub attack_max: u32,
    pub defense: u32,
    pub evade: u32,
    pub retreat_health_percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInput {
    pub ware: String,
    pub max_fill: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawBuildingKind {
    Warehouse,
    #[serde(rename = "productionsite")]
    ProductionSite {
        #[serde(default)]
        inputs: Vec<RawInput>,
        #[serde(default)]
        outputs: Vec<String>,
        work_ms: u32,
    },
    #[serde(rename = "militarysite")]
    MilitarySite {
        max_soldiers: u32,
        conquers: u32,
        #[serde(default)]
        heal_per_second: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBuilding {
    pub name: String,
    #[serde(flatten)]
    pub kind: RawBuildingKind,
    #[serde(default = "default_vision")]
    pub vision_range: u32,
}
