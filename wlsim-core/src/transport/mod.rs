//! # Transport network
//!
//! Flags are the nodes and roads (or waterways) the edges of each player's
//! transport graph. Every connected component forms one ware economy and,
//! ignoring waterways, one worker economy. Economies match [`Request`]s with
//! [`Supply`]s and move the chosen items via [`Transfer`]s, one hop at a
//! time.

pub mod economy;
pub mod flag;
pub mod logistics;
pub mod network;
pub mod road;
pub mod router;
pub mod ware;

pub use economy::Economy;
pub use flag::{Flag, FlagJob, FlagJobKind, PendingWare};
pub use logistics::{Logistics, NextStep, Request, RequestTarget, Supply, SupplySource, Transfer};
pub use road::{Road, RoadKind, FLAG_END, FLAG_START};
pub use router::FlagGraph;
pub use ware::WareInstance;

pub type EconomyId = u32;
pub type RequestId = u32;
pub type SupplyId = u32;
pub type TransferId = u32;
