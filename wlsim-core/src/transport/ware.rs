use crate::object::Serial;
use crate::transport::{SupplyId, TransferId};
use serde::{Deserialize, Serialize};
use wldata::DescriptionIndex;

/// A single ware item travelling through the economy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WareInstance {
    pub descr: DescriptionIndex,
    /// Flag, building or bob (carrier) currently holding the ware.
    pub location: Option<Serial>,
    pub transfer: Option<TransferId>,
    /// Set while the ware offers itself as an idle supply.
    pub supply: Option<SupplyId>,
    /// Cached next hop of the current transfer.
    pub nextstep: Option<Serial>,
}

impl WareInstance {
    pub fn new(descr: DescriptionIndex) -> Self {
        Self {
            descr,
            location: None,
            transfer: None,
            supply: None,
            nextstep: None,
        }
    }
}
