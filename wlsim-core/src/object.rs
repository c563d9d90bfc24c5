//! # Object manager
//!
//! Every simulation entity is a [`MapObject`] stored in the [`ObjectManager`]
//! under a unique [`Serial`]. Serials are assigned monotonically and never
//! reused, so a serial held by another object either resolves to the same
//! entity or to nothing. Cross references are therefore stored as serials
//! (plain or typed via [`OPtr`]) and resolved at use time.
//!
//! Entity kinds are composed, not inherited: a common core (serial, owner)
//! plus one [`Body`] variant. Behaviour shared between variants is expressed
//! through small capability traits ([`HasTaskStack`], [`Attackable`],
//! [`SoldierControl`]).

use crate::battle::Battle;
use crate::bob::{Bob, State};
use crate::building::Building;
use crate::geometry::{Coords, Map};
use crate::player::PlayerNumber;
use crate::transport::{Flag, Road, WareInstance};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// Game time in milliseconds.
pub type Time = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Serial(pub u32);

/// While a savegame is being loaded, every serial read passes through the
/// load-time [`ObjectIndex`](crate::persistence::ObjectIndex).
impl<'de> Deserialize<'de> for Serial {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u32::deserialize(deserializer)?;
        Ok(crate::persistence::remap_loaded_serial(raw))
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed weak reference. Resolving a reference to a destroyed object (or one
/// of another kind) yields `None`.
pub struct OPtr<T> {
    serial: Option<Serial>,
    _kind: PhantomData<fn() -> T>,
}

impl<T> OPtr<T> {
    pub const fn null() -> Self {
        Self {
            serial: None,
            _kind: PhantomData,
        }
    }

    pub const fn new(serial: Serial) -> Self {
        Self {
            serial: Some(serial),
            _kind: PhantomData,
        }
    }

    pub fn serial(&self) -> Option<Serial> {
        self.serial
    }

    pub fn is_null(&self) -> bool {
        self.serial.is_none()
    }

    pub fn is(&self, serial: Serial) -> bool {
        self.serial == Some(serial)
    }
}

impl<T> From<Option<Serial>> for OPtr<T> {
    fn from(serial: Option<Serial>) -> Self {
        Self {
            serial,
            _kind: PhantomData,
        }
    }
}

impl<T> Clone for OPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for OPtr<T> {}

impl<T> PartialEq for OPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.serial == other.serial
    }
}

impl<T> Eq for OPtr<T> {}

impl<T> Default for OPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for OPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.serial {
            Some(s) => write!(f, "OPtr({s})"),
            None => write!(f, "OPtr(null)"),
        }
    }
}

impl<T> Serialize for OPtr<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.serial.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for OPtr<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::from(Option::<Serial>::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    Flag(Flag),
    Road(Road),
    Building(Building),
    Ware(WareInstance),
    Bob(Box<Bob>),
    Battle(Battle),
}

impl Body {
    pub fn type_name(&self) -> &'static str {
        match self {
            Body::Flag(_) => "flag",
            Body::Road(r) => r.kind.name(),
            Body::Building(_) => "building",
            Body::Ware(_) => "ware",
            Body::Bob(_) => "bob",
            Body::Battle(_) => "battle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapObject {
    pub serial: Serial,
    pub owner: PlayerNumber,
    pub body: Body,
}

/// Body variants that can be resolved from a serial.
pub trait ObjectKind: Sized {
    fn from_body(body: &Body) -> Option<&Self>;
    fn from_body_mut(body: &mut Body) -> Option<&mut Self>;
}

macro_rules! object_kind {
    ($ty:ty, $variant:ident) => {
        impl ObjectKind for $ty {
            fn from_body(body: &Body) -> Option<&Self> {
                match body {
                    Body::$variant(x) => Some(x),
                    _ => None,
                }
            }
            fn from_body_mut(body: &mut Body) -> Option<&mut Self> {
                match body {
                    Body::$variant(x) => Some(x),
                    _ => None,
                }
            }
        }
    };
}

object_kind!(Flag, Flag);
object_kind!(Road, Road);
object_kind!(Building, Building);
object_kind!(WareInstance, Ware);
object_kind!(Battle, Battle);

impl ObjectKind for Bob {
    fn from_body(body: &Body) -> Option<&Self> {
        match body {
            Body::Bob(b) => Some(b.as_ref()),
            _ => None,
        }
    }
    fn from_body_mut(body: &mut Body) -> Option<&mut Self> {
        match body {
            Body::Bob(b) => Some(b.as_mut()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectManager {
    objects: BTreeMap<Serial, MapObject>,
    last_serial: u32,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, owner: PlayerNumber, body: Body) -> Serial {
        self.last_serial += 1;
        let serial = Serial(self.last_serial);
        log::trace!("MO({}): created {}", serial, body.type_name());
        self.objects.insert(
            serial,
            MapObject {
                serial,
                owner,
                body,
            },
        );
        serial
    }

    pub fn remove(&mut self, serial: Serial) -> Option<MapObject> {
        self.objects.remove(&serial)
    }

    pub fn contains(&self, serial: Serial) -> bool {
        self.objects.contains_key(&serial)
    }

    pub fn object(&self, serial: Serial) -> Option<&MapObject> {
        self.objects.get(&serial)
    }

    pub fn object_mut(&mut self, serial: Serial) -> Option<&mut MapObject> {
        self.objects.get_mut(&serial)
    }

    pub fn get<T: ObjectKind>(&self, serial: Serial) -> Option<&T> {
        self.objects.get(&serial).and_then(|o| T::from_body(&o.body))
    }

    pub fn get_mut<T: ObjectKind>(&mut self, serial: Serial) -> Option<&mut T> {
        self.objects
            .get_mut(&serial)
            .and_then(|o| T::from_body_mut(&mut o.body))
    }

    pub fn resolve<T: ObjectKind>(&self, ptr: OPtr<T>) -> Option<&T> {
        ptr.serial().and_then(|s| self.get(s))
    }

    pub fn owner(&self, serial: Serial) -> Option<PlayerNumber> {
        self.objects.get(&serial).map(|o| o.owner)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn last_serial(&self) -> u32 {
        self.last_serial
    }

    /// Live objects in serial order.
    pub fn iter(&self) -> impl Iterator<Item = &MapObject> {
        self.objects.values()
    }

    pub fn serials(&self) -> Vec<Serial> {
        self.objects.keys().copied().collect()
    }

    /// Serials of all objects of kind `T`, in serial order.
    pub fn serials_of<T: ObjectKind>(&self) -> Vec<Serial> {
        self.objects
            .values()
            .filter(|o| T::from_body(&o.body).is_some())
            .map(|o| o.serial)
            .collect()
    }

    /// Rebuild from saved objects. Serials must already be final.
    pub(crate) fn from_objects(objects: Vec<MapObject>, last_serial: u32) -> Self {
        Self {
            objects: objects.into_iter().map(|o| (o.serial, o)).collect(),
            last_serial,
        }
    }
}

/// Objects driven by a task stack.
pub trait HasTaskStack {
    fn stack(&self) -> &[State];

    fn top_state(&self) -> Option<&State> {
        self.stack().last()
    }

    fn signal(&self) -> &str;
}

/// Objects that enemy soldiers may attack.
pub trait Attackable {
    fn can_be_attacked(&self) -> bool;

    /// Node attackers walk to before they ask for a defender.
    fn attack_target_position(&self, map: &Map) -> Coords;
}

/// Objects that station soldiers.
pub trait SoldierControl {
    fn stationed_soldiers(&self) -> &[Serial];

    fn soldier_capacity(&self) -> u32;

    fn missing_soldiers(&self) -> u32 {
        self.soldier_capacity()
            .saturating_sub(self.stationed_soldiers().len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Flag;

    #[test]
    fn test_serials_are_never_reused() {
        let mut om = ObjectManager::new();
        let a = om.insert(1, Body::Flag(Flag::new(Coords::new(1, 1), 8)));
        om.remove(a);
        let b = om.insert(1, Body::Flag(Flag::new(Coords::new(2, 2), 8)));
        assert_ne!(a, b);
        assert!(om.get::<Flag>(a).is_none());
        assert!(om.get::<Flag>(b).is_some());
    }

    #[test]
    fn test_typed_lookup_rejects_other_kinds() {
        let mut om = ObjectManager::new();
        let f = om.insert(1, Body::Flag(Flag::new(Coords::new(1, 1), 8)));
        assert!(om.get::<Road>(f).is_none());
        let ptr: OPtr<Flag> = OPtr::new(f);
        assert!(om.resolve(ptr).is_some());
        assert!(om.resolve(OPtr::<Flag>::null()).is_none());
    }

    #[test]
    fn test_optr_serializes_as_option() {
        let ptr: OPtr<Flag> = OPtr::new(Serial(7));
        assert_eq!(serde_json::to_string(&ptr).unwrap(), "7");
        let back: OPtr<Flag> = serde_json::from_str("null").unwrap();
        assert!(back.is_null());
    }
}
