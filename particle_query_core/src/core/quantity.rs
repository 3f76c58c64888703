use std::fmt;
use std::str::FromStr;

use crate::core::error::QueryError;

/// Per-particle quantities stored by a particle-in-cell species.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    X = 0,
    Y = 1,
    Z = 2,
    Ux = 3,
    Uy = 4,
    Uz = 5,
    W = 6,
    Id = 7,
}

impl Quantity {
    pub const COUNT: usize = 8;

    pub const ALL: [Quantity; Quantity::COUNT] = [
        Quantity::X,
        Quantity::Y,
        Quantity::Z,
        Quantity::Ux,
        Quantity::Uy,
        Quantity::Uz,
        Quantity::W,
        Quantity::Id,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Quantity::X => "x",
            Quantity::Y => "y",
            Quantity::Z => "z",
            Quantity::Ux => "ux",
            Quantity::Uy => "uy",
            Quantity::Uz => "uz",
            Quantity::W => "w",
            Quantity::Id => "id",
        }
    }

    pub fn record(self) -> Record {
        match self {
            Quantity::X | Quantity::Y | Quantity::Z => Record::Position,
            Quantity::Ux | Quantity::Uy | Quantity::Uz => Record::Momentum,
            Quantity::W => Record::Weighting,
            Quantity::Id => Record::Id,
        }
    }

    pub fn axis(self) -> Option<Axis> {
        match self {
            Quantity::X | Quantity::Ux => Some(Axis::X),
            Quantity::Y | Quantity::Uy => Some(Axis::Y),
            Quantity::Z | Quantity::Uz => Some(Axis::Z),
            Quantity::W | Quantity::Id => None,
        }
    }

    #[inline]
    pub fn is_position(self) -> bool {
        self.record() == Record::Position
    }

    #[inline]
    pub fn is_momentum(self) -> bool {
        self.record() == Record::Momentum
    }

    /// The identity column is the only unsigned integer column.
    #[inline]
    pub fn is_identity(self) -> bool {
        self == Quantity::Id
    }

    /// Inverse of [`Record`] + [`Axis`] for the vector records.
    pub fn from_record_axis(record: Record, axis: Axis) -> Option<Quantity> {
        match (record, axis) {
            (Record::Position, Axis::X) => Some(Quantity::X),
            (Record::Position, Axis::Y) => Some(Quantity::Y),
            (Record::Position, Axis::Z) => Some(Quantity::Z),
            (Record::Momentum, Axis::X) => Some(Quantity::Ux),
            (Record::Momentum, Axis::Y) => Some(Quantity::Uy),
            (Record::Momentum, Axis::Z) => Some(Quantity::Uz),
            _ => None,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Quantity {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::ALL
            .iter()
            .copied()
            .find(|q| q.name() == s)
            .ok_or_else(|| QueryError::MalformedPredicate(format!("unknown quantity '{}'", s)))
    }
}

/// Physical record a quantity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Record {
    Position,
    Momentum,
    Weighting,
    Id,
}

impl Record {
    pub fn name(self) -> &'static str {
        match self {
            Record::Position => "position",
            Record::Momentum => "momentum",
            Record::Weighting => "weighting",
            Record::Id => "id",
        }
    }

    /// Quantities of a vector record, in axis order.
    pub fn components(self) -> &'static [Quantity] {
        match self {
            Record::Position => &[Quantity::X, Quantity::Y, Quantity::Z],
            Record::Momentum => &[Quantity::Ux, Quantity::Uy, Quantity::Uz],
            Record::Weighting => &[Quantity::W],
            Record::Id => &[Quantity::Id],
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Fixed-slot map keyed by [`Quantity`].
///
/// Iteration always follows the declaration order of `Quantity`, so two maps
/// built from the same keys iterate identically.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityMap<T> {
    slots: [Option<T>; Quantity::COUNT],
}

impl<T> Default for QuantityMap<T> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl<T> QuantityMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, quantity: Quantity) -> Option<&T> {
        self.slots[quantity.index()].as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, quantity: Quantity) -> Option<&mut T> {
        self.slots[quantity.index()].as_mut()
    }

    pub fn insert(&mut self, quantity: Quantity, value: T) -> Option<T> {
        self.slots[quantity.index()].replace(value)
    }

    pub fn remove(&mut self, quantity: Quantity) -> Option<T> {
        self.slots[quantity.index()].take()
    }

    #[inline]
    pub fn contains(&self, quantity: Quantity) -> bool {
        self.slots[quantity.index()].is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Quantity, &T)> {
        Quantity::ALL
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(q, s)| s.as_ref().map(|v| (*q, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = Quantity> + '_ {
        self.iter().map(|(q, _)| q)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }
}

impl<T> FromIterator<(Quantity, T)> for QuantityMap<T> {
    fn from_iter<I: IntoIterator<Item = (Quantity, T)>>(iter: I) -> Self {
        let mut map = QuantityMap::new();
        for (q, v) in iter {
            map.insert(q, v);
        }
        map
    }
}
