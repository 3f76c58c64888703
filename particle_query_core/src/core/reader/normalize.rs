use crate::{
    SPEED_OF_LIGHT,
    core::{planner::selection::SelectionMask, quantity::Quantity},
};

/// Unit transform from stored values to the values users query on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    None,
    /// `value + positionOffset`
    PositionOffset,
    /// `value * 1 / (mass * c)`
    MomentumMass,
}

impl Normalization {
    pub fn for_quantity(quantity: Quantity) -> Self {
        if quantity.is_position() {
            Normalization::PositionOffset
        } else if quantity.is_momentum() {
            Normalization::MomentumMass
        } else {
            Normalization::None
        }
    }
}

/// A normalization bound to its per-row support values (offsets or masses).
///
/// Whether the momentum transform applies at all is decided once, over the
/// full support column: it only applies when every mass is non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredTransform {
    kind: Normalization,
    support: Vec<f64>,
    active: bool,
}

impl DeferredTransform {
    pub fn new(kind: Normalization, support: Vec<f64>) -> Self {
        let active = match kind {
            Normalization::None => false,
            Normalization::PositionOffset => true,
            Normalization::MomentumMass => support.iter().all(|m| *m != 0.0),
        };
        Self { kind, support, active }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn len(&self) -> usize {
        self.support.len()
    }

    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    /// Transformed value of `raw` at buffer row `row`.
    #[inline]
    pub fn value(&self, raw: f64, row: usize) -> f64 {
        if !self.active {
            return raw;
        }
        match self.kind {
            Normalization::PositionOffset => raw + self.support[row],
            Normalization::MomentumMass => raw * (1.0 / (self.support[row] * SPEED_OF_LIGHT)),
            Normalization::None => raw,
        }
    }

    pub fn apply_in_place(&self, values: &mut [f64]) {
        debug_assert_eq!(values.len(), self.support.len());
        if !self.active {
            return;
        }
        for (row, v) in values.iter_mut().enumerate() {
            *v = self.value(*v, row);
        }
    }

    /// The same transform restricted to the rows kept by `mask`.
    pub fn filtered(&self, mask: &SelectionMask) -> DeferredTransform {
        DeferredTransform {
            kind: self.kind,
            support: mask.apply(&self.support),
            active: self.active,
        }
    }
}
