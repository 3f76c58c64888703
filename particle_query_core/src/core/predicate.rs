use smallvec::SmallVec;

use crate::core::{
    error::{QueryError, Result},
    quantity::{Quantity, QuantityMap},
};

/// One side-open or closed range constraint on a quantity.
///
/// `None` and infinite values both mean "no constraint on that side".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bound {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bound {
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn between(lower: f64, upper: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }

    pub fn above(lower: f64) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    pub fn below(upper: f64) -> Self {
        Self {
            lower: None,
            upper: Some(upper),
        }
    }

    /// Needed for output only.
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[inline]
    pub fn effective_lower(&self) -> Option<f64> {
        self.lower.filter(|v| !v.is_infinite())
    }

    #[inline]
    pub fn effective_upper(&self) -> Option<f64> {
        self.upper.filter(|v| !v.is_infinite())
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.effective_lower().is_none() && self.effective_upper().is_none()
    }

    /// Lower bound as an index lookup argument (`-inf` when open).
    #[inline]
    pub fn lower_or_neg_inf(&self) -> f64 {
        self.effective_lower().unwrap_or(f64::NEG_INFINITY)
    }

    /// Upper bound as an index lookup argument (`+inf` when open).
    #[inline]
    pub fn upper_or_inf(&self) -> f64 {
        self.effective_upper().unwrap_or(f64::INFINITY)
    }

    /// Rescales both bounds. Used to move momentum bounds between the
    /// normalized unit space and the index's internal unit space.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            lower: self.effective_lower().map(|v| v * factor),
            upper: self.effective_upper().map(|v| v * factor),
        }
    }

    /// Strict comparison on both sides.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        if let Some(lower) = self.effective_lower() {
            if !(value > lower) {
                return false;
            }
        }
        if let Some(upper) = self.effective_upper() {
            if !(value < upper) {
                return false;
            }
        }
        true
    }
}

/// Conjunctive range predicate over the quantities of one species.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    bounds: QuantityMap<Bound>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, quantity: Quantity, bound: Bound) -> Self {
        self.bounds.insert(quantity, bound);
        self
    }

    pub fn insert(&mut self, quantity: Quantity, bound: Bound) -> Option<Bound> {
        self.bounds.insert(quantity, bound)
    }

    pub fn get(&self, quantity: Quantity) -> Option<&Bound> {
        self.bounds.get(quantity)
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Quantity, &Bound)> {
        self.bounds.iter()
    }

    pub fn quantities(&self) -> SmallVec<[Quantity; 8]> {
        self.bounds.keys().collect()
    }

    /// Range predicates only make sense on the numeric physical quantities.
    pub fn validate(&self) -> Result<()> {
        for (q, bound) in self.iter() {
            if q.is_identity() {
                return Err(QueryError::MalformedPredicate(
                    "range predicates on particle identities are not supported".to_string(),
                ));
            }
            if bound.lower.is_some_and(f64::is_nan) || bound.upper.is_some_and(f64::is_nan) {
                return Err(QueryError::MalformedPredicate(format!("bound of {} is NaN", q)));
            }
        }
        Ok(())
    }
}

impl FromIterator<(Quantity, Bound)> for Envelope {
    fn from_iter<I: IntoIterator<Item = (Quantity, Bound)>>(iter: I) -> Self {
        Self {
            bounds: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_bounds_are_unbounded() {
        let b = Bound::new(Some(f64::NEG_INFINITY), Some(f64::INFINITY));
        assert!(b.is_unbounded());
        assert!(b.contains(1e300));
        assert_eq!(b.lower_or_neg_inf(), f64::NEG_INFINITY);
    }

    #[test]
    fn contains_is_strict() {
        let b = Bound::between(0.0, 1.0);
        assert!(!b.contains(0.0));
        assert!(b.contains(0.5));
        assert!(!b.contains(1.0));
        assert!(!b.contains(f64::NAN));
    }

    #[test]
    fn scaled_keeps_open_sides_open() {
        let b = Bound::above(2.0).scaled(0.5);
        assert_eq!(b.lower, Some(1.0));
        assert_eq!(b.upper, None);
    }

    #[test]
    fn identity_predicates_are_rejected() {
        let env = Envelope::new().with(Quantity::Id, Bound::between(0.0, 10.0));
        assert!(matches!(env.validate(), Err(QueryError::MalformedPredicate(_))));
    }
}
