//! Property algebra for additive animation composition.
//!
//! A [`PropertyKind`] tag selects, via lookup, the operator set
//! (`equal`/`add`/`scale`) used to compose animated values, and separately
//! the interpolation function for a calc mode. Only `Linear` interpolators
//! exist; every other calc mode returns `None` and the caller must treat an
//! absent interpolator as "do not animate this property smoothly".

use show_model::{CalcMode, PropertyKind, PropertyValue};

/// How values of one property kind combine.
///
/// Kinds without a meaningful sum (enum, string, bool) use the generic set:
/// `add` keeps the first operand and `scale` the value, so additive
/// composition degenerates to the base value instead of corrupting it.
pub struct OperatorSet {
    pub equal: fn(&PropertyValue, &PropertyValue) -> bool,
    pub add: fn(&PropertyValue, &PropertyValue) -> PropertyValue,
    pub scale: fn(f64, &PropertyValue) -> PropertyValue,
}

static GENERIC_OPS: OperatorSet = OperatorSet {
    equal: |a, b| a == b,
    add: |a, _b| a.clone(),
    scale: |_k, v| v.clone(),
};

static NUMBER_OPS: OperatorSet = OperatorSet {
    equal: |a, b| a.as_f64() == b.as_f64(),
    add: |a, b| match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => PropertyValue::Number(a + b),
        _ => a.clone(),
    },
    scale: |k, v| match v.as_f64() {
        Some(v) => PropertyValue::Number(k * v),
        None => v.clone(),
    },
};

static TUPLE_OPS: OperatorSet = OperatorSet {
    equal: |a, b| match (a.as_tuple(), b.as_tuple()) {
        (Some(a), Some(b)) => {
            debug_assert_eq!(a.len(), b.len(), "tuple length mismatch");
            a == b
        }
        _ => false,
    },
    add: |a, b| match (a.as_tuple(), b.as_tuple()) {
        (Some(a), Some(b)) => {
            debug_assert_eq!(a.len(), b.len(), "tuple length mismatch");
            PropertyValue::TupleNumber(a.iter().zip(b).map(|(a, b)| a + b).collect())
        }
        _ => a.clone(),
    },
    scale: |k, v| match v.as_tuple() {
        Some(v) => PropertyValue::TupleNumber(v.iter().map(|v| k * v).collect()),
        None => v.clone(),
    },
};

static COLOR_OPS: OperatorSet = OperatorSet {
    equal: |a, b| a.as_color() == b.as_color(),
    add: |a, b| match (a.as_color(), b.as_color()) {
        (Some(a), Some(b)) => PropertyValue::Color(a.add(&b)),
        _ => a.clone(),
    },
    scale: |k, v| match v.as_color() {
        Some(v) => PropertyValue::Color(v.scaled(k)),
        None => v.clone(),
    },
};

/// The operator set for a property kind.
pub fn operator_set(kind: PropertyKind) -> &'static OperatorSet {
    match kind {
        PropertyKind::Number => &NUMBER_OPS,
        PropertyKind::TupleNumber => &TUPLE_OPS,
        PropertyKind::Color => &COLOR_OPS,
        PropertyKind::Enum | PropertyKind::String | PropertyKind::Bool => &GENERIC_OPS,
    }
}

/// Interpolates between two values of the same kind at parameter `t` in [0, 1].
pub type Interpolator = fn(&PropertyValue, &PropertyValue, f64) -> PropertyValue;

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    (1.0 - t) * a + t * b
}

/// Look up the interpolator for a (calc mode, property kind) pair.
///
/// Only `Linear` over `Number`, `TupleNumber` and `Color` is registered.
/// `None` means the property does not animate smoothly; callers apply the
/// end value discretely instead.
pub fn interpolator(calc_mode: CalcMode, kind: PropertyKind) -> Option<Interpolator> {
    if calc_mode != CalcMode::Linear {
        log::debug!("interpolator: no interpolator registered for calc mode {calc_mode:?}");
        return None;
    }
    match kind {
        PropertyKind::Number => Some(|from, to, t| match (from.as_f64(), to.as_f64()) {
            (Some(from), Some(to)) => PropertyValue::Number(lerp(from, to, t)),
            _ => from.clone(),
        }),
        PropertyKind::TupleNumber => Some(|from, to, t| match (from.as_tuple(), to.as_tuple()) {
            (Some(from), Some(to)) => {
                debug_assert_eq!(from.len(), to.len(), "tuple length mismatch");
                PropertyValue::TupleNumber(
                    from.iter().zip(to).map(|(a, b)| lerp(*a, *b, t)).collect(),
                )
            }
            _ => from.clone(),
        }),
        PropertyKind::Color => Some(|from, to, t| match (from.as_color(), to.as_color()) {
            (Some(from), Some(to)) => {
                PropertyValue::Color(from.scaled(1.0 - t).add(&to.scaled(t)))
            }
            _ => from.clone(),
        }),
        PropertyKind::Enum | PropertyKind::String | PropertyKind::Bool => {
            log::debug!("interpolator: value kind {kind:?} has no interpolator");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use show_model::RgbColor;

    #[test]
    fn test_number_operator_set() {
        let ops = operator_set(PropertyKind::Number);
        let a = PropertyValue::Number(2.0);
        let b = PropertyValue::Number(3.0);
        assert!(!(ops.equal)(&a, &b));
        assert_eq!((ops.add)(&a, &b), PropertyValue::Number(5.0));
        assert_eq!((ops.scale)(4.0, &b), PropertyValue::Number(12.0));
    }

    #[test]
    fn test_tuple_operator_set_is_componentwise() {
        let ops = operator_set(PropertyKind::TupleNumber);
        let a = PropertyValue::TupleNumber(vec![1.0, 2.0]);
        let b = PropertyValue::TupleNumber(vec![10.0, 20.0]);
        assert_eq!(
            (ops.add)(&a, &b),
            PropertyValue::TupleNumber(vec![11.0, 22.0])
        );
        assert_eq!(
            (ops.scale)(0.5, &b),
            PropertyValue::TupleNumber(vec![5.0, 10.0])
        );
    }

    #[test]
    fn test_generic_operator_set_degenerates() {
        let ops = operator_set(PropertyKind::Bool);
        let a = PropertyValue::Bool(true);
        let b = PropertyValue::Bool(false);
        assert_eq!((ops.add)(&a, &b), a);
        assert_eq!((ops.scale)(3.0, &b), b);
    }

    #[test]
    fn test_linear_interpolators() {
        let lerp_num = interpolator(CalcMode::Linear, PropertyKind::Number).unwrap();
        assert_eq!(
            lerp_num(&PropertyValue::Number(0.0), &PropertyValue::Number(10.0), 0.25),
            PropertyValue::Number(2.5)
        );

        let lerp_color = interpolator(CalcMode::Linear, PropertyKind::Color).unwrap();
        let from = PropertyValue::Color(RgbColor::new(0.0, 0.0, 0.0));
        let to = PropertyValue::Color(RgbColor::new(1.0, 0.5, 0.0));
        assert_eq!(
            lerp_color(&from, &to, 0.5),
            PropertyValue::Color(RgbColor::new(0.5, 0.25, 0.0))
        );
    }

    #[test]
    fn test_absent_interpolators_return_none() {
        // Discrete/Paced/Spline are named but unregistered; the caller must
        // fall back to not animating smoothly.
        assert!(interpolator(CalcMode::Discrete, PropertyKind::Number).is_none());
        assert!(interpolator(CalcMode::Paced, PropertyKind::Number).is_none());
        assert!(interpolator(CalcMode::Spline, PropertyKind::Color).is_none());
        assert!(interpolator(CalcMode::Linear, PropertyKind::String).is_none());
    }
}
