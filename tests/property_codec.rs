//! Property-based codec tests (proptest).
//!
//! Round-trip laws over generated typed values:
//! - tagged JSON: decode(encode(v)) == v
//! - raw lowering: from_cvalue(v).into_cvalue(v.ctype()) == v
//! - preview truncation never exceeds the requested width

use proptest::prelude::*;

use constellation::value::codec::{decode_value, encode_value};
use constellation::value::{value_preview, CType, CValue, RawValue};
use std::collections::BTreeMap;

fn arb_primitive() -> impl Strategy<Value = CValue> {
    prop_oneof![
        any::<i64>().prop_map(CValue::int),
        any::<bool>().prop_map(CValue::boolean),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(CValue::str),
        // Finite floats only: NaN breaks equality and has its own test
        (-1.0e9f64..1.0e9f64).prop_map(CValue::float),
    ]
}

fn arb_cvalue() -> impl Strategy<Value = CValue> {
    arb_primitive().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            // Homogeneous primitive lists
            prop::collection::vec(any::<i64>(), 0..4).prop_map(|xs| {
                CValue::list(CType::Int, xs.into_iter().map(CValue::int).collect()).unwrap()
            }),
            prop::collection::vec("[a-z]{0,6}", 0..4).prop_map(|xs| {
                CValue::list(CType::String, xs.into_iter().map(CValue::str).collect()).unwrap()
            }),
            // String-keyed maps with integer values
            prop::collection::vec(("[a-z]{1,5}", any::<i64>()), 0..3).prop_map(|entries| {
                CValue::map(
                    CType::String,
                    CType::Int,
                    entries
                        .into_iter()
                        .map(|(k, v)| (CValue::str(k), CValue::int(v)))
                        .collect(),
                )
                .unwrap()
            }),
            // Products over arbitrary nested values
            prop::collection::btree_map("[a-z]{1,6}", inner.clone(), 1..4).prop_map(|fields| {
                let structure: BTreeMap<String, CType> = fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.ctype()))
                    .collect();
                CValue::product(structure, fields).unwrap()
            }),
            // Two-variant unions, always tagged "left"
            inner.clone().prop_map(|value| {
                let mut variants = BTreeMap::new();
                variants.insert("left".to_string(), value.ctype());
                variants.insert("right".to_string(), CType::Boolean);
                CValue::union(variants, "left", value).unwrap()
            }),
            // Optionals
            inner.clone().prop_map(CValue::some),
            inner.prop_map(|value| CValue::none(value.ctype())),
        ]
    })
}

proptest! {
    #[test]
    fn prop_tagged_json_round_trip(value in arb_cvalue()) {
        let encoded = encode_value(&value);
        let decoded = decode_value(&encoded).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn prop_raw_lowering_round_trip(value in arb_cvalue()) {
        let ty = value.ctype();
        let raw = RawValue::from_cvalue(&value);
        let back = raw.into_cvalue(&ty).unwrap();
        prop_assert_eq!(back, value);
    }

    #[test]
    fn prop_type_derivation_is_stable(value in arb_cvalue()) {
        // Decoding never changes the derived type
        let encoded = encode_value(&value);
        let decoded = decode_value(&encoded).unwrap();
        prop_assert_eq!(decoded.ctype(), value.ctype());
    }

    #[test]
    fn prop_preview_respects_width(value in arb_cvalue(), width in 0usize..120) {
        let preview = value_preview(&value, width);
        if width <= 3 {
            prop_assert_eq!(preview.as_str(), "...");
        } else {
            prop_assert!(preview.chars().count() <= width.max(3));
        }
    }
}
