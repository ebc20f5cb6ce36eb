//! Algebraic properties of search conditions.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use readmodel_core::store::{Comparison, Document, SearchCondition};
use serde_json::{Value, json};

fn leaf() -> impl Strategy<Value = SearchCondition> {
    (
        prop_oneof![Just("a"), Just("b"), Just("c")],
        prop_oneof![
            Just(Comparison::Eq),
            Just(Comparison::Ne),
            Just(Comparison::Lt),
            Just(Comparison::Lte),
            Just(Comparison::Gt),
            Just(Comparison::Gte),
        ],
        -5i64..5,
    )
        .prop_map(|(field, op, value)| SearchCondition::compare(field, op, value))
}

fn condition() -> impl Strategy<Value = SearchCondition> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(SearchCondition::And),
            prop::collection::vec(inner.clone(), 0..3).prop_map(SearchCondition::Or),
            inner.prop_map(SearchCondition::not),
        ]
    })
}

fn document() -> impl Strategy<Value = Document> {
    (
        prop::option::of(-5i64..5),
        prop::option::of(-5i64..5),
        prop::option::of(-5i64..5),
    )
        .prop_map(|(a, b, c)| {
            let mut doc = Document::new();
            for (field, value) in [("a", a), ("b", b), ("c", c)] {
                if let Some(value) = value {
                    doc.insert(field.to_string(), json!(value));
                }
            }
            doc
        })
}

proptest! {
    #[test]
    fn double_negation_is_identity(c in condition(), d in document()) {
        let twice = SearchCondition::not(SearchCondition::not(c.clone()));
        prop_assert_eq!(twice.matches(&d), c.matches(&d));
    }

    #[test]
    fn de_morgan(x in condition(), y in condition(), d in document()) {
        let lhs = SearchCondition::not(SearchCondition::and([x.clone(), y.clone()]));
        let rhs = SearchCondition::or([SearchCondition::not(x), SearchCondition::not(y)]);
        prop_assert_eq!(lhs.matches(&d), rhs.matches(&d));
    }

    #[test]
    fn eq_and_ne_are_complementary(field in "[abc]", value in -5i64..5, d in document()) {
        let eq = SearchCondition::eq(field.clone(), value);
        let ne = SearchCondition::ne(field, value);
        prop_assert_ne!(eq.matches(&d), ne.matches(&d));
    }

    #[test]
    fn lte_is_lt_or_eq_for_present_fields(value in -5i64..5, actual in -5i64..5) {
        let mut d = Document::new();
        d.insert("a".to_string(), json!(actual));
        let lte = SearchCondition::compare("a", Comparison::Lte, value).matches(&d);
        let lt = SearchCondition::compare("a", Comparison::Lt, value).matches(&d);
        let eq = SearchCondition::eq("a", value).matches(&d);
        prop_assert_eq!(lte, lt || eq);
    }

    #[test]
    fn document_form_parses_to_same_semantics(field in "[abc]", value in -5i64..5, d in document()) {
        let parsed = SearchCondition::from_json(&json!({ field.clone(): { "$gte": value } })).unwrap();
        let built = SearchCondition::compare(field, Comparison::Gte, Value::from(value));
        prop_assert_eq!(parsed.matches(&d), built.matches(&d));
    }
}
