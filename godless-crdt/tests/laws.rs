//! Property tests for the semilattice laws and the canonical codec.

use godless_crdt::{codec, Entry, Namespace, Row, Table};
use proptest::prelude::*;

// Small alphabets on purpose: collisions between generated names are what
// exercise the key-wise join paths.
fn arb_entry() -> impl Strategy<Value = Entry> {
    prop::collection::vec("[a-d]{0,3}", 0..4).prop_map(Entry::make)
}

fn arb_row() -> impl Strategy<Value = Row> {
    prop::collection::vec(("[a-c]{1,2}", arb_entry()), 0..4)
        .prop_map(|entries| Row::make(entries.into_iter().map(|(name, e)| (name.into(), e))))
}

fn arb_table() -> impl Strategy<Value = Table> {
    prop::collection::vec(("[a-c]{1,2}", arb_row()), 0..4)
        .prop_map(|rows| Table::make(rows.into_iter().map(|(name, r)| (name.into(), r))))
}

fn arb_namespace() -> impl Strategy<Value = Namespace> {
    prop::collection::vec(("[a-c]{1,2}", arb_table()), 0..4)
        .prop_map(|tables| Namespace::make(tables.into_iter().map(|(name, t)| (name.into(), t))))
}

proptest! {
    #[test]
    fn join_is_commutative(a in arb_namespace(), b in arb_namespace()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
    }

    #[test]
    fn join_is_associative(
        a in arb_namespace(),
        b in arb_namespace(),
        c in arb_namespace(),
    ) {
        prop_assert_eq!(a.join(&b).join(&c), a.join(&b.join(&c)));
    }

    #[test]
    fn join_is_idempotent(a in arb_namespace()) {
        prop_assert_eq!(a.join(&a), a);
    }

    #[test]
    fn empty_is_identity(a in arb_namespace()) {
        prop_assert_eq!(a.join(&Namespace::empty()), a.clone());
        prop_assert_eq!(Namespace::empty().join(&a), a);
    }

    #[test]
    fn table_join_laws(a in arb_table(), b in arb_table()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
        prop_assert_eq!(a.join(&a), a.clone());
        prop_assert_eq!(a.join(&Table::empty()), a);
    }

    #[test]
    fn row_join_laws(a in arb_row(), b in arb_row()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
        prop_assert_eq!(a.join(&a), a.clone());
        prop_assert_eq!(a.join(&Row::empty()), a);
    }

    #[test]
    fn entry_join_laws(a in arb_entry(), b in arb_entry()) {
        prop_assert_eq!(a.join(&b), b.join(&a));
        prop_assert_eq!(a.join(&a), a.clone());
        prop_assert_eq!(a.join(&Entry::empty()), a);
    }

    // Constructors canonicalize, so a generated value is its own stripped
    // form and the decode must reproduce it exactly.
    #[test]
    fn encode_decode_roundtrip(a in arb_namespace()) {
        let bytes = codec::encode_namespace(&a);
        let decoded = codec::decode_namespace(&bytes).unwrap();
        prop_assert_eq!(&decoded, &a);
        prop_assert_eq!(codec::encode_namespace(&decoded), bytes);
    }

    #[test]
    fn encoding_is_stable(a in arb_namespace(), b in arb_namespace()) {
        prop_assert_eq!(codec::encode_namespace(&a), codec::encode_namespace(&a));

        // Semantically equal values built along different paths must agree
        // on bytes.
        let left = a.join(&b);
        let right = b.join(&a);
        prop_assert_eq!(codec::encode_namespace(&left), codec::encode_namespace(&right));
    }

    #[test]
    fn strict_decode_accepts_canonical_bytes(a in arb_namespace()) {
        let bytes = codec::encode_namespace(&a);
        prop_assert_eq!(codec::decode_namespace_strict(&bytes).unwrap(), a);
    }

    #[test]
    fn stream_roundtrip(a in arb_namespace()) {
        prop_assert_eq!(Namespace::from_stream(a.stream()), a);
    }

    #[test]
    fn stream_fold_is_order_insensitive(a in arb_namespace()) {
        let mut tuples: Vec<_> = a.stream().collect();
        tuples.reverse();
        prop_assert_eq!(Namespace::from_stream(tuples), a);
    }
}
