//! Tests for incremental rebuilds
//!
//! These tests verify:
//! - New inputs shadow base entries on key collision
//! - Entries not overwritten survive a derive
//! - A derive with no inputs is an identity rebuild
//! - Varied-value derives re-pack the extend region correctly

use stashkv::{
    build_dict, build_dict_varied, build_set, DataReader, Hashtable, SliceReader, StashError,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn streams<'a>(
    list: &[(&'a [&'a [u8]], &'a [&'a [u8]])],
) -> Vec<Box<dyn DataReader + Send + 'a>> {
    list.iter()
        .map(|&(keys, vals)| Box::new(SliceReader::new(keys, vals)) as Box<dyn DataReader + Send + 'a>)
        .collect()
}

fn dict_table(keys: &[&[u8]], vals: &[&[u8]]) -> Hashtable {
    let mut inputs = streams(&[(keys, vals)]);
    let mut sink: Vec<u8> = Vec::new();
    build_dict(&mut inputs, &mut sink).unwrap();
    Hashtable::from_bytes(sink).unwrap()
}

// =============================================================================
// Shadowing
// =============================================================================

#[test]
fn test_derive_shadow() {
    let base = dict_table(&[b"a", b"b"], &[b"1", b"2"]);

    let keys: &[&[u8]] = &[b"a", b"c"];
    let vals: &[&[u8]] = &[b"9", b"3"];
    let mut inputs = streams(&[(keys, vals)]);
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut inputs, &mut sink).unwrap();
    let merged = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(merged.item(), 3);
    assert_eq!(merged.search(b"a"), Some(&b"9"[..]), "new input wins");
    assert_eq!(merged.search(b"b"), Some(&b"2"[..]), "untouched entry survives");
    assert_eq!(merged.search(b"c"), Some(&b"3"[..]), "new key appears");
}

#[test]
fn test_derive_key_set_union() {
    let keys: &[&[u8]] = &[b"aaa", b"bbb"];
    let mut inputs = streams(&[(keys, &[])]);
    let mut sink: Vec<u8> = Vec::new();
    build_set(&mut inputs, &mut sink).unwrap();
    let base = Hashtable::from_bytes(sink).unwrap();

    let more: &[&[u8]] = &[b"bbb", b"ccc", b"ddd"];
    let mut inputs = streams(&[(more, &[])]);
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut inputs, &mut sink).unwrap();
    let merged = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(merged.item(), 4);
    for key in [b"aaa", b"bbb", b"ccc", b"ddd"] {
        assert!(merged.search(key).is_some(), "lost {:?}", key);
    }
}

#[test]
fn test_derive_large_overlap() {
    let keys: Vec<Vec<u8>> = (0..1000u32).map(|i| format!("{:05}", i).into_bytes()).collect();
    let vals: Vec<Vec<u8>> = (0..1000u32).map(|i| format!("old-{:04}", i).into_bytes()).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    let val_refs: Vec<&[u8]> = vals.iter().map(|v| v.as_slice()).collect();
    let base = dict_table(&key_refs, &val_refs);

    // Overwrite the lower half, add 500 fresh keys.
    let new_keys: Vec<Vec<u8>> = (0..1000u32)
        .map(|i| format!("{:05}", if i < 500 { i } else { i + 1000 }).into_bytes())
        .collect();
    let new_vals: Vec<Vec<u8>> = (0..1000u32).map(|i| format!("new-{:04}", i).into_bytes()).collect();
    let nk: Vec<&[u8]> = new_keys.iter().map(|k| k.as_slice()).collect();
    let nv: Vec<&[u8]> = new_vals.iter().map(|v| v.as_slice()).collect();
    let mut inputs = streams(&[(&nk, &nv)]);
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut inputs, &mut sink).unwrap();
    let merged = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(merged.item(), 1500);
    for i in 0..500u32 {
        let key = format!("{:05}", i);
        let val = format!("new-{:04}", i);
        assert_eq!(merged.search(key.as_bytes()), Some(val.as_bytes()));
    }
    for i in 500..1000u32 {
        let key = format!("{:05}", i);
        let val = format!("old-{:04}", i);
        assert_eq!(merged.search(key.as_bytes()), Some(val.as_bytes()));
    }
}

// =============================================================================
// Identity Rebuild
// =============================================================================

#[test]
fn test_derive_no_inputs_is_identity() {
    let keys: Vec<Vec<u8>> = (0..200u32).map(|i| format!("id{:03}", i).into_bytes()).collect();
    let vals: Vec<Vec<u8>> = (0..200u32).map(|i| format!("vl{:03}", i).into_bytes()).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    let val_refs: Vec<&[u8]> = vals.iter().map(|v| v.as_slice()).collect();
    let base = dict_table(&key_refs, &val_refs);

    let mut inputs: Vec<Box<dyn DataReader + Send + '_>> = Vec::new();
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut inputs, &mut sink).unwrap();
    let rebuilt = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(rebuilt.item(), base.item());
    for (key, val) in key_refs.iter().zip(&val_refs) {
        assert_eq!(rebuilt.search(key), Some(*val));
    }
    assert_eq!(rebuilt.search(b"zzzzz"), None);
}

#[test]
fn test_derive_no_inputs_identity_varied() {
    let blob = vec![0x42u8; 300];
    let keys: &[&[u8]] = &[b"p", b"q", b"r"];
    let vals: &[&[u8]] = &[b"", b"short", blob.as_slice()];
    let mut inputs = streams(&[(keys, vals)]);
    let mut sink: Vec<u8> = Vec::new();
    build_dict_varied(&mut inputs, &mut sink).unwrap();
    let base = Hashtable::from_bytes(sink).unwrap();

    let mut empty: Vec<Box<dyn DataReader + Send + '_>> = Vec::new();
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut empty, &mut sink).unwrap();
    let rebuilt = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(rebuilt.item(), 3);
    assert_eq!(rebuilt.search(b"p"), Some(&b""[..]));
    assert_eq!(rebuilt.search(b"q"), Some(&b"short"[..]));
    assert_eq!(rebuilt.search(b"r"), Some(blob.as_slice()));
}

// =============================================================================
// Varied-Value Derive
// =============================================================================

#[test]
fn test_derive_varied_shadow_and_repack() {
    let old_blob = vec![0x11u8; 150];
    let keys: &[&[u8]] = &[b"x", b"y", b"z"];
    let vals: &[&[u8]] = &[b"keep-x", old_blob.as_slice(), b"keep-z"];
    let mut inputs = streams(&[(keys, vals)]);
    let mut sink: Vec<u8> = Vec::new();
    build_dict_varied(&mut inputs, &mut sink).unwrap();
    let base = Hashtable::from_bytes(sink).unwrap();

    let new_blob = vec![0x99u8; 4000];
    let nk: &[&[u8]] = &[b"y", b"w"];
    let nv: &[&[u8]] = &[new_blob.as_slice(), b""];
    let mut inputs = streams(&[(nk, nv)]);
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut inputs, &mut sink).unwrap();
    let merged = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(merged.item(), 4);
    assert_eq!(merged.search(b"x"), Some(&b"keep-x"[..]));
    assert_eq!(merged.search(b"y"), Some(new_blob.as_slice()), "shadowed value");
    assert_eq!(merged.search(b"z"), Some(&b"keep-z"[..]));
    assert_eq!(merged.search(b"w"), Some(&b""[..]));
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_derive_wrong_key_length_is_bad_input() {
    let base = dict_table(&[b"ab", b"cd"], &[b"1", b"2"]);

    let keys: &[&[u8]] = &[b"wrong-length"];
    let vals: &[&[u8]] = &[b"9"];
    let mut inputs = streams(&[(keys, vals)]);
    let mut sink: Vec<u8> = Vec::new();
    assert!(matches!(
        base.derive(&mut inputs, &mut sink),
        Err(StashError::BadInput(_))
    ));
}

#[test]
fn test_derive_multi_stream() {
    let keys: Vec<Vec<u8>> = (0..600u32).map(|i| format!("m{:04}", i).into_bytes()).collect();
    let vals: Vec<Vec<u8>> = (0..600u32).map(|i| format!("b{:04}", i).into_bytes()).collect();
    let key_refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
    let val_refs: Vec<&[u8]> = vals.iter().map(|v| v.as_slice()).collect();
    let base = dict_table(&key_refs, &val_refs);

    // Three concurrent derive streams, one overlapping the base.
    let s1k: Vec<&[u8]> = key_refs[..100].to_vec();
    let s1v: Vec<Vec<u8>> = (0..100u32).map(|i| format!("n{:04}", i).into_bytes()).collect();
    let s1v_refs: Vec<&[u8]> = s1v.iter().map(|v| v.as_slice()).collect();
    let s2k: Vec<Vec<u8>> = (0..100u32).map(|i| format!("f{:04}", i).into_bytes()).collect();
    let s2k_refs: Vec<&[u8]> = s2k.iter().map(|k| k.as_slice()).collect();
    let s2v: Vec<Vec<u8>> = (0..100u32).map(|i| format!("g{:04}", i).into_bytes()).collect();
    let s2v_refs: Vec<&[u8]> = s2v.iter().map(|v| v.as_slice()).collect();

    let mut inputs = streams(&[(&s1k, &s1v_refs), (&s2k_refs, &s2v_refs)]);
    let mut sink: Vec<u8> = Vec::new();
    base.derive(&mut inputs, &mut sink).unwrap();
    let merged = Hashtable::from_bytes(sink).unwrap();

    assert_eq!(merged.item(), 700);
    assert_eq!(merged.search(b"m0000"), Some(&b"n0000"[..]));
    assert_eq!(merged.search(b"m0500"), Some(&b"b0500"[..]));
    assert_eq!(merged.search(b"f0042"), Some(&b"g0042"[..]));
}
