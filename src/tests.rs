//! General library tests.

#![cfg(test)]

use crate::prelude::*;
use concat_idents::concat_idents;

/// Creates analogous map and subset tests for each size tier.
macro_rules! test {
    ($($name: ident => $indices: expr, $map: ident, $subset: ident);* $(;)?) => {
        $(
            concat_idents!(fn_name = map, $name {
                #[test]
                fn fn_name() {
                    map_tier(&$indices, Representation::$map);
                }
            });

            concat_idents!(fn_name = subset, $name {
                #[test]
                fn fn_name() {
                    subset_tier(&$indices, Representation::$subset);
                }
            });
        )*
    };
}

/// Size of the test universe.
const LEN: usize = 150;

/// A universe whose index order differs from numeric order.
fn universe() -> Arc<Universe<u32>> {
    Arc::new((0..LEN as u32).map(|i| (i * 7) % LEN as u32).collect())
}

/// Sorted copy of some indices.
fn sorted(indices: &[usize]) -> Vec<usize> {
    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    sorted
}

/// Builds a map holding the keys at `indices`, and checks it against a [`BTreeMap`].
fn map_tier(indices: &[usize], repr: Representation) {
    let universe = universe();
    let factory = CompactMapFactory::new(Arc::clone(&universe));
    let model: BTreeMap<u32, String> = indices
        .iter()
        .map(|&i| (universe[i], format!("v{i}")))
        .collect();

    let mut builder = factory.builder();
    for (key, value) in model.iter().rev() {
        builder.put(key, value.clone()).unwrap();
    }
    let map = builder.build().unwrap();

    assert_eq!(map.representation(), repr);
    assert_eq!(map.len(), indices.len());
    assert_eq!(map.is_empty(), indices.is_empty());
    assert_eq!(map, model);
    for key in universe.iter() {
        assert_eq!(map.get(key), model.get(key), "lookup fail at {key}");
        assert_eq!(map.contains_key(key), model.contains_key(key));
    }
    assert!(map.keys().eq(sorted(indices).into_iter().map(|i| &universe[i])));

    // Same contents through another representation.
    let untrimmed = CompactMapFactory::with_trim(Arc::clone(&universe), Trim::never())
        .map_from(model.iter().map(|(key, value)| (key, value.clone())))
        .unwrap();
    assert_eq!(map, untrimmed);
    assert_eq!(map.to_string(), untrimmed.to_string());
    assert_eq!(factory.stats().built(repr), 1);
}

/// Builds two identical subsets holding the elements at `indices`, and checks them against a
/// [`BTreeSet`].
fn subset_tier(indices: &[usize], repr: Representation) {
    let universe = universe();
    let sorted = sorted(indices);
    let mut deduper = SubsetDeduper::new(Arc::clone(&universe));
    let fst = deduper.builder();
    let snd = deduper.builder();

    for (i, el) in universe.iter().enumerate() {
        if sorted.binary_search(&i).is_ok() {
            deduper.add_index(fst, i).unwrap();
            deduper.add(snd, el).unwrap();
        }
        deduper.element_finished(el).unwrap();
    }
    assert_eq!(deduper.shares_backing(fst, snd), !indices.is_empty());

    let done = deduper.complete().unwrap();
    let set = deduper.build(fst, &done).unwrap();
    let model: BTreeSet<u32> = indices.iter().map(|&i| universe[i]).collect();

    assert_eq!(set.representation(), repr);
    assert_eq!(set.len(), indices.len());
    assert_eq!(set, model);
    assert_eq!(set, deduper.build(snd, &done).unwrap());
    assert_eq!(set, Subset::from_elements(&universe, &model).unwrap());
    for el in universe.iter() {
        assert_eq!(set.contains(el), model.contains(el), "membership fail at {el}");
    }
    assert!(set.indices().eq(sorted.iter().copied()));
    assert_eq!(deduper.stats().forks(), 0);
}

test!(
    _empty => [], Empty, Empty;
    _single => [70], Single, Single;
    _pair => [9, 3], Pair, Word;
    _spread => [100, 0, 50], Indexed, Words;
    _dense => [10, 11, 12, 13, 14, 15], Indexed, Word;
    _full => (0..LEN).collect::<Vec<_>>(), Indexed, Full;
);

/// Scenario: maps over `{a, b, c, d}`.
#[test]
fn small_map() {
    let factory = CompactMapFactory::from_keys(["a", "b", "c", "d"]);
    let map = factory.map_from([("a", "aa"), ("b", "bb")]).unwrap();

    assert_eq!(map.len(), 2);
    assert_eq!(map.get("a"), Some(&"aa"));
    assert_eq!(map.get("c"), None);
    assert!(!map.contains_key("d"));
}

/// Scenario: a map holding every one of 700 synthetic keys.
#[test]
fn large_map() {
    let keys: Vec<String> = (0..700).map(|i| format!("key-{i}")).collect();
    let factory = CompactMapFactory::from_keys(keys.clone());
    let reference: HashMap<String, usize> = keys.into_iter().zip(0..).collect();

    let map = factory
        .map_from(reference.iter().map(|(key, value)| (key.as_str(), *value)))
        .unwrap();
    assert_eq!(map.len(), 700);
    assert_eq!(map, reference);
}

/// Scenario: get-or-create keeps returning the value it created.
#[test]
fn get_or_create() {
    let factory = CompactMapFactory::from_keys(["a", "b"]);
    let mut builder = factory.builder_with(|_: &&str| Some(Vec::<u32>::new()));

    let first: *const Vec<u32> = builder.get("a").unwrap().unwrap();
    let second: *const Vec<u32> = builder.get("a").unwrap().unwrap();
    assert_eq!(first, second);

    builder.get("a").unwrap().unwrap().push(7);
    let map = builder.build().unwrap();
    assert_eq!(map.get("a"), Some(&vec![7]));
    assert_eq!(map.len(), 1);
}

/// Scenario: two subsets in lockstep, identical then diverging.
#[test]
fn lockstep() {
    let mut deduper = SubsetDeduper::from_elements(["a", "b", "c"]);
    let same = [deduper.builder(), deduper.builder()];
    let other = deduper.builder();

    for el in ["a", "b", "c"] {
        if el != "c" {
            for builder in same {
                deduper.add(builder, el).unwrap();
            }
        }
        if el == "a" {
            deduper.add(other, el).unwrap();
        }
        deduper.element_finished(el).unwrap();
    }

    let done = deduper.complete().unwrap();
    let [fst, snd] = same.map(|builder| deduper.build(builder, &done).unwrap());
    let other = deduper.build(other, &done).unwrap();

    assert_eq!(fst, snd);
    assert_eq!(fst.to_string(), "{a, b}");
    assert_eq!(other.to_string(), "{a}");
    assert_eq!(other.representation(), Representation::Single);
}

/// Built collections can be read from other threads.
#[test]
fn send_sync() {
    fn check<T: Send + Sync>() {}
    check::<CompactMap<String, Vec<u8>>>();
    check::<Subset<String>>();
    check::<Universe<String>>();
}
