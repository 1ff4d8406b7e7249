//! Property tests against standard library models.

#![cfg(test)]

use crate::prelude::*;

use proptest::prelude::*;

/// A universe size, and up to `max` sets of indices into it.
fn sets_strategy(max: usize) -> impl Strategy<Value = (usize, Vec<BTreeSet<usize>>)> {
    (1usize..200).prop_flat_map(move |len| {
        let set = prop_oneof![
            // Sparse sets diverge quickly, dense ones share for longer.
            prop::collection::btree_set(0..len, 0..=len.min(4)),
            prop::collection::vec(any::<bool>(), len).prop_map(|bits| {
                bits.iter()
                    .enumerate()
                    .filter_map(|(i, &bit)| bit.then_some(i))
                    .collect::<BTreeSet<_>>()
            }),
        ];
        (Just(len), prop::collection::vec(set, 1..=max))
    })
}

/// A universe size, trimming thresholds, and a list of writes.
fn writes_strategy() -> impl Strategy<Value = (usize, Trim, Vec<(usize, u64)>)> {
    (1usize..300).prop_flat_map(|len| {
        let trim = (0usize..10, 0usize..10).prop_map(|(leading, trailing)| Trim {
            leading,
            trailing,
        });
        let write = (0..len, any::<u64>());
        (Just(len), trim, prop::collection::vec(write, 0..=64))
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_map_equivalence((len, trim, writes) in writes_strategy()) {
        let universe: Arc<Universe<String>> =
            Arc::new((0..len).map(|i| format!("k{i}")).collect());
        let factory = CompactMapFactory::with_trim(Arc::clone(&universe), trim);
        let mut builder = factory.builder();
        let mut model = BTreeMap::new();

        for (index, value) in writes {
            let key = &universe[index];
            let prev = builder.put(key.as_str(), value).unwrap();
            prop_assert_eq!(prev, model.insert(key.clone(), value));
            prop_assert_eq!(builder.len(), model.len());
        }

        let map = builder.build().unwrap();
        prop_assert_eq!(map.len(), model.len());
        for key in universe.iter() {
            prop_assert_eq!(map.get(key.as_str()), model.get(key));
        }

        // Iteration follows universe order.
        let got: Vec<_> = map.iter().map(|(key, value)| (universe.index_of(key), *value)).collect();
        let mut expected: Vec<_> = model
            .iter()
            .map(|(key, value)| (universe.index_of(key), *value))
            .collect();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_dedup_equivalence((len, sets) in sets_strategy(8)) {
        let mut deduper = SubsetDeduper::new(Arc::new(Universe::new(0..len)));
        let builders: Vec<_> = sets.iter().map(|_| deduper.builder()).collect();

        for index in 0..len {
            for (set, &builder) in sets.iter().zip(&builders) {
                if set.contains(&index) {
                    deduper.add(builder, &index).unwrap();
                }
            }
            deduper.element_finished(&index).unwrap();

            // Builders share a backing set exactly when they hold the same elements so far.
            let prefix = |set: &BTreeSet<usize>| set.range(..=index).copied().collect::<Vec<_>>();
            for (i, fst) in sets.iter().enumerate() {
                for (j, snd) in sets.iter().enumerate() {
                    let (fst, snd) = (prefix(fst), prefix(snd));
                    prop_assert_eq!(
                        deduper.shares_backing(builders[i], builders[j]),
                        !fst.is_empty() && fst == snd,
                        "sharing fail at {} between {} and {}", index, i, j
                    );
                }
            }
        }

        let done = deduper.complete().unwrap();
        for (set, &builder) in sets.iter().zip(&builders) {
            let subset = deduper.build(builder, &done).unwrap();
            prop_assert_eq!(&subset, set);
            prop_assert!(subset.indices().eq(set.iter().copied()));
        }
    }

    #[test]
    fn prop_build_many((len, sets) in sets_strategy(16)) {
        let universe = Arc::new(Universe::new(0..len));
        let subsets = SubsetDeduper::build_many(Arc::clone(&universe), &sets).unwrap();

        for (subset, set) in subsets.iter().zip(&sets) {
            prop_assert_eq!(subset, set);
            prop_assert_eq!(subset, &Subset::from_elements(&universe, set).unwrap());
        }
    }
}
