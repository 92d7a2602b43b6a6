//! Construction determinism: the packed stores must be byte-identical no
//! matter how many threads built them or how their work interleaved.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use common::database;
use strata::{GenomeIndex, IndexConfig};
use test_case::test_case;

const REFERENCE: &[u8] = b"ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACT\
                           ACGGATCGGTACGATCGGATCGATTACGCAGGACTACGGATCGGTACGATCGGATAGGCATN\
                           NNACGTACGGTCAGGACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATA";

fn config() -> IndexConfig {
    IndexConfig {
        min_interesting_size: 4,
        initial_max_interesting_size: 32,
        max_matches_per_key: 20,
        ..IndexConfig::default()
    }
}

fn build_with_threads(threads: usize) -> blake3::Hash {
    let index = GenomeIndex::new(database(REFERENCE), config()).unwrap();
    if threads <= 1 {
        index.require_set_up_through_size(32);
    } else {
        let workers: Vec<_> = (0..threads)
            .map(|_| {
                let index = Arc::clone(&index);
                thread::spawn(move || index.require_set_up_through_size(32))
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
    }
    index.fingerprint()
}

#[test_case(2; "two threads")]
#[test_case(4; "four threads")]
fn threaded_builds_match_the_single_threaded_build(threads: usize) {
    let baseline = build_with_threads(1);
    for _ in 0..3 {
        assert_eq!(
            build_with_threads(threads),
            baseline,
            "store contents diverged with {} threads",
            threads
        );
    }
}

#[test]
fn repeated_single_threaded_builds_are_identical() {
    common::init_tracing();
    let mut fingerprints = HashSet::new();
    for _ in 0..3 {
        fingerprints.insert(build_with_threads(1));
    }
    assert_eq!(fingerprints.len(), 1, "outputs diverged across runs");
}

#[test]
fn compiled_and_generic_construction_agree() {
    // min_interesting_size 8 enables the row compiler; 4 keeps the generic
    // path. For every length both configurations store, the bins must be
    // byte-identical.
    let with_compiler = IndexConfig {
        min_interesting_size: 8,
        initial_max_interesting_size: 32,
        max_matches_per_key: 20,
        ..IndexConfig::default()
    };
    let generic = IndexConfig {
        min_interesting_size: 4,
        ..with_compiler.clone()
    };
    let index_a = GenomeIndex::new(database(REFERENCE), with_compiler).unwrap();
    index_a.require_set_up_through_size(32);
    let index_b = GenomeIndex::new(database(REFERENCE), generic).unwrap();
    index_b.require_set_up_through_size(32);

    let compiled: std::collections::BTreeMap<usize, blake3::Hash> =
        index_a.store_fingerprints().into_iter().collect();
    let generic: std::collections::BTreeMap<usize, blake3::Hash> =
        index_b.store_fingerprints().into_iter().collect();
    assert!(!compiled.is_empty(), "compiled build stored nothing");
    for (length, fingerprint) in &compiled {
        assert_eq!(
            generic.get(length),
            Some(fingerprint),
            "length {} bin differs between compiled and generic builds",
            length
        );
    }
}

#[test]
fn helpers_joining_mid_build_do_not_change_the_result() {
    let baseline = build_with_threads(1);
    let index = GenomeIndex::new(database(REFERENCE), config()).unwrap();

    // One thread drives the requirement; two late helpers poll for work the
    // way an idle worker pool would.
    let driver = {
        let index = Arc::clone(&index);
        thread::spawn(move || index.require_set_up_through_size(32))
    };
    let helpers: Vec<_> = (0..2)
        .map(|_| {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                while index.committed_length() < 32 {
                    if index.get_can_use_help() {
                        index.help_set_up();
                    } else {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();
    driver.join().expect("driver panicked");
    for helper in helpers {
        helper.join().expect("helper panicked");
    }
    assert_eq!(index.fingerprint(), baseline);
}
