//! End-to-end query scenarios: basic lookup across strands, ambiguity
//! isolation around an N run, overflow signalling, and ceiling growth
//! triggered through the read view.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{database, forward_view, fresh_blocks_by_key, reverse_view};
use strata::sequence::Strand;
use strata::{GenomeIndex, IndexConfig, MatchLookup};

const N_RUN_REFERENCE: &[u8] = b"ACGTACGTACGTNNNNACGTACGT";

fn small_config() -> IndexConfig {
    IndexConfig {
        min_interesting_size: 4,
        initial_max_interesting_size: 16,
        max_matches_per_key: 100,
        ..IndexConfig::default()
    }
}

#[test]
fn every_occurrence_of_a_stored_block_is_returned() {
    common::init_tracing();
    let db = database(N_RUN_REFERENCE);
    let config = small_config();
    let index = GenomeIndex::new(Arc::clone(&db), config.clone()).unwrap();
    index.require_set_up_through_size(config.min_interesting_size);
    let ceiling = index.committed_length();
    let mut view = index.get_index_view();

    let groups = fresh_blocks_by_key(&forward_view(&db), &config, ceiling);
    assert!(!groups.is_empty(), "reference produced no storable blocks");

    let mut concrete_lookups = 0;
    for ((_, _), blocks) in &groups {
        let representative = &blocks[0];
        let expected: BTreeSet<usize> = blocks.iter().map(|b| b.start_index()).collect();
        match view.match_block(representative) {
            MatchLookup::Positions(positions) => {
                concrete_lookups += 1;
                let returned: BTreeSet<usize> = positions
                    .iter()
                    .filter(|p| p.strand == Strand::Forward)
                    .map(|p| p.offset)
                    .collect();
                assert!(
                    returned.is_superset(&expected),
                    "missing occurrences: expected {:?}, got {:?}",
                    expected,
                    returned
                );
            }
            MatchLookup::Unknown => {
                // Bucket conflation can tip a key over; tolerated as long as
                // most lookups stay concrete (checked below).
            }
        }
    }
    assert!(
        concrete_lookups * 2 >= groups.len(),
        "almost every lookup overflowed: {} of {}",
        concrete_lookups,
        groups.len()
    );
}

#[test]
fn reverse_strand_queries_reflect_back_onto_the_forward_strand() {
    let db = database(N_RUN_REFERENCE);
    let config = small_config();
    let index = GenomeIndex::new(Arc::clone(&db), config.clone()).unwrap();
    index.require_set_up_through_size(config.min_interesting_size);
    let ceiling = index.committed_length();
    let mut view = index.get_index_view();

    let forward_groups = fresh_blocks_by_key(&forward_view(&db), &config, ceiling);
    let reverse_groups = fresh_blocks_by_key(&reverse_view(&db), &config, ceiling);

    // Strand symmetry: the reverse strand's rows mirror the forward rows, so
    // the canonical-hash key sets coincide.
    let forward_keys: BTreeSet<_> = forward_groups.keys().collect();
    let reverse_keys: BTreeSet<_> = reverse_groups.keys().collect();
    assert_eq!(forward_keys, reverse_keys);

    let seq_len = N_RUN_REFERENCE.len();
    let mut checked = 0;
    for (key, rev_blocks) in &reverse_groups {
        let fwd_blocks = &forward_groups[key];
        let expected: BTreeSet<usize> = fwd_blocks.iter().map(|b| b.start_index()).collect();
        if let MatchLookup::Positions(positions) = view.match_block(&rev_blocks[0]) {
            // Positions come back on the strand the query reads forward;
            // reflect them onto the reference's forward strand.
            let reflected: BTreeSet<usize> = positions
                .iter()
                .map(|p| match p.strand {
                    Strand::Forward => p.offset,
                    Strand::Reverse => seq_len - p.offset - key.0,
                })
                .collect();
            assert!(
                reflected.is_superset(&expected),
                "reverse query missed forward occurrences: {:?} vs {:?}",
                reflected,
                expected
            );
            checked += 1;
        }
    }
    assert!(checked > 0, "no reverse-strand lookup returned positions");
}

#[test]
fn no_concrete_block_spans_the_ambiguous_run() {
    let db = database(N_RUN_REFERENCE);
    let config = small_config();
    let index = GenomeIndex::new(Arc::clone(&db), config.clone()).unwrap();
    index.require_set_up_through_size(config.min_interesting_size);
    let ceiling = index.committed_length();
    let mut view = index.get_index_view();

    // The N run occupies 12..16.
    let groups = fresh_blocks_by_key(&forward_view(&db), &config, ceiling);
    for blocks in groups.values() {
        for block in blocks {
            let (lo, hi) = block.footprint();
            assert!(
                hi <= 12 || lo >= 16,
                "concrete block {}..{} touches the N run",
                lo,
                hi
            );
        }
    }

    // And nothing the index returns ever lands inside it.
    for blocks in groups.values() {
        if let MatchLookup::Positions(positions) = view.match_block(&blocks[0]) {
            for position in positions {
                let (start, length) = (position.offset, blocks[0].length());
                let (lo, hi) = match position.strand {
                    Strand::Forward => (start, start + length),
                    Strand::Reverse => {
                        let fwd = N_RUN_REFERENCE.len() - start - length;
                        (fwd, fwd + length)
                    }
                };
                assert!(
                    hi <= 12 || lo >= 16,
                    "lookup returned {}..{} inside the N run",
                    lo,
                    hi
                );
            }
        }
    }
}

#[test]
fn overloaded_keys_signal_overflow_and_stay_overflowed() {
    // A pure 4-periodic repeat: interior blocks recur every period, so some
    // key must exceed a capacity of 2.
    let reference = b"ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT";
    let db = database(reference);
    let config = IndexConfig {
        min_interesting_size: 2,
        initial_max_interesting_size: 16,
        max_matches_per_key: 2,
        ..IndexConfig::default()
    };
    let index = GenomeIndex::new(Arc::clone(&db), config.clone()).unwrap();
    index.require_set_up_through_size(config.min_interesting_size);
    let ceiling = index.committed_length();
    let mut view = index.get_index_view();

    let groups = fresh_blocks_by_key(&forward_view(&db), &config, ceiling);
    let mut saw_overflow = false;
    for blocks in groups.values() {
        let distinct: BTreeSet<usize> = blocks.iter().map(|b| b.start_index()).collect();
        let lookup = view.match_block(&blocks[0]);
        if distinct.len() > config.max_matches_per_key {
            assert_eq!(lookup, MatchLookup::Unknown, "overfull key returned a list");
            saw_overflow = true;
            // Monotone: asking again changes nothing.
            assert_eq!(view.match_block(&blocks[0]), MatchLookup::Unknown);
        }
    }
    assert!(saw_overflow, "no key exceeded capacity in a 12-period repeat");
}

#[test]
fn a_read_copied_from_the_reference_finds_its_origin() {
    let reference: &[u8] = b"ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACT\
                             GGTTACGATCGGATACGGATCCATAGGCATACGGTCACGAACGTACGGTCAGGACTACGGAT";
    let db = database(reference);
    // Counts in a 124 bp toy reference sit far below genome-scale ones, so
    // accept any candidate that matches at all.
    let config = IndexConfig {
        min_useful_matches: 1,
        ..small_config()
    };
    let index = GenomeIndex::new(Arc::clone(&db), config.clone()).unwrap();
    index.require_set_up_through_size(config.initial_max_interesting_size);
    let mut view = index.get_index_view();

    // A 72 bp read copied verbatim from offset 24.
    let read_offset = 24;
    let read = &reference[read_offset..read_offset + 72];
    let read_db = database(read);
    let mut cursor = index.candidate_cursor(forward_view(&read_db));

    let mut confirmed = 0;
    let mut candidates = 0;
    while let Some(candidate) = cursor.next_interesting_block(&mut view) {
        let strata::Candidate::Single(block) = candidate else {
            continue;
        };
        candidates += 1;
        if candidates > 200 {
            break;
        }
        if let MatchLookup::Positions(positions) = view.match_block(&block) {
            let expected = read_offset + block.start_index();
            if positions
                .iter()
                .any(|p| p.strand == Strand::Forward && p.offset == expected)
            {
                confirmed += 1;
            }
        }
    }
    assert!(candidates > 0, "the read produced no candidates");
    assert!(
        confirmed > 0,
        "no candidate mapped back to its origin ({} candidates tried)",
        candidates
    );
}

#[test]
fn querying_past_the_ceiling_grows_the_index_through_the_view() {
    let reference = b"ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACT\
                      GGATCCATAGGCATACGGTCACGATGGTTACGATCGGATACGTACGGTCAGGACTACGGATC";
    let db = database(reference);
    let config = IndexConfig {
        min_interesting_size: 4,
        initial_max_interesting_size: 8,
        ..IndexConfig::default()
    };
    let index = GenomeIndex::new(Arc::clone(&db), config.clone()).unwrap();
    index.require_set_up_through_size(4);
    let first_watermark = index.committed_length();
    let before = index.fingerprint();

    // Find a block longer than the current watermark from a fresh traversal
    // driven with the ceiling the raise will commit, so it mirrors the
    // index's own pass.
    let next_ceiling = first_watermark * 2;
    let groups = fresh_blocks_by_key(&forward_view(&db), &config, next_ceiling);
    let long_block = groups
        .values()
        .flatten()
        .find(|b| b.length() > first_watermark)
        .copied()
        .expect("traversal produced no block past the watermark");

    let mut view = index.get_index_view();
    let lookup = view.match_block(&long_block);
    assert!(
        index.committed_length() >= long_block.length(),
        "ceiling did not grow past {}",
        long_block.length()
    );
    assert_ne!(index.fingerprint(), before, "no new lengths were committed");

    // The block's own occurrence must be among the results.
    match lookup {
        MatchLookup::Positions(positions) => {
            assert!(
                positions
                    .iter()
                    .any(|p| p.strand == Strand::Forward && p.offset == long_block.start_index()),
                "the queried block's own position is missing"
            );
        }
        MatchLookup::Unknown => panic!("a long unique block overflowed"),
    }
}
