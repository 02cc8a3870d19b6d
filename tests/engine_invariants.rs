//! Engine invariants exercised through the public API: probability mass,
//! floors, determinism, the stale-post cutoff, and order independence.

use pulse::domain::{OutcomeScores, PostFeatures, PostMetrics};
use pulse::engine::{self, EvidencePost, OutcomeDef};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashMap;

const NOW_MS: i64 = 1_750_000_000_000;

fn outcome(key: &str) -> OutcomeDef {
    OutcomeDef {
        key: key.to_string(),
        prior_probability: None,
    }
}

fn post(author: &str, age_secs: i64, per_outcome: &[(&str, f64, f64)]) -> EvidencePost {
    let mut scores = HashMap::new();
    for (key, relevance, stance) in per_outcome {
        scores.insert(
            key.to_string(),
            OutcomeScores {
                relevance: *relevance,
                stance: *stance,
                strength: 0.8,
                credibility: 0.7,
                confidence: 0.9,
            },
        );
    }
    EvidencePost {
        author_id: author.to_string(),
        created_at_ms: NOW_MS - age_secs * 1000,
        author_followers: Some(5_000),
        author_verified: false,
        metrics: PostMetrics {
            likes: Some(12),
            reposts: Some(3),
            replies: Some(1),
            quotes: Some(0),
        },
        features: PostFeatures::default(),
        scores,
    }
}

/// A mixed batch across ages, authors, and stances
fn mixed_batch() -> Vec<EvidencePost> {
    vec![
        post("alice", 60, &[("a", 0.9, 0.8), ("b", 0.4, -0.2)]),
        post("bob", 1_800, &[("a", 0.7, -0.6), ("b", 0.8, 0.9)]),
        post("alice", 7_200, &[("a", 0.95, 1.0)]),
        post("carol", 20_000, &[("b", 0.5, 0.4), ("c", 0.6, -0.7)]),
        post("dave", 100_000, &[("c", 1.0, 1.0)]),
        post("erin", 250_000, &[("a", 1.0, 1.0)]), // 69h old, decayed hard
        post("bob", 120, &[("c", 0.3, 0.2)]),
    ]
}

#[test]
fn probabilities_sum_to_one() {
    for k in [1usize, 2, 3, 7, 25] {
        let outcomes: Vec<OutcomeDef> = (0..k).map(|i| outcome(&format!("o{}", i))).collect();
        let posts: Vec<EvidencePost> = (0..6)
            .map(|i| {
                post(
                    &format!("author{}", i % 2),
                    60 + i * 500,
                    &[(&format!("o{}", i as usize % k), 0.9, 0.7)],
                )
            })
            .collect();

        let report = engine::compute("m", NOW_MS, &outcomes, None, &posts).unwrap();
        let sum: f64 = report.probabilities.values().sum();
        assert!(
            (sum - 1.0).abs() < 1e-9,
            "K={}: probability mass {} drifted from 1",
            k,
            sum
        );
    }
}

#[test]
fn every_probability_respects_floor() {
    let outcomes: Vec<OutcomeDef> = (0..10).map(|i| outcome(&format!("o{}", i))).collect();
    let posts = vec![post("a1", 30, &[("o0", 1.0, 1.0)])];
    let report = engine::compute("m", NOW_MS, &outcomes, None, &posts).unwrap();

    let floor = report.diagnostics.floor;
    assert!((floor - 0.001f64.max(0.01 / 10.0)).abs() < 1e-15);
    for (key, p) in &report.probabilities {
        assert!(*p >= floor - 1e-15, "{} = {} below floor {}", key, p, floor);
        assert!(p.is_finite());
    }
}

#[test]
fn empty_post_set_returns_normalized_previous() {
    let outcomes = [outcome("a"), outcome("b"), outcome("c")];
    let mut prev = std::collections::BTreeMap::new();
    prev.insert("a".to_string(), 0.6);
    prev.insert("b".to_string(), 0.3);
    prev.insert("c".to_string(), 0.1);

    let report = engine::compute("m", NOW_MS, &outcomes, Some(&prev), &[]).unwrap();
    assert!((report.probabilities["a"] - 0.6).abs() < 1e-9);
    assert!((report.probabilities["b"] - 0.3).abs() < 1e-9);
    assert!((report.probabilities["c"] - 0.1).abs() < 1e-9);
    assert_eq!(report.diagnostics.w_batch, 0.0);
    assert_eq!(report.diagnostics.beta, 0.0);
}

#[test]
fn identical_inputs_are_bitwise_identical() {
    let outcomes = [outcome("a"), outcome("b"), outcome("c")];
    let posts = mixed_batch();

    let r1 = engine::compute("m", NOW_MS, &outcomes, None, &posts).unwrap();
    let r2 = engine::compute("m", NOW_MS, &outcomes, None, &posts).unwrap();

    for (key, p1) in &r1.probabilities {
        let p2 = r2.probabilities[key];
        assert_eq!(p1.to_bits(), p2.to_bits(), "outcome {} diverged", key);
    }
    assert_eq!(
        r1.diagnostics.w_batch.to_bits(),
        r2.diagnostics.w_batch.to_bits()
    );
}

#[test]
fn posts_past_max_age_have_zero_effect() {
    let outcomes = [outcome("a"), outcome("b")];
    let fresh = vec![post("a1", 60, &[("a", 0.9, 0.9)])];

    let mut with_stale = fresh.clone();
    with_stale.push(post("ancient", 73 * 3600, &[("b", 1.0, 1.0)]));
    with_stale.push(post("older", 200 * 3600, &[("b", 1.0, 1.0)]));

    let base = engine::compute("m", NOW_MS, &outcomes, None, &fresh).unwrap();
    let noisy = engine::compute("m", NOW_MS, &outcomes, None, &with_stale).unwrap();

    for (key, p) in &base.probabilities {
        assert_eq!(
            p.to_bits(),
            noisy.probabilities[key].to_bits(),
            "stale posts changed outcome {}",
            key
        );
    }
}

#[test]
fn post_order_does_not_matter() {
    let outcomes = [outcome("a"), outcome("b"), outcome("c")];
    let posts = mixed_batch();
    let baseline = engine::compute("m", NOW_MS, &outcomes, None, &posts).unwrap();

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut shuffled = posts;
    let mut max_dev = 0.0f64;

    for _ in 0..1000 {
        shuffled.shuffle(&mut rng);
        let report = engine::compute("m", NOW_MS, &outcomes, None, &shuffled).unwrap();
        for (key, p) in &report.probabilities {
            max_dev = max_dev.max((p - baseline.probabilities[key]).abs());
        }
    }

    assert!(
        max_dev < 1e-9,
        "probability deviation {} under permutation",
        max_dev
    );
}

#[test]
fn uniform_when_nothing_is_known() {
    let outcomes = [outcome("a"), outcome("b"), outcome("c"), outcome("d")];
    let report = engine::compute("m", NOW_MS, &outcomes, None, &[]).unwrap();
    for p in report.probabilities.values() {
        assert!((p - 0.25).abs() < 1e-12);
    }
    assert!((report.diagnostics.temperature - 1.6).abs() < 1e-12);
}

#[test]
fn evidence_accumulates_across_ticks() {
    // Feed the same supportive post through two ticks, carrying state forward;
    // the supported outcome must keep gaining.
    let outcomes = [outcome("a"), outcome("b")];
    let posts = vec![post("a1", 60, &[("a", 1.0, 1.0)])];

    let first = engine::compute("m", NOW_MS, &outcomes, None, &posts).unwrap();
    let second = engine::compute(
        "m",
        NOW_MS,
        &outcomes,
        Some(&first.probabilities),
        &posts,
    )
    .unwrap();

    assert!(first.probabilities["a"] > 0.5);
    assert!(second.probabilities["a"] > first.probabilities["a"]);
}
