//! Evidence-softmax probability engine.
//!
//! Pure function from (outcomes, previous probabilities, scored posts, now)
//! to a new probability vector plus diagnostics. Time is a parameter; the
//! engine never reads a wall clock, so identical inputs produce bitwise
//! identical outputs.

use crate::domain::{OutcomeScores, PostFeatures, PostMetrics};
use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const ALGORITHM: &str = "evidence-softmax-v1";

/// Decay immunity window after posting
pub const GRACE_SECS: f64 = 300.0;
/// Exponential half-life once past the grace window
pub const HALF_LIFE_SECS: f64 = 6.0 * 3600.0;
/// Hard cutoff; older posts contribute nothing
pub const MAX_AGE_SECS: f64 = 72.0 * 3600.0;
/// Superlinear semantic exponent
pub const GAMMA: f64 = 1.15;
/// tanh squashing factor applied to stance
pub const STANCE_K: f64 = 1.6;
/// Accept threshold on post weight after the grace window
pub const W_MIN: f64 = 0.018;
/// Follower-count sigmoid center/scale (log1p space)
pub const MU_FOLLOWERS: f64 = 8.0;
pub const SIGMA_FOLLOWERS: f64 = 1.5;
/// Engagement sigmoid center/scale (log1p space)
pub const MU_ENGAGEMENT: f64 = 2.0;
pub const SIGMA_ENGAGEMENT: f64 = 1.5;
/// Author-quality multiplier for verified accounts
pub const VERIFIED_MULT: f64 = 1.2;
/// Base softmax temperature and its weakness expansion
pub const T0: f64 = 1.0;
pub const ALPHA: f64 = 0.6;
/// Inertia time-constant over evidence mass
pub const TAU: f64 = 0.65;
/// Numerical floor for logs and divisions
pub const EPS: f64 = 1e-12;
/// Window for the author post-frequency count
const AUTHOR_WINDOW_SECS: f64 = 24.0 * 3600.0;

/// Outcome definition as the engine sees it
#[derive(Debug, Clone)]
pub struct OutcomeDef {
    pub key: String,
    /// In [1e-6, 1] when present; uniform 1/K otherwise
    pub prior_probability: Option<f64>,
}

/// One fully scored post, flattened for the engine.
///
/// `scores` maps outcome key to that outcome's score record; a missing key
/// reads as zero relevance and zero stance.
#[derive(Debug, Clone)]
pub struct EvidencePost {
    pub author_id: String,
    pub created_at_ms: i64,
    pub author_followers: Option<i64>,
    pub author_verified: bool,
    pub metrics: PostMetrics,
    pub features: PostFeatures,
    pub scores: HashMap<String, OutcomeScores>,
}

/// Run diagnostics surfaced alongside the probabilities
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineDiagnostics {
    pub accepted_posts: u32,
    pub w_batch: f64,
    pub beta: f64,
    pub temperature: f64,
    pub floor: f64,
}

/// Engine output: new probability vector plus diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub market_id: String,
    pub probabilities: BTreeMap<String, f64>,
    pub algorithm: String,
    pub diagnostics: EngineDiagnostics,
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Replace non-finite oracle drift with zero so no NaN can propagate
fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn sanitize(s: &OutcomeScores) -> OutcomeScores {
    OutcomeScores {
        relevance: finite_or_zero(s.relevance),
        stance: finite_or_zero(s.stance),
        strength: finite_or_zero(s.strength),
        credibility: finite_or_zero(s.credibility),
        confidence: finite_or_zero(s.confidence),
    }
    .clamped()
}

/// Time-decay factor: immune inside the grace window, exponential after
fn decay(age_secs: f64) -> f64 {
    if age_secs <= GRACE_SECS {
        1.0
    } else {
        (-std::f64::consts::LN_2 * (age_secs - GRACE_SECS) / HALF_LIFE_SECS).exp()
    }
}

/// Weighted engagement mass in log1p space
fn engagement(metrics: &PostMetrics) -> f64 {
    let likes = metrics.likes.unwrap_or(0).max(0) as f64;
    let reposts = metrics.reposts.unwrap_or(0).max(0) as f64;
    let replies = metrics.replies.unwrap_or(0).max(0) as f64;
    let quotes = metrics.quotes.unwrap_or(0).max(0) as f64;
    (likes + 2.0 * reposts + 1.5 * replies + 2.5 * quotes).ln_1p()
}

/// Author-quality multiplier from followers, engagement, verification
fn quality_mult(followers: Option<i64>, verified: bool, engagement_mass: f64) -> f64 {
    let f = logistic(((followers.unwrap_or(0).max(0) as f64).ln_1p() - MU_FOLLOWERS) / SIGMA_FOLLOWERS);
    let e = logistic((engagement_mass - MU_ENGAGEMENT) / SIGMA_ENGAGEMENT);
    let verified_mult = if verified { VERIFIED_MULT } else { 1.0 };
    (0.75 + 0.25 * f) * (0.85 + 0.15 * e) * verified_mult
}

/// Author dilution: posting in bursts costs weight, floored at 0.35
fn dilution(recent_by_author: u32) -> f64 {
    let extra = recent_by_author.saturating_sub(1) as f64;
    (1.0 / (1.0 + 0.75 * extra).sqrt()).max(0.35)
}

/// Spam suppression from ingest-time features
fn spam_factor(features: &PostFeatures) -> f64 {
    let cashtags = if features.cashtag_count >= 6 {
        0.55
    } else if features.cashtag_count >= 4 {
        0.75
    } else {
        1.0
    };
    let urls = if features.url_count >= 2 { 0.85 } else { 1.0 };
    let caps = if features.caps_ratio > 0.6 { 0.9 } else { 1.0 };
    cashtags * urls * caps
}

/// Clamp into [1e-6, 1] and renormalize to sum 1
fn normalize(probs: &mut [f64]) {
    for p in probs.iter_mut() {
        *p = if p.is_finite() { *p } else { 0.0 };
        *p = p.clamp(1e-6, 1.0);
    }
    let sum: f64 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
}

/// Apply the per-outcome floor and redistribute so the vector still sums to 1.
///
/// Floored entries are pinned exactly at the floor; the remaining mass is
/// scaled proportionally over the rest. Scaling can push further entries
/// under the floor, so iterate until the assignment is stable (bounded by K).
fn apply_floor(probs: &mut [f64], floor: f64) {
    let k = probs.len();
    if k == 0 {
        return;
    }
    if floor * k as f64 >= 1.0 {
        let uniform = 1.0 / k as f64;
        probs.iter_mut().for_each(|p| *p = uniform);
        return;
    }

    let mut pinned = vec![false; k];
    loop {
        let pinned_mass: f64 = pinned.iter().filter(|&&f| f).count() as f64 * floor;
        let free_sum: f64 = probs
            .iter()
            .zip(&pinned)
            .filter(|(_, &f)| !f)
            .map(|(p, _)| *p)
            .sum();
        let scale = (1.0 - pinned_mass) / (free_sum + EPS);

        let mut changed = false;
        for i in 0..k {
            if !pinned[i] && probs[i] * scale < floor {
                pinned[i] = true;
                changed = true;
            }
        }
        if !changed {
            for i in 0..k {
                probs[i] = if pinned[i] { floor } else { probs[i] * scale };
            }
            return;
        }
    }
}

/// Numerically stable softmax with temperature
fn softmax(logits: &[f64], temperature: f64) -> Vec<f64> {
    let scaled: Vec<f64> = logits.iter().map(|l| l / temperature).collect();
    let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / (sum + EPS)).collect()
}

/// Run evidence-softmax-v1 for one market.
///
/// `posts` must already carry their per-outcome scores; unscored posts are
/// the dispatcher's problem, not the engine's. Score values are clamped into
/// their declared ranges on entry. Returns `InvalidInput` only on genuine
/// shape violations (duplicate outcome keys).
pub fn compute(
    market_id: &str,
    now_ms: i64,
    outcomes: &[OutcomeDef],
    prev_probabilities: Option<&BTreeMap<String, f64>>,
    posts: &[EvidencePost],
) -> Result<EngineReport> {
    let k = outcomes.len();
    let floor = if k == 0 {
        0.0
    } else {
        (0.01 / k as f64).max(0.001)
    };

    if k == 0 {
        return Ok(EngineReport {
            market_id: market_id.to_string(),
            probabilities: BTreeMap::new(),
            algorithm: ALGORITHM.to_string(),
            diagnostics: EngineDiagnostics {
                accepted_posts: 0,
                w_batch: 0.0,
                beta: 0.0,
                temperature: T0,
                floor,
            },
        });
    }

    {
        let mut seen = std::collections::HashSet::with_capacity(k);
        for o in outcomes {
            if !seen.insert(o.key.as_str()) {
                return Err(PulseError::InvalidInput(format!(
                    "duplicate outcome key: {}",
                    o.key
                )));
            }
        }
    }

    // Step 1: normalized priors, then previous probabilities with priors
    // substituted for missing keys.
    let mut priors: Vec<f64> = outcomes
        .iter()
        .map(|o| finite_or_zero(o.prior_probability.unwrap_or(1.0 / k as f64)))
        .collect();
    normalize(&mut priors);

    let mut prev: Vec<f64> = outcomes
        .iter()
        .enumerate()
        .map(|(i, o)| match prev_probabilities {
            Some(map) => map.get(&o.key).copied().unwrap_or(priors[i]),
            None => priors[i],
        })
        .collect();
    normalize(&mut prev);

    // Step 2: recent post count per author (24h window)
    let mut recent_by_author: HashMap<&str, u32> = HashMap::new();
    for post in posts {
        let age = (now_ms - post.created_at_ms) as f64 / 1000.0;
        if age <= AUTHOR_WINDOW_SECS {
            *recent_by_author.entry(post.author_id.as_str()).or_insert(0) += 1;
        }
    }

    // Step 3: per-post weights and evidence accumulation
    let mut delta_e = vec![0.0f64; k];
    let mut w_batch = 0.0f64;
    let mut accepted: u32 = 0;

    for post in posts {
        let age_secs = ((now_ms - post.created_at_ms) as f64 / 1000.0).max(0.0);
        if age_secs > MAX_AGE_SECS {
            continue;
        }

        let d = decay(age_secs);
        let m = quality_mult(
            post.author_followers,
            post.author_verified,
            engagement(&post.metrics),
        );
        let a = dilution(
            recent_by_author
                .get(post.author_id.as_str())
                .copied()
                .unwrap_or(1),
        );
        let s = spam_factor(&post.features);

        // Post-level signals across all outcomes
        let mut z_p = 0.0f64;
        let mut max_relevance = 0.0f64;
        let mut max_credibility = 0.0f64;
        let per_outcome: Vec<OutcomeScores> = outcomes
            .iter()
            .map(|o| {
                let scores = post
                    .scores
                    .get(&o.key)
                    .map(sanitize)
                    .unwrap_or_default();
                let sem = scores.relevance * scores.strength * scores.credibility;
                z_p = z_p.max(sem * scores.stance.abs());
                max_relevance = max_relevance.max(scores.relevance);
                max_credibility = max_credibility.max(scores.credibility);
                scores
            })
            .collect();

        let w_p = z_p.powf(GAMMA) * m * a * d * s;

        let accept = if age_secs <= GRACE_SECS {
            max_relevance >= 0.1 && z_p >= 0.025
        } else {
            max_relevance >= 0.2 && max_credibility >= 0.15 && w_p >= W_MIN
        };
        if !accept {
            continue;
        }

        let sqrt_k = (k as f64).sqrt();
        for (i, scores) in per_outcome.iter().enumerate() {
            let base = scores.relevance * scores.strength * (scores.credibility * scores.confidence);
            delta_e[i] +=
                (STANCE_K * scores.stance).tanh() * base.powf(GAMMA) * m * a * d * s / sqrt_k;
        }
        w_batch += w_p;
        accepted += 1;
    }

    // Step 4: centered previous logits plus accumulated evidence
    let logits_prev: Vec<f64> = prev.iter().map(|p| (p + EPS).ln()).collect();
    let mean_logit: f64 = logits_prev.iter().sum::<f64>() / k as f64;
    let logits_inst: Vec<f64> = logits_prev
        .iter()
        .zip(&delta_e)
        .map(|(l, de)| (l - mean_logit) + de)
        .collect();

    // Step 5: adaptive temperature; weak batches flatten the instantaneous view
    let temperature = T0 * (1.0 + ALPHA / (1.0 + w_batch).sqrt());
    let p_inst = softmax(&logits_inst, temperature);

    // Step 6: inertia mix between previous and instantaneous
    let beta = 1.0 - (-w_batch / TAU).exp();
    let mut p_new: Vec<f64> = prev
        .iter()
        .zip(&p_inst)
        .map(|(p, pi)| (1.0 - beta) * p + beta * pi)
        .collect();

    // Step 7: floor and renormalize
    apply_floor(&mut p_new, floor);

    let probabilities = outcomes
        .iter()
        .zip(&p_new)
        .map(|(o, p)| (o.key.clone(), *p))
        .collect();

    Ok(EngineReport {
        market_id: market_id.to_string(),
        probabilities,
        algorithm: ALGORITHM.to_string(),
        diagnostics: EngineDiagnostics {
            accepted_posts: accepted,
            w_batch,
            beta,
            temperature,
            floor,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(key: &str) -> OutcomeDef {
        OutcomeDef {
            key: key.to_string(),
            prior_probability: None,
        }
    }

    fn scores(relevance: f64, stance: f64, strength: f64, credibility: f64, confidence: f64) -> OutcomeScores {
        OutcomeScores {
            relevance,
            stance,
            strength,
            credibility,
            confidence,
        }
    }

    fn supportive_post(author: &str, created_at_ms: i64, stance_a: f64) -> EvidencePost {
        let mut map = HashMap::new();
        map.insert("a".to_string(), scores(1.0, stance_a, 1.0, 1.0, 1.0));
        map.insert("b".to_string(), scores(1.0, 0.0, 1.0, 1.0, 1.0));
        EvidencePost {
            author_id: author.to_string(),
            created_at_ms,
            author_followers: Some(0),
            author_verified: false,
            metrics: PostMetrics::default(),
            features: PostFeatures::default(),
            scores: map,
        }
    }

    const NOW_MS: i64 = 1_700_000_000_000;

    #[test]
    fn test_uniform_empty() {
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[],
        )
        .unwrap();

        assert_eq!(report.algorithm, ALGORITHM);
        assert!((report.probabilities["a"] - 0.5).abs() < 1e-12);
        assert!((report.probabilities["b"] - 0.5).abs() < 1e-12);
        assert_eq!(report.diagnostics.accepted_posts, 0);
        assert_eq!(report.diagnostics.beta, 0.0);
        assert!((report.diagnostics.temperature - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_single_fresh_supportive_post() {
        let post = supportive_post("author1", NOW_MS - 60_000, 1.0);
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[post],
        )
        .unwrap();

        let a = report.probabilities["a"];
        let b = report.probabilities["b"];
        assert!(a > 0.5, "supportive post must lift outcome a, got {}", a);
        assert!(b < 0.5, "outcome b must give up mass, got {}", b);
        assert!((a + b - 1.0).abs() < 1e-9);
        assert_eq!(report.diagnostics.accepted_posts, 1);
        assert!(report.diagnostics.beta > 0.0);
    }

    #[test]
    fn test_stale_post_dropped() {
        let post = supportive_post("author1", NOW_MS - 73 * 3600 * 1000, 1.0);
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[post],
        )
        .unwrap();

        assert_eq!(report.diagnostics.accepted_posts, 0);
        assert!((report.probabilities["a"] - 0.5).abs() < 1e-9);
        assert!((report.probabilities["b"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_post_at_exact_max_age_kept() {
        let post = supportive_post("author1", NOW_MS - 72 * 3600 * 1000, 1.0);
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[post],
        )
        .unwrap();
        // age == MAX_AGE is inside the window; decay makes it tiny but present
        // only if it clears the stale acceptance gate, which a fully decayed
        // post will not. Either way no probabilities may be NaN.
        for p in report.probabilities.values() {
            assert!(p.is_finite());
        }
    }

    #[test]
    fn test_spam_factor_composition() {
        let features = PostFeatures {
            cashtag_count: 7,
            mention_count: 0,
            url_count: 2,
            caps_ratio: 0.9,
            is_reply: None,
            is_quote: None,
        };
        let s = spam_factor(&features);
        assert!((s - 0.55 * 0.85 * 0.9).abs() < 1e-12, "S={}", s);
    }

    #[test]
    fn test_spammy_post_weighs_less() {
        let clean = supportive_post("a1", NOW_MS - 10_000, 1.0);
        let mut spammy = supportive_post("a2", NOW_MS - 10_000, 1.0);
        spammy.features = PostFeatures {
            cashtag_count: 7,
            mention_count: 0,
            url_count: 2,
            caps_ratio: 0.9,
            is_reply: None,
            is_quote: None,
        };

        let outcomes = [outcome("a"), outcome("b")];
        let clean_report = compute("m1", NOW_MS, &outcomes, None, &[clean]).unwrap();
        let spam_report = compute("m1", NOW_MS, &outcomes, None, &[spammy]).unwrap();

        assert!(
            spam_report.diagnostics.w_batch < clean_report.diagnostics.w_batch,
            "spam suppression must reduce W_batch: {} vs {}",
            spam_report.diagnostics.w_batch,
            clean_report.diagnostics.w_batch
        );
        assert!(spam_report.probabilities["a"] < clean_report.probabilities["a"]);
    }

    #[test]
    fn test_author_dilution_factor() {
        // 4 recent posts from one author -> A = 1/sqrt(1 + 0.75*3)
        let expected = 1.0 / (1.0 + 0.75 * 3.0_f64).sqrt();
        assert!((dilution(4) - expected).abs() < 1e-12);
        // heavy burst bottoms out at 0.35
        assert_eq!(dilution(1000), 0.35);
        assert_eq!(dilution(1), 1.0);
        assert_eq!(dilution(0), 1.0);
    }

    #[test]
    fn test_author_dilution_applied_in_batch() {
        let outcomes = [outcome("a"), outcome("b")];
        let solo = compute(
            "m1",
            NOW_MS,
            &outcomes,
            None,
            &[supportive_post("a1", NOW_MS - 60_000, 1.0)],
        )
        .unwrap();

        let burst: Vec<EvidencePost> = (0..4)
            .map(|i| supportive_post("a1", NOW_MS - 60_000 - i * 1000, 1.0))
            .collect();
        let diluted = compute("m1", NOW_MS, &outcomes, None, &burst).unwrap();

        // Four diluted posts still outweigh one, but by less than 4x
        let solo_w = solo.diagnostics.w_batch;
        let burst_w = diluted.diagnostics.w_batch;
        assert!(burst_w > solo_w);
        assert!(
            burst_w < 4.0 * solo_w,
            "dilution must bite: burst={} solo={}",
            burst_w,
            solo_w
        );
    }

    #[test]
    fn test_floor_activation_k100() {
        let outcomes: Vec<OutcomeDef> = (0..100).map(|i| outcome(&format!("o{}", i))).collect();
        // Strong support for o0 from several credible, verified, followed authors
        let posts: Vec<EvidencePost> = (0..10)
            .map(|i| {
                let mut map = HashMap::new();
                map.insert("o0".to_string(), scores(1.0, 1.0, 1.0, 1.0, 1.0));
                EvidencePost {
                    author_id: format!("author{}", i),
                    created_at_ms: NOW_MS - 30_000,
                    author_followers: Some(1_000_000),
                    author_verified: true,
                    metrics: PostMetrics {
                        likes: Some(500),
                        reposts: Some(100),
                        replies: Some(50),
                        quotes: Some(10),
                    },
                    features: PostFeatures::default(),
                    scores: map,
                }
            })
            .collect();

        let report = compute("m1", NOW_MS, &outcomes, None, &posts).unwrap();
        let floor = report.diagnostics.floor;
        assert!((floor - 0.001).abs() < 1e-15);

        let sum: f64 = report.probabilities.values().sum();
        assert!((sum - 1.0).abs() < 1e-9, "sum={}", sum);
        assert!(report.probabilities["o0"] > 0.5);
        for (key, p) in &report.probabilities {
            assert!(
                *p >= floor - 1e-15,
                "outcome {} fell below floor: {}",
                key,
                p
            );
        }
    }

    #[test]
    fn test_k_zero_returns_empty() {
        let report = compute("m1", NOW_MS, &[], None, &[]).unwrap();
        assert!(report.probabilities.is_empty());
        assert_eq!(report.diagnostics.accepted_posts, 0);
        assert_eq!(report.diagnostics.w_batch, 0.0);
        assert_eq!(report.diagnostics.beta, 0.0);
        assert_eq!(report.diagnostics.temperature, T0);
    }

    #[test]
    fn test_k_one_is_certain() {
        let post = supportive_post("a1", NOW_MS - 60_000, -1.0);
        let report = compute("m1", NOW_MS, &[outcome("only")], None, &[post]).unwrap();
        assert!((report.probabilities["only"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_outcome_keys_rejected() {
        let result = compute("m1", NOW_MS, &[outcome("a"), outcome("a")], None, &[]);
        assert!(matches!(result, Err(PulseError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_posts_identity_with_prev() {
        let mut prev = BTreeMap::new();
        prev.insert("a".to_string(), 0.7);
        prev.insert("b".to_string(), 0.3);
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            Some(&prev),
            &[],
        )
        .unwrap();
        assert!((report.probabilities["a"] - 0.7).abs() < 1e-9);
        assert!((report.probabilities["b"] - 0.3).abs() < 1e-9);
        assert_eq!(report.diagnostics.beta, 0.0);
    }

    #[test]
    fn test_missing_prev_key_falls_back_to_prior() {
        let mut prev = BTreeMap::new();
        prev.insert("a".to_string(), 0.9);
        // "b" missing; prior 0.5 substituted, then renormalized with a's 0.9
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            Some(&prev),
            &[],
        )
        .unwrap();
        let expected_a = 0.9 / 1.4;
        assert!((report.probabilities["a"] - expected_a).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_priors_used() {
        let outcomes = [
            OutcomeDef {
                key: "a".to_string(),
                prior_probability: Some(0.8),
            },
            OutcomeDef {
                key: "b".to_string(),
                prior_probability: Some(0.2),
            },
        ];
        let report = compute("m1", NOW_MS, &outcomes, None, &[]).unwrap();
        assert!((report.probabilities["a"] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_determinism() {
        let posts: Vec<EvidencePost> = (0..20)
            .map(|i| supportive_post(&format!("a{}", i % 3), NOW_MS - 1000 * (i + 1), 0.5))
            .collect();
        let outcomes = [outcome("a"), outcome("b")];
        let r1 = compute("m1", NOW_MS, &outcomes, None, &posts).unwrap();
        let r2 = compute("m1", NOW_MS, &outcomes, None, &posts).unwrap();
        assert_eq!(r1.probabilities, r2.probabilities);
        assert_eq!(r1.diagnostics.w_batch, r2.diagnostics.w_batch);
    }

    #[test]
    fn test_grace_acceptance_is_looser() {
        // Weak post: low credibility, small weight. Inside grace it passes
        // (relevance and Z_p clear the loose gate); outside it fails W_MIN.
        let mut map = HashMap::new();
        map.insert("a".to_string(), scores(0.3, 1.0, 0.4, 0.3, 0.5));
        let make = |created_at_ms: i64| EvidencePost {
            author_id: "a1".to_string(),
            created_at_ms,
            author_followers: Some(0),
            author_verified: false,
            metrics: PostMetrics::default(),
            features: PostFeatures::default(),
            scores: map.clone(),
        };

        let outcomes = [outcome("a"), outcome("b")];
        let fresh = compute("m1", NOW_MS, &outcomes, None, &[make(NOW_MS - 60_000)]).unwrap();
        let aged = compute(
            "m1",
            NOW_MS,
            &outcomes,
            None,
            &[make(NOW_MS - 2 * 3600 * 1000)],
        )
        .unwrap();

        assert_eq!(fresh.diagnostics.accepted_posts, 1);
        assert_eq!(aged.diagnostics.accepted_posts, 0);
    }

    #[test]
    fn test_negative_stance_pushes_down() {
        let post = supportive_post("a1", NOW_MS - 60_000, -1.0);
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[post],
        )
        .unwrap();
        assert!(report.probabilities["a"] < 0.5);
    }

    #[test]
    fn test_out_of_range_scores_clamped_not_rejected() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), scores(5.0, 3.0, 2.0, 1.5, 1.2));
        let post = EvidencePost {
            author_id: "a1".to_string(),
            created_at_ms: NOW_MS - 60_000,
            author_followers: None,
            author_verified: false,
            metrics: PostMetrics::default(),
            features: PostFeatures::default(),
            scores: map,
        };
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[post],
        )
        .unwrap();
        assert_eq!(report.diagnostics.accepted_posts, 1);
        for p in report.probabilities.values() {
            assert!(p.is_finite() && *p > 0.0 && *p < 1.0);
        }
    }

    #[test]
    fn test_nan_scores_neutralized() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), scores(f64::NAN, f64::INFINITY, 1.0, 1.0, 1.0));
        let post = EvidencePost {
            author_id: "a1".to_string(),
            created_at_ms: NOW_MS - 60_000,
            author_followers: None,
            author_verified: false,
            metrics: PostMetrics::default(),
            features: PostFeatures::default(),
            scores: map,
        };
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b")],
            None,
            &[post],
        )
        .unwrap();
        for p in report.probabilities.values() {
            assert!(p.is_finite());
        }
    }

    #[test]
    fn test_verified_author_weighs_more() {
        let mut verified = supportive_post("a1", NOW_MS - 60_000, 1.0);
        verified.author_verified = true;
        let plain = supportive_post("a2", NOW_MS - 60_000, 1.0);

        let outcomes = [outcome("a"), outcome("b")];
        let rv = compute("m1", NOW_MS, &outcomes, None, &[verified]).unwrap();
        let rp = compute("m1", NOW_MS, &outcomes, None, &[plain]).unwrap();
        assert!(rv.diagnostics.w_batch > rp.diagnostics.w_batch);
    }

    #[test]
    fn test_engagement_lifts_weight() {
        let mut hot = supportive_post("a1", NOW_MS - 60_000, 1.0);
        hot.metrics = PostMetrics {
            likes: Some(1000),
            reposts: Some(300),
            replies: Some(100),
            quotes: Some(40),
        };
        let cold = supportive_post("a2", NOW_MS - 60_000, 1.0);

        let outcomes = [outcome("a"), outcome("b")];
        let rh = compute("m1", NOW_MS, &outcomes, None, &[hot]).unwrap();
        let rc = compute("m1", NOW_MS, &outcomes, None, &[cold]).unwrap();
        assert!(rh.diagnostics.w_batch > rc.diagnostics.w_batch);
    }

    #[test]
    fn test_decay_boundaries() {
        assert_eq!(decay(0.0), 1.0);
        assert_eq!(decay(GRACE_SECS), 1.0);
        // One half-life past grace halves the weight
        let one_hl = decay(GRACE_SECS + HALF_LIFE_SECS);
        assert!((one_hl - 0.5).abs() < 1e-12, "decay={}", one_hl);
    }

    #[test]
    fn test_missing_outcome_key_is_zero_evidence() {
        // Post only scores outcome a; outcome b must be untouched by delta_e
        // and end below a.
        let mut map = HashMap::new();
        map.insert("a".to_string(), scores(1.0, 1.0, 1.0, 1.0, 1.0));
        let post = EvidencePost {
            author_id: "a1".to_string(),
            created_at_ms: NOW_MS - 60_000,
            author_followers: None,
            author_verified: false,
            metrics: PostMetrics::default(),
            features: PostFeatures::default(),
            scores: map,
        };
        let report = compute(
            "m1",
            NOW_MS,
            &[outcome("a"), outcome("b"), outcome("c")],
            None,
            &[post],
        )
        .unwrap();
        let b = report.probabilities["b"];
        let c = report.probabilities["c"];
        assert!((b - c).abs() < 1e-12, "unscored outcomes must move together");
        assert!(report.probabilities["a"] > b);
    }
}
