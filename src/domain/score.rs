use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-outcome scores returned by the oracle.
///
/// Ranges are declared, not trusted: the engine clamps every field on entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomeScores {
    /// Topical relevance of the post to the outcome, [0, 1]
    pub relevance: f64,
    /// Directional implication for the outcome, [-1, 1]
    pub stance: f64,
    /// How strongly the post asserts its claim, [0, 1]
    pub strength: f64,
    /// Source credibility, [0, 1]
    pub credibility: f64,
    /// Oracle self-reported confidence, [0, 1]
    pub confidence: f64,
}

impl OutcomeScores {
    /// Clamp every score into its declared range
    pub fn clamped(self) -> Self {
        Self {
            relevance: self.relevance.clamp(0.0, 1.0),
            stance: self.stance.clamp(-1.0, 1.0),
            strength: self.strength.clamp(0.0, 1.0),
            credibility: self.credibility.clamp(0.0, 1.0),
            confidence: self.confidence.clamp(0.0, 1.0),
        }
    }
}

/// Post-level flags, replicated across a post's outcome rows
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PostFlags {
    #[serde(default)]
    pub is_sarcasm: bool,
    #[serde(default)]
    pub is_question: bool,
    #[serde(default)]
    pub is_quote: bool,
    #[serde(default)]
    pub is_rumor_style: bool,
}

/// Human-readable credibility bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredibilityLabel {
    High,
    Medium,
    Low,
}

impl CredibilityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredibilityLabel::High => "High",
            CredibilityLabel::Medium => "Medium",
            CredibilityLabel::Low => "Low",
        }
    }
}

impl TryFrom<&str> for CredibilityLabel {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, Self::Error> {
        match s {
            "High" => Ok(CredibilityLabel::High),
            "Medium" => Ok(CredibilityLabel::Medium),
            "Low" => Ok(CredibilityLabel::Low),
            _ => Err(format!("Unknown credibility label: {}", s)),
        }
    }
}

/// Display strings produced by the oracle for the read surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayLabels {
    pub summary: String,
    pub reason: String,
    pub credibility_label: CredibilityLabel,
    pub stance_label: String,
}

impl Default for DisplayLabels {
    fn default() -> Self {
        Self {
            summary: String::new(),
            reason: String::new(),
            credibility_label: CredibilityLabel::Medium,
            stance_label: String::new(),
        }
    }
}

/// The scoring of one raw post against one outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPost {
    pub raw_post_id: i64,
    pub market_id: String,
    pub outcome_key: String,
    pub scores: OutcomeScores,
    pub flags: PostFlags,
    pub labels: DisplayLabels,
    pub scored_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_pins_out_of_range_scores() {
        let scores = OutcomeScores {
            relevance: 1.7,
            stance: -2.5,
            strength: -0.1,
            credibility: 0.5,
            confidence: 9.0,
        }
        .clamped();

        assert_eq!(scores.relevance, 1.0);
        assert_eq!(scores.stance, -1.0);
        assert_eq!(scores.strength, 0.0);
        assert_eq!(scores.credibility, 0.5);
        assert_eq!(scores.confidence, 1.0);
    }

    #[test]
    fn test_credibility_label_round_trip() {
        for label in [
            CredibilityLabel::High,
            CredibilityLabel::Medium,
            CredibilityLabel::Low,
        ] {
            assert_eq!(CredibilityLabel::try_from(label.as_str()).unwrap(), label);
        }
        assert!(CredibilityLabel::try_from("high").is_err());
    }
}
