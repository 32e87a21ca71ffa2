use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reputation of a user who has never voted.
pub const BASE_REPUTATION: f64 = 1.0;

/// Reputation gained per vote cast.
pub const REPUTATION_PER_VOTE: f64 = 0.1;

/// Reputation ceiling.
pub const MAX_REPUTATION: f64 = 2.0;

/// Minimum score for a file to count as verified.
pub const VERIFIED_THRESHOLD: f64 = 75.0;

/// Minimum score for a file to count as disputed rather than suspicious.
pub const DISPUTED_THRESHOLD: f64 = 50.0;

/// Default number of entries returned by top verifier queries.
pub const DEFAULT_TOP_VERIFIERS: usize = 10;

/// Reputation earned after `votes` lifetime votes.
pub fn reputation_for_votes(votes: u32) -> f64 {
    (BASE_REPUTATION + f64::from(votes) * REPUTATION_PER_VOTE).min(MAX_REPUTATION)
}

/// One user's judgment on one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub user: String,
    pub is_authentic: bool,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
    /// Voter reputation captured when the vote was last submitted.
    pub reputation_weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Votes on one file and the scores derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileVerificationRecord {
    pub votes: Vec<Vote>,
    pub authenticity_score: f64,
    pub total_votes: usize,
    pub positive_votes: usize,
    pub negative_votes: usize,
}

impl FileVerificationRecord {
    /// Recompute score and counts from the vote list.
    pub fn rescore(&mut self) {
        let total_weight: f64 = self.votes.iter().map(|vote| vote.reputation_weight).sum();
        let positive_weight: f64 = self
            .votes
            .iter()
            .filter(|vote| vote.is_authentic)
            .map(|vote| vote.reputation_weight)
            .sum();

        self.authenticity_score = if total_weight > 0.0 {
            round2(positive_weight / total_weight * 100.0)
        } else {
            0.0
        };
        self.total_votes = self.votes.len();
        self.positive_votes = self.votes.iter().filter(|vote| vote.is_authentic).count();
        self.negative_votes = self.total_votes - self.positive_votes;
    }

    pub fn status(&self) -> VerificationStatus {
        VerificationStatus::classify(self.total_votes, self.authenticity_score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Disputed,
    Suspicious,
}

impl VerificationStatus {
    pub fn classify(total_votes: usize, score: f64) -> Self {
        if total_votes == 0 {
            VerificationStatus::Unverified
        } else if score >= VERIFIED_THRESHOLD {
            VerificationStatus::Verified
        } else if score >= DISPUTED_THRESHOLD {
            VerificationStatus::Disputed
        } else {
            VerificationStatus::Suspicious
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Unverified => "unverified",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Disputed => "disputed",
            VerificationStatus::Suspicious => "suspicious",
        }
    }
}

/// Snapshot of a file's verification returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVerification {
    #[serde(flatten)]
    pub record: FileVerificationRecord,
    pub status: VerificationStatus,
}

impl From<FileVerificationRecord> for FileVerification {
    fn from(record: FileVerificationRecord) -> Self {
        let status = record.status();
        Self { record, status }
    }
}

/// Aggregate statistics over every verified file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total_files_verified: usize,
    pub total_votes: usize,
    pub verified_files: usize,
    pub disputed_files: usize,
    pub suspicious_files: usize,
    pub average_authenticity: f64,
    pub total_verifiers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierRank {
    pub user: String,
    pub reputation: f64,
    pub rank: usize,
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
