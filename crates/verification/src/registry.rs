//! Peer verification registry.

use crate::errors::{Result, VerificationError};
use crate::types::{
    reputation_for_votes, round2, FileVerification, FileVerificationRecord, VerificationStats,
    VerificationStatus, VerifierRank, Vote, BASE_REPUTATION,
};
use chrono::Utc;
use fileledger_storage::{load_or_fresh, SnapshotStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Persisted layout: per-file records plus the reputation table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationDocument {
    pub verifications: BTreeMap<String, FileVerificationRecord>,
    pub reputation: BTreeMap<String, f64>,
}

pub type VerificationStore = Arc<dyn SnapshotStore<VerificationDocument>>;

/// Owns every vote and every reputation score.
///
/// Lifetime vote counts are running counters rebuilt from the records on open.
pub struct VerificationRegistry {
    document: VerificationDocument,
    votes_cast: BTreeMap<String, u32>,
    store: VerificationStore,
    pending_flush: bool,
}

impl VerificationRegistry {
    pub fn open(store: VerificationStore) -> Self {
        let mut document: VerificationDocument =
            load_or_fresh(store.as_ref()).unwrap_or_default();

        let votes_cast = count_votes(&document);
        // Reputation always follows from the vote counts.
        for (user, votes) in &votes_cast {
            document
                .reputation
                .insert(user.clone(), reputation_for_votes(*votes));
        }

        info!(
            files = document.verifications.len(),
            verifiers = document.reputation.len(),
            "Loaded verifications from {}",
            store.describe()
        );
        Self {
            document,
            votes_cast,
            store,
            pending_flush: false,
        }
    }

    /// Record `user`'s judgment on `file_hash`, replacing any earlier vote by
    /// the same user on that file.
    ///
    /// The vote carries the user's reputation as it stands now. Scores for the
    /// file are recomputed, then the user's reputation is raised if this was a
    /// new vote.
    pub fn submit_verification(
        &mut self,
        file_hash: &str,
        user: &str,
        is_authentic: bool,
        comment: &str,
    ) -> Result<FileVerification> {
        if file_hash.trim().is_empty() {
            return Err(VerificationError::InvalidVote("file hash is empty".into()));
        }
        if user.trim().is_empty() {
            return Err(VerificationError::InvalidVote("user is empty".into()));
        }

        let weight = self.reputation(user);
        let now = Utc::now();
        let record = self
            .document
            .verifications
            .entry(file_hash.to_string())
            .or_default();

        let is_new = match record.votes.iter_mut().find(|vote| vote.user == user) {
            Some(vote) => {
                vote.is_authentic = is_authentic;
                vote.comment = comment.to_string();
                vote.reputation_weight = weight;
                vote.updated_at = Some(now);
                false
            }
            None => {
                record.votes.push(Vote {
                    user: user.to_string(),
                    is_authentic,
                    comment: comment.to_string(),
                    timestamp: now,
                    reputation_weight: weight,
                    updated_at: None,
                });
                true
            }
        };
        record.rescore();
        let snapshot = FileVerification::from(record.clone());

        if is_new {
            let votes = self.votes_cast.entry(user.to_string()).or_insert(0);
            *votes += 1;
        }
        let votes = self.votes_cast.get(user).copied().unwrap_or(0);
        self.document
            .reputation
            .insert(user.to_string(), reputation_for_votes(votes));

        debug!(
            file_hash,
            user,
            is_authentic,
            score = snapshot.record.authenticity_score,
            status = snapshot.status.as_str(),
            "Recorded verification vote"
        );
        self.persist();
        Ok(snapshot)
    }

    /// Current verification of `file_hash`; unverified and empty when no one
    /// has voted on it.
    pub fn file_verification(&self, file_hash: &str) -> FileVerification {
        self.document
            .verifications
            .get(file_hash)
            .cloned()
            .unwrap_or_default()
            .into()
    }

    pub fn record(&self, file_hash: &str) -> Option<&FileVerificationRecord> {
        self.document.verifications.get(file_hash)
    }

    /// Reputation of `user`, [`BASE_REPUTATION`] for someone who never voted.
    pub fn reputation(&self, user: &str) -> f64 {
        self.document
            .reputation
            .get(user)
            .copied()
            .unwrap_or(BASE_REPUTATION)
    }

    /// Users ranked by reputation, highest first. Ties rank alphabetically.
    pub fn top_verifiers(&self, limit: usize) -> Vec<VerifierRank> {
        let mut ranked: Vec<(&String, f64)> = self
            .document
            .reputation
            .iter()
            .map(|(user, reputation)| (user, *reputation))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        ranked
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, (user, reputation))| VerifierRank {
                user: user.clone(),
                reputation,
                rank: idx + 1,
            })
            .collect()
    }

    pub fn stats(&self) -> VerificationStats {
        let records = &self.document.verifications;
        let mut stats = VerificationStats {
            total_files_verified: records.len(),
            total_verifiers: self.document.reputation.len(),
            ..Default::default()
        };

        let mut score_sum = 0.0;
        let mut scored = 0usize;
        for record in records.values() {
            stats.total_votes += record.total_votes;
            match record.status() {
                VerificationStatus::Verified => stats.verified_files += 1,
                VerificationStatus::Disputed => stats.disputed_files += 1,
                VerificationStatus::Suspicious => stats.suspicious_files += 1,
                VerificationStatus::Unverified => continue,
            }
            score_sum += record.authenticity_score;
            scored += 1;
        }
        if scored > 0 {
            stats.average_authenticity = round2(score_sum / scored as f64);
        }
        stats
    }

    pub fn document(&self) -> &VerificationDocument {
        &self.document
    }

    /// True when the in-memory records have not reached the store.
    pub fn pending_flush(&self) -> bool {
        self.pending_flush
    }

    /// Retry persistence, surfacing the error this time.
    pub fn flush(&mut self) -> Result<()> {
        self.store.save(&self.document)?;
        self.pending_flush = false;
        Ok(())
    }

    fn persist(&mut self) {
        match self.store.save(&self.document) {
            Ok(()) => self.pending_flush = false,
            Err(err) => {
                error!(
                    store = %self.store.describe(),
                    error = %err,
                    "Failed to persist verifications, continuing in memory"
                );
                self.pending_flush = true;
            }
        }
    }
}

fn count_votes(document: &VerificationDocument) -> BTreeMap<String, u32> {
    let mut counts = BTreeMap::new();
    for record in document.verifications.values() {
        for vote in &record.votes {
            *counts.entry(vote.user.clone()).or_insert(0u32) += 1;
        }
    }
    counts
}
