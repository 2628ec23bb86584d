//! Nearest-neighbour matching of a probe embedding against enrolled faces.

use crate::types::Embedding;

/// Maximum Euclidean distance at which two embeddings are the same identity.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Closest enrolled identity to a probe, whether or not it was accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identity: String,
    pub distance: f32,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Recognized {
        identity: String,
        distance: f32,
        /// `1 - distance`.
        confidence: f32,
    },
    Unrecognized {
        /// Best rejected candidate; `None` when the gallery was empty.
        closest: Option<Candidate>,
    },
}

impl MatchOutcome {
    pub fn is_recognized(&self) -> bool {
        matches!(self, MatchOutcome::Recognized { .. })
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchOutcome::Recognized { identity, .. } => Some(identity),
            MatchOutcome::Unrecognized { .. } => None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare<'a, I>(&self, probe: &Embedding, gallery: I, threshold: f32) -> MatchOutcome
    where
        I: IntoIterator<Item = (&'a str, &'a Embedding)>;
}

/// Linear-scan Euclidean matcher.
///
/// Visits every gallery entry. On equal minimum distance the first entry in
/// iteration order wins.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare<'a, I>(&self, probe: &Embedding, gallery: I, threshold: f32) -> MatchOutcome
    where
        I: IntoIterator<Item = (&'a str, &'a Embedding)>,
    {
        let mut best: Option<Candidate> = None;

        for (identity, enrolled) in gallery {
            if enrolled.dim() != probe.dim() {
                tracing::debug!(
                    identity,
                    enrolled_dim = enrolled.dim(),
                    probe_dim = probe.dim(),
                    "skipping embedding with mismatched dimension"
                );
                continue;
            }

            let distance = probe.euclidean_distance(enrolled);
            let closer = best.as_ref().map_or(true, |b| distance < b.distance);
            if closer {
                best = Some(Candidate {
                    identity: identity.to_string(),
                    distance,
                });
            }
        }

        match best {
            Some(c) if c.distance <= threshold => MatchOutcome::Recognized {
                confidence: 1.0 - c.distance,
                identity: c.identity,
                distance: c.distance,
            },
            closest => MatchOutcome::Unrecognized { closest },
        }
    }
}
