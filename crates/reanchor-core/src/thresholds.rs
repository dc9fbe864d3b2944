//! Tunable confidence floors for every recovery decision.
//!
//! These are policy, not structure: the application reads them from the
//! `[recovery]` table of its config file and passes them down unchanged.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecoveryThresholds {
    /// Annotation accepted and rewritten at or above this confidence.
    pub annotation_recover_floor: f64,
    /// Annotation flagged for review at or above this confidence.
    pub annotation_review_floor: f64,

    /// Context-anchored tier acceptance.
    pub context_floor: f64,
    /// Chunk-bounded tier acceptance.
    pub chunk_bounded_floor: f64,
    /// Chunks searched on each side of the original chunk index.
    pub chunk_neighborhood: usize,
    /// Trigram tier acceptance (after the penalty is applied).
    pub trigram_floor: f64,
    /// Multiplier applied to raw trigram overlap.
    pub trigram_penalty: f64,

    /// Connection re-inserted automatically at or above this similarity.
    pub connection_auto_floor: f64,
    /// Connection flagged for review at or above this similarity.
    pub connection_review_floor: f64,

    pub metadata_embedding_floor: f64,
    pub metadata_lexical_floor: f64,
    pub metadata_position_floor: f64,
    /// Metadata copied only when the chosen signal reaches this.
    pub metadata_accept_floor: f64,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            annotation_recover_floor: 0.85,
            annotation_review_floor: 0.75,
            context_floor: 0.85,
            chunk_bounded_floor: 0.75,
            chunk_neighborhood: 2,
            trigram_floor: 0.60,
            trigram_penalty: 0.9,
            connection_auto_floor: 0.95,
            connection_review_floor: 0.85,
            metadata_embedding_floor: 0.85,
            metadata_lexical_floor: 0.80,
            metadata_position_floor: 0.50,
            metadata_accept_floor: 0.70,
        }
    }
}

impl RecoveryThresholds {
    /// Check ranges and orderings. Returns a description of the first
    /// violation.
    pub fn validate(&self) -> Result<(), String> {
        let floors = [
            ("annotation_recover_floor", self.annotation_recover_floor),
            ("annotation_review_floor", self.annotation_review_floor),
            ("context_floor", self.context_floor),
            ("chunk_bounded_floor", self.chunk_bounded_floor),
            ("trigram_floor", self.trigram_floor),
            ("trigram_penalty", self.trigram_penalty),
            ("connection_auto_floor", self.connection_auto_floor),
            ("connection_review_floor", self.connection_review_floor),
            ("metadata_embedding_floor", self.metadata_embedding_floor),
            ("metadata_lexical_floor", self.metadata_lexical_floor),
            ("metadata_position_floor", self.metadata_position_floor),
            ("metadata_accept_floor", self.metadata_accept_floor),
        ];
        for (name, value) in floors {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("recovery.{} must be in [0.0, 1.0]", name));
            }
        }
        if self.annotation_review_floor > self.annotation_recover_floor {
            return Err(
                "recovery.annotation_review_floor must be <= annotation_recover_floor".to_string(),
            );
        }
        if self.connection_review_floor > self.connection_auto_floor {
            return Err(
                "recovery.connection_review_floor must be <= connection_auto_floor".to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RecoveryThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_floors_rejected() {
        let t = RecoveryThresholds {
            connection_review_floor: 0.97,
            ..Default::default()
        };
        assert!(t.validate().unwrap_err().contains("connection_review_floor"));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let t = RecoveryThresholds {
            trigram_floor: 1.5,
            ..Default::default()
        };
        assert!(t.validate().is_err());
    }
}
