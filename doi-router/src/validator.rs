use crate::errors::{DoiRouterError, Result};
use crate::types::{Batch, Identifier};

/// Largest batch accepted by default.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Admission check run before any lookup is scheduled.
#[derive(Debug, Clone, Copy)]
pub struct BatchValidator {
    max_batch_size: usize,
}

impl BatchValidator {
    pub fn new(max_batch_size: usize) -> Self {
        Self { max_batch_size }
    }

    /// Accepts batches of at most `max_batch_size` identifiers, each of which
    /// must still name a DOI once whitespace and resolver prefixes are removed.
    ///
    /// An empty batch is valid and produces an empty result.
    pub fn validate(&self, raw: Vec<String>) -> Result<Batch> {
        if raw.len() > self.max_batch_size {
            return Err(DoiRouterError::BatchTooLarge {
                size: raw.len(),
                max: self.max_batch_size,
            });
        }

        let identifiers: Vec<Identifier> = raw.into_iter().map(Identifier::new).collect();
        for (index, identifier) in identifiers.iter().enumerate() {
            if identifier.normalized().is_empty() {
                return Err(DoiRouterError::EmptyIdentifier { index });
            }
            if !identifier.is_addressable() {
                return Err(DoiRouterError::InvalidIdentifier { index });
            }
        }

        Ok(Batch::new(identifiers))
    }
}

impl Default for BatchValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BATCH_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dois(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.1/{i}")).collect()
    }

    #[test]
    fn test_accepts_up_to_limit() {
        let validator = BatchValidator::default();
        let batch = validator.validate(dois(1000)).unwrap();
        assert_eq!(batch.len(), 1000);
        assert_eq!(batch.identifiers()[999].as_str(), "10.1/999");
    }

    #[test]
    fn test_rejects_oversized_batch() {
        let validator = BatchValidator::default();
        let err = validator.validate(dois(1001)).unwrap_err();
        assert!(matches!(
            err,
            DoiRouterError::BatchTooLarge {
                size: 1001,
                max: 1000
            }
        ));
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let batch = BatchValidator::default().validate(vec![]).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_rejects_blank_identifier() {
        let raw = vec!["10.1/a".to_string(), "  ".to_string()];
        let err = BatchValidator::default().validate(raw).unwrap_err();
        assert!(matches!(err, DoiRouterError::EmptyIdentifier { index: 1 }));
    }

    #[test]
    fn test_rejects_bare_resolver_prefix() {
        for prefix in ["doi:", "https://doi.org/", " HTTP://DX.DOI.ORG/ "] {
            let raw = vec!["10.1/a".to_string(), prefix.to_string()];
            let err = BatchValidator::default().validate(raw).unwrap_err();
            assert!(
                matches!(err, DoiRouterError::EmptyIdentifier { index: 1 }),
                "{prefix:?}"
            );
        }
    }

    #[test]
    fn test_rejects_dot_segments() {
        for doi in ["10.1/../../admin", "doi:10.1/./a", ".."] {
            let raw = vec![doi.to_string(), "10.1/a".to_string()];
            let err = BatchValidator::default().validate(raw).unwrap_err();
            assert!(
                matches!(err, DoiRouterError::InvalidIdentifier { index: 0 }),
                "{doi:?}"
            );
            assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_keeps_order_and_duplicates() {
        let raw = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let batch = BatchValidator::new(3).validate(raw).unwrap();
        let ids: Vec<&str> = batch.identifiers().iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "b"]);
    }
}
