//! Decodes dispatch errors into human-readable metadata
//!
//! Classification never fails: lookup problems degrade to the `unknown`
//! fallback so the original transaction failure still reaches the caller.

use crate::ledger::{DispatchError, LedgerConnection};
use crate::runtime_metadata::MetadataRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub pallet: String,
    pub error: String,
    pub details: String,
}

impl ErrorMetadata {
    pub fn unknown(details: impl Into<String>) -> Self {
        Self {
            pallet: "unknown".to_string(),
            error: "Unknown".to_string(),
            details: details.into(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.pallet == "unknown"
    }
}

impl fmt::Display for ErrorMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{}.{}", self.pallet, self.error)
        } else {
            write!(f, "{}.{}: {}", self.pallet, self.error, self.details)
        }
    }
}

/// Classify using the runtime metadata of `connection`
pub fn classify(connection: &dyn LedgerConnection, error: &DispatchError) -> ErrorMetadata {
    classify_with(connection.metadata(), error)
}

pub fn classify_with(registry: &MetadataRegistry, error: &DispatchError) -> ErrorMetadata {
    let DispatchError::Module { index, error: code } = error else {
        return ErrorMetadata::unknown("An unknown error occurred");
    };
    match registry.find_meta_error(*index, *code) {
        Ok(Some(meta)) => ErrorMetadata {
            pallet: meta.section,
            error: meta.name,
            details: meta.docs.join(", ").trim().to_string(),
        },
        Ok(None) => ErrorMetadata::unknown(format!("index:{} error:0x{}", index, hex::encode(code))),
        Err(e) => {
            warn!(index, error = %hex::encode(code), "metadata lookup failed: {e}");
            ErrorMetadata::unknown(format!("Failed to find meta error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_metadata::{ErrorVariant, PalletMetadata};

    fn registry() -> MetadataRegistry {
        MetadataRegistry::new(1).with_pallet(PalletMetadata {
            name: "logionLoc".into(),
            index: 9,
            errors: vec![ErrorVariant::new(
                "CollectionItemAlreadyExists",
                &["Occurs when trying to add an item", " whose ID is already used "],
            )],
        })
    }

    #[test]
    fn module_error_resolves_name_and_joined_docs() {
        let meta = classify_with(&registry(), &DispatchError::Module { index: 9, error: [0; 4] });
        assert_eq!(meta.pallet, "logionLoc");
        assert_eq!(meta.error, "CollectionItemAlreadyExists");
        assert_eq!(
            meta.details,
            "Occurs when trying to add an item,  whose ID is already used"
        );
    }

    #[test]
    fn unknown_index_falls_back() {
        let meta = classify_with(&registry(), &DispatchError::Module { index: 2, error: [5, 0, 0, 0] });
        assert_eq!(meta, ErrorMetadata::unknown("index:2 error:0x05000000"));

        // Every error byte is kept, not only the variant index
        let nested = classify_with(&registry(), &DispatchError::Module { index: 2, error: [5, 1, 0, 7] });
        assert_eq!(nested, ErrorMetadata::unknown("index:2 error:0x05010007"));
    }

    #[test]
    fn lookup_failure_falls_back() {
        let meta = classify_with(
            &MetadataRegistry::default(),
            &DispatchError::Module { index: 9, error: [0; 4] },
        );
        assert!(meta.is_unknown());
        assert!(meta.details.starts_with("Failed to find meta error"));

        let nested = classify_with(&registry(), &DispatchError::Module { index: 9, error: [0, 3, 0, 0] });
        assert!(nested.is_unknown());
    }

    #[test]
    fn non_module_errors_fall_back() {
        for err in [
            DispatchError::BadOrigin,
            DispatchError::CannotLookup,
            DispatchError::Other("boom".into()),
            DispatchError::Arithmetic("Overflow".into()),
        ] {
            let meta = classify_with(&registry(), &err);
            assert_eq!(meta, ErrorMetadata::unknown("An unknown error occurred"));
        }
    }
}
