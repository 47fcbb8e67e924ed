//! Runtime metadata registry: pallet errors by (module index, error index)

use std::collections::BTreeMap;
use thiserror::Error;

/// Human-readable description of one module error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaError {
    pub section: String,
    pub name: String,
    pub docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorVariant {
    pub name: String,
    pub docs: Vec<String>,
}

impl ErrorVariant {
    pub fn new(name: impl Into<String>, docs: &[&str]) -> Self {
        Self {
            name: name.into(),
            docs: docs.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PalletMetadata {
    pub name: String,
    pub index: u8,
    pub errors: Vec<ErrorVariant>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataLookupError {
    #[error("metadata registry is not loaded")]
    NotLoaded,
    #[error("pallet {pallet} error {variant} carries nested data 0x{data} not described by metadata")]
    NestedError {
        pallet: String,
        variant: u8,
        data: String,
    },
}

/// Metadata of one node runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRegistry {
    spec_version: u32,
    pallets: BTreeMap<u8, PalletMetadata>,
}

impl MetadataRegistry {
    pub fn new(spec_version: u32) -> Self {
        Self {
            spec_version,
            pallets: BTreeMap::new(),
        }
    }

    pub fn with_pallet(mut self, pallet: PalletMetadata) -> Self {
        self.pallets.insert(pallet.index, pallet);
        self
    }

    pub fn spec_version(&self) -> u32 {
        self.spec_version
    }

    pub fn pallet(&self, index: u8) -> Option<&PalletMetadata> {
        self.pallets.get(&index)
    }

    pub fn pallet_by_name(&self, name: &str) -> Option<&PalletMetadata> {
        self.pallets.values().find(|p| p.name == name)
    }

    /// Encoded module error for the variant `name` of pallet `pallet`
    pub fn module_error(&self, pallet: &str, name: &str) -> Option<(u8, [u8; 4])> {
        let p = self.pallet_by_name(pallet)?;
        let variant = p.errors.iter().position(|e| e.name == name)?;
        let variant = u8::try_from(variant).ok()?;
        Some((p.index, [variant, 0, 0, 0]))
    }

    /// Looks up a module error.
    ///
    /// `Ok(None)` means the registry has no entry for the index pair. The
    /// first error byte selects the variant; the remaining bytes must be
    /// zero since nested error payloads are not described here.
    pub fn find_meta_error(
        &self,
        index: u8,
        error: [u8; 4],
    ) -> Result<Option<MetaError>, MetadataLookupError> {
        if self.pallets.is_empty() {
            return Err(MetadataLookupError::NotLoaded);
        }
        let Some(pallet) = self.pallets.get(&index) else {
            return Ok(None);
        };
        let variant = error[0];
        if error[1..].iter().any(|b| *b != 0) {
            return Err(MetadataLookupError::NestedError {
                pallet: pallet.name.clone(),
                variant,
                data: hex::encode(&error[1..]),
            });
        }
        Ok(pallet.errors.get(usize::from(variant)).map(|e| MetaError {
            section: pallet.name.clone(),
            name: e.name.clone(),
            docs: e.docs.clone(),
        }))
    }
}
