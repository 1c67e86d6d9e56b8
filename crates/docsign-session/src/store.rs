//! Per-document accumulation of signature placements
//!
//! Placements are keyed by package document and kept independent of
//! navigation order. The map itself is never exposed: all mutation goes
//! through `commit` and `merge_suggested`.

use shared_types::{PackageDocId, SignaturePlacement};
use std::collections::HashMap;
use tracing::debug;

use crate::error::ValidationError;

/// A placement ready for submission, with its owning document
#[derive(Debug, Clone, PartialEq)]
pub struct FlatPlacement {
    pub package_doc_id: PackageDocId,
    pub placement: SignaturePlacement,
}

#[derive(Debug, Clone)]
pub struct SignaturePlacementStore {
    /// Package order, used to keep `flatten` deterministic
    order: Vec<PackageDocId>,
    entries: HashMap<PackageDocId, Vec<SignaturePlacement>>,
}

impl SignaturePlacementStore {
    /// Create an empty store for the given package documents, in order
    pub fn new(order: Vec<PackageDocId>) -> Self {
        Self {
            order,
            entries: HashMap::new(),
        }
    }

    fn check_known(&self, id: &PackageDocId) -> Result<(), ValidationError> {
        if self.order.contains(id) {
            Ok(())
        } else {
            Err(ValidationError::UnknownDocument(id.clone()))
        }
    }

    /// Replace the placements recorded for `id`
    pub fn commit(
        &mut self,
        id: &PackageDocId,
        placements: Vec<SignaturePlacement>,
    ) -> Result<(), ValidationError> {
        self.check_known(id)?;
        debug!("Committing {} placements for {}", placements.len(), id);
        self.entries.insert(id.clone(), placements);
        Ok(())
    }

    /// Placements recorded for `id`; empty if none yet
    pub fn get(&self, id: &PackageDocId) -> &[SignaturePlacement] {
        self.entries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append AI-suggested placeholders after the existing placements.
    ///
    /// No de-duplication: identical geometry yields distinct entries.
    pub fn merge_suggested(
        &mut self,
        id: &PackageDocId,
        suggested: Vec<SignaturePlacement>,
    ) -> Result<usize, ValidationError> {
        self.check_known(id)?;
        let count = suggested.len();
        self.entries.entry(id.clone()).or_default().extend(suggested);
        debug!("Merged {} suggested placements into {}", count, id);
        Ok(count)
    }

    /// Every signed placement across the package, in package order.
    ///
    /// Placeholders without a signature image are skipped.
    pub fn flatten(&self) -> Vec<FlatPlacement> {
        self.order
            .iter()
            .flat_map(|id| {
                self.get(id)
                    .iter()
                    .filter(|p| p.is_signed())
                    .map(move |p| FlatPlacement {
                        package_doc_id: id.clone(),
                        placement: p.clone(),
                    })
            })
            .collect()
    }

    /// Total number of recorded placements, signed or not
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use shared_types::{PlacementRect, SignatureImageRef, SuggestedPlacement};

    fn ids() -> Vec<PackageDocId> {
        vec![
            PackageDocId::from("pd-1"),
            PackageDocId::from("pd-2"),
            PackageDocId::from("pd-3"),
        ]
    }

    fn signed(doc: &str, y: f64) -> SignaturePlacement {
        SignaturePlacement::manual(
            PackageDocId::from(doc),
            1,
            PlacementRect::new(0.1, y, 0.2, 0.05),
            SignatureImageRef("https://cdn/sig.png".to_string()),
        )
        .unwrap()
    }

    fn suggestion(doc: &str) -> SignaturePlacement {
        SuggestedPlacement {
            page_number: 1,
            position_x: 0.5,
            position_y: 0.5,
            width: 0.2,
            height: 0.05,
        }
        .into_placeholder(PackageDocId::from(doc))
        .unwrap()
    }

    #[test]
    fn test_get_unknown_is_empty() {
        let store = SignaturePlacementStore::new(ids());
        assert!(store.get(&PackageDocId::from("pd-1")).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_commit_overwrites() {
        let mut store = SignaturePlacementStore::new(ids());
        let id = PackageDocId::from("pd-1");

        store
            .commit(&id, vec![signed("pd-1", 0.1), signed("pd-1", 0.2)])
            .unwrap();
        store.commit(&id, vec![signed("pd-1", 0.3)]).unwrap();

        assert_eq!(store.get(&id).len(), 1);
        assert_eq!(store.get(&id)[0].rect.y, 0.3);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut store = SignaturePlacementStore::new(ids());
        let id = PackageDocId::from("pd-2");
        let placements = vec![signed("pd-2", 0.1)];

        store.commit(&id, placements.clone()).unwrap();
        let once = store.flatten();
        store.commit(&id, placements).unwrap();

        assert_eq!(store.flatten(), once);
    }

    #[test]
    fn test_commit_unknown_document_rejected() {
        let mut store = SignaturePlacementStore::new(ids());
        let err = store
            .commit(&PackageDocId::from("stranger"), Vec::new())
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownDocument(PackageDocId::from("stranger"))
        );
    }

    #[test]
    fn test_merge_suggested_appends_without_dedup() {
        let mut store = SignaturePlacementStore::new(ids());
        let id = PackageDocId::from("pd-1");
        store.commit(&id, vec![signed("pd-1", 0.1)]).unwrap();

        store
            .merge_suggested(&id, vec![suggestion("pd-1")])
            .unwrap();
        store
            .merge_suggested(&id, vec![suggestion("pd-1")])
            .unwrap();

        let placements = store.get(&id);
        assert_eq!(placements.len(), 3);
        assert_eq!(placements[1].rect, placements[2].rect);
        assert_ne!(placements[1].id, placements[2].id);
    }

    #[test]
    fn test_flatten_skips_unsigned_and_follows_package_order() {
        let mut store = SignaturePlacementStore::new(ids());
        store
            .commit(&PackageDocId::from("pd-3"), vec![signed("pd-3", 0.1)])
            .unwrap();
        store
            .commit(
                &PackageDocId::from("pd-1"),
                vec![signed("pd-1", 0.1), signed("pd-1", 0.2)],
            )
            .unwrap();
        store
            .merge_suggested(&PackageDocId::from("pd-1"), vec![suggestion("pd-1")])
            .unwrap();

        let flat = store.flatten();
        let order: Vec<&str> = flat.iter().map(|f| f.package_doc_id.0.as_str()).collect();

        assert_eq!(order, vec!["pd-1", "pd-1", "pd-3"]);
        assert_eq!(store.len(), 4);
    }
}
