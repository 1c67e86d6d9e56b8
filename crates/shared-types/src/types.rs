//! Signing package model as served by `GET /packages/{id}`

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Identifier of a signing package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub String);

/// Identifier of a document's membership record within a package.
///
/// Distinct from the underlying document id: the same document may belong
/// to several packages, each with its own `PackageDocId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageDocId(pub String);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for PackageDocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&str> for PackageDocId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Package lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageStatus {
    Draft,
    Pending,
    Completed,
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageStatus::Draft => write!(f, "DRAFT"),
            PackageStatus::Pending => write!(f, "PENDING"),
            PackageStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// One document's membership in a package, fixing its position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDocument {
    pub id: PackageDocId,
    pub document_id: String,
    pub version_id: String,
    pub title: String,
    pub order: u32,
}

/// An ordered bundle of documents signed as one unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningPackage {
    pub id: PackageId,
    pub title: String,
    pub status: PackageStatus,
    #[serde(default)]
    pub documents: Vec<PackageDocument>,
}

impl SigningPackage {
    /// Sort documents by their ordinal position.
    ///
    /// The server does not guarantee array order matches `order`.
    pub fn into_ordered(mut self) -> Self {
        self.documents.sort_by_key(|d| d.order);
        self
    }

    /// Number of documents in the package
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// First membership id that appears more than once, if any
    pub fn duplicate_document(&self) -> Option<&PackageDocId> {
        let mut seen = HashSet::new();
        self.documents
            .iter()
            .map(|d| &d.id)
            .find(|id| !seen.insert(*id))
    }
}
