//! Signature placements on package documents
//!
//! Coordinates are normalized to the rendered page: `(0, 0)` is the top-left
//! corner and `(1, 1)` the bottom-right, so placements survive re-rendering
//! at a different zoom level.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::types::PackageDocId;

/// Session-local placement identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementId(pub String);

impl PlacementId {
    /// Generate a fresh client-side id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for PlacementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to an uploaded signature image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureImageRef(pub String);

impl SignatureImageRef {
    pub fn url(&self) -> &str {
        &self.0
    }
}

/// Where a placement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementOrigin {
    Manual,
    AiSuggested,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Page numbers start at 1")]
    InvalidPage,

    #[error("Position must be within the page (got x={x}, y={y})")]
    OutOfPage { x: f64, y: f64 },

    #[error("Size must be positive (got {width}x{height})")]
    NonPositiveSize { width: f64, height: f64 },

    #[error("Placement extends beyond the page edge")]
    Overflow,
}

/// Normalized position and size on a rendered page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PlacementRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check the rectangle lies fully within the unit page
    pub fn validate(&self) -> Result<(), GeometryError> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.x) || !in_unit(self.y) {
            return Err(GeometryError::OutOfPage {
                x: self.x,
                y: self.y,
            });
        }
        // NaN fails both comparisons, so test for the positive case
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(GeometryError::NonPositiveSize {
                width: self.width,
                height: self.height,
            });
        }
        if self.x + self.width > 1.0 || self.y + self.height > 1.0 {
            return Err(GeometryError::Overflow);
        }
        Ok(())
    }
}

/// A single signature (or placeholder) on one page of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePlacement {
    pub id: PlacementId,
    pub package_doc_id: PackageDocId,
    pub page_number: u32,
    pub rect: PlacementRect,
    pub signature_image: Option<SignatureImageRef>,
    pub origin: PlacementOrigin,
}

impl SignaturePlacement {
    /// Create a manual placement carrying a signature image
    pub fn manual(
        package_doc_id: PackageDocId,
        page_number: u32,
        rect: PlacementRect,
        image: SignatureImageRef,
    ) -> Result<Self, GeometryError> {
        validate_page(page_number)?;
        rect.validate()?;
        Ok(Self {
            id: PlacementId::generate(),
            package_doc_id,
            page_number,
            rect,
            signature_image: Some(image),
            origin: PlacementOrigin::Manual,
        })
    }

    /// Whether the placement can be submitted
    pub fn is_signed(&self) -> bool {
        self.signature_image.is_some()
    }
}

fn validate_page(page_number: u32) -> Result<(), GeometryError> {
    if page_number < 1 {
        return Err(GeometryError::InvalidPage);
    }
    Ok(())
}

/// Placement suggested by the AI auto-tag endpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedPlacement {
    pub page_number: u32,
    pub position_x: f64,
    pub position_y: f64,
    pub width: f64,
    pub height: f64,
}

impl SuggestedPlacement {
    /// Turn the suggestion into an unsigned placeholder for `package_doc_id`
    pub fn into_placeholder(
        self,
        package_doc_id: PackageDocId,
    ) -> Result<SignaturePlacement, GeometryError> {
        validate_page(self.page_number)?;
        let rect = PlacementRect::new(self.position_x, self.position_y, self.width, self.height);
        rect.validate()?;
        Ok(SignaturePlacement {
            id: PlacementId::generate(),
            package_doc_id,
            page_number: self.page_number,
            rect,
            signature_image: None,
            origin: PlacementOrigin::AiSuggested,
        })
    }
}
