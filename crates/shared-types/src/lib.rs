pub mod placement;
pub mod types;

pub use placement::{
    GeometryError, PlacementId, PlacementOrigin, PlacementRect, SignatureImageRef,
    SignaturePlacement, SuggestedPlacement,
};
pub use types::{PackageDocId, PackageDocument, PackageId, PackageStatus, SigningPackage};
