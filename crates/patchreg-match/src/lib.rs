//! Patch matching for cross-spectral image registration.
//!
//! One matching pass turns a reference/moving pair into a [`VectorField`]:
//!
//! 1. [`build_representation`] makes both images comparable,
//! 2. [`compute_cost_surfaces`] scores every integer offset of every patch,
//! 3. [`build_vector_field`] refines each argmin to sub-pixel precision.
//!
//! [`match_patches`] runs all three. Global transform fitting and the
//! pyramid live in `patchreg-align`.

mod config;
mod cost;
mod error;
mod field;
mod refine;
mod representation;

pub use config::{
    AlignmentConfig, Distance, EstimatorParams, Neighborhood, PatchGrid, RefineMethod,
    RefineParams, RepresentationMode, TransformModel, REFINEMENT_MARGIN,
};
pub use cost::{compute_cost_surfaces, CostSurface, CostSurfaces};
pub use error::MatchError;
pub use field::{build_vector_field, match_patches, FieldSample, PatchMatch, VectorField};
pub use refine::{discrete_argmin, refine_surface, Fallbacks, RefineState, Refined};
pub use representation::{build_representation, laplacian_planes, luminance};
