//! # MPEG-DASH manifests
//!
//! [`MpdManifestLoader`] fetches an MPD over HTTP and maps it onto the
//! [`crate::manifest`] model consumed by the planner.
//!
//! Supported addressing:
//!
//! *   `SegmentTemplate` with `@duration` (numbered segments), mapped to
//!     [`crate::manifest::TemplateIndex`].
//! *   `SegmentTemplate` with `SegmentTimeline` (explicitly timed segments with repeats,
//!     including `@r="-1"`), expanded into a [`crate::manifest::ListIndex`].
//!
//! Representations using `SegmentBase` or `SegmentList` are skipped: the prefetcher
//! has nothing to plan for them.

mod loader;
pub mod template;
pub(crate) mod url;

pub use loader::MpdManifestLoader;
