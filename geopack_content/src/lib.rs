//! # Overview
//!
//! Crate for upgrading `.visual` assets and their geometry from the old packer to the new one.
//!
//! The [`Pipeline`](pipeline::Pipeline) works on three directories that are located in a common
//! base directory. The source directory contains the assets, the temporary directory receives
//! the output of the old packer and the output directory receives the output of the new packer
//! which runs in update mode on top of the temporary directory.
//!
//! ## Example:
//!
//! **Before a run:**
//!
//! ```text
//! base/
//! ├─ Camoulages/
//! │  ├─ tank/
//! │  │  ├─ hull.visual
//! │  │  ├─ hull.temp_model
//! ├─ old_pri-to-geo/geometrypack
//! ├─ new_pri-to-geo/geometrypack
//! ```
//!
//! **After a run:**
//!
//! ```text
//! base/
//! ├─ Camoulages/
//! │  ├─ tank/
//! │  │  ├─ hull.visual
//! │  ├─ lods/
//! │  │  ├─ tank/
//! │  │  │  ├─ hull_lod1.visual
//! │  │  │  ├─ hull_lod2.visual
//! │  │  │  ├─ hull_lod3.visual
//! ├─ Camoulages_GEO/
//! │  ├─ ... (output of the old packer)
//! ├─ Camoulages_Upgrade/
//! │  ├─ hull.geometry
//! │  ├─ hull_lod1.geometry
//! │  ├─ ...
//! │  ├─ tank/
//! │  │  ├─ hull.visual
//! │  ├─ lods/
//! │  │  ├─ tank/
//! │  │  │  ├─ hull_lod1.visual
//! │  │  │  ├─ ...
//! ```
//!
//! # Components
//!
//! * [`tag_stripper`] rewrites the node names in the visual files.
//! * [`lod_replicator`] generates the LOD variants of the visual files.
//! * [`reconciler`] clears, flattens and copies directory trees.
//! * [`process_runner`] runs a packer with a timeout and [`resource_monitor`] watches it.
//! * [`pipeline`] executes everything in order, configured by [`config`].

mod common;

pub mod config;
pub mod lod_replicator;
pub mod pipeline;
pub mod process_runner;
pub mod reconciler;
pub mod resource_monitor;
pub mod tag_stripper;

pub use common::{
    check_directory, check_file, has_extension, Error, Result, GEOMETRY_EXTENSION, TEMP_MODEL_EXTENSION, VISUAL_EXTENSION,
};
