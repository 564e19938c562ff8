//! Compaction of reference-counted object graphs into relocatable regions.
//!
//! Live objects are [values][`value::Value`]: reference-counted,
//! dynamically-kinded, and possibly forming cycles.
//! A [compactor][`compact::Compactor`] serializes everything reachable
//! from one or more roots into a single contiguous byte region.
//! A [compacted region][`compact::CompactedRegion`] takes such bytes,
//! wherever they happen to be loaded, and turns them back into values.

#![warn(missing_docs)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("Values are represented as 64-bit words");

pub mod compact;
pub mod integer;
pub mod value;
