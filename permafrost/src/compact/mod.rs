//! Compaction of values into relocatable regions, and back.
//!
//! A [`Compactor`] copies everything reachable from its roots
//! into a contiguous buffer. References between the copied objects
//! are stored relative to a base address, so the buffer can be
//! written to a file or sent elsewhere and loaded at any address.
//! A [`CompactedRegion`] takes ownership of such a buffer,
//! rewrites the references for the address at which it was loaded,
//! and hands out the roots as ordinary values.
//!
//! Objects in a compacted region are not reference counted.
//! They live exactly as long as the region that owns them.
//!
//! # Examples
//!
//! ```
//! use permafrost::{compact::{CompactedRegion, Compactor, CompactorConfig}, value::{Val, Value}};
//!
//! let greeting = Value::string_from_bytes(b"hello").unwrap();
//! let root = Value::array(vec![greeting.clone(), greeting]).unwrap();
//!
//! let mut compactor = Compactor::new(CompactorConfig::default());
//! compactor.compact(&root).unwrap();
//!
//! let mut region = CompactedRegion::from_compactor(&compactor).unwrap();
//! // SAFETY: The loaded value is dropped before the region.
//! let loaded = unsafe { region.read() }.unwrap();
//! assert!(loaded.is_compacted());
//! assert!(loaded.structurally_eq(&root));
//! # drop(loaded);
//! ```

pub use self::{compactor::*, config::*, error::*, region::*};

mod compactor;
mod config;
mod error;
mod layout;
mod region;

pub mod persist;
