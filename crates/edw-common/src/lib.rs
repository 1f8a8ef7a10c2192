//! EDW Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared primitives for the EDW warehouse workspace.
//!
//! # Overview
//!
//! - **Fingerprints**: MD5 content hashes and the validation key derived from
//!   a (hash, size) pair
//! - **License plates**: short, typeable identifiers derived from file ids
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use edw_common::fingerprint::{compute_validation_key, file_md5};
//! use edw_common::license_plate::plate_for_file_id;
//!
//! fn describe(path: &str, size: u64, id: i64) -> edw_common::Result<()> {
//!     let hash = file_md5(path)?;
//!     let key = compute_validation_key(&hash, size)?;
//!     let plate = plate_for_file_id("ENCFF", id)?;
//!     println!("{plate} {hash} {key}");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod fingerprint;
pub mod license_plate;
pub mod logging;

pub use error::{EdwError, Result};
