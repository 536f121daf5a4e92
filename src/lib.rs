
//! Compress volumes of floating point samples into embedded bitstreams.
//!
//! The coder is a three-dimensional variant of SPECK (Set Partitioned
//! Embedded bloCK coding) running on biorthogonal 9/7 wavelet coefficients.
//! The produced bitstream is progressive: any prefix of it is itself a
//! valid, lower-fidelity encoding of the same volume.
//!
//! Use [`compress::Compressor`] and [`compress::Decompressor`] for the full
//! pipeline, or [`speck::Speck3d`] to drive the block coder on coefficients
//! you transformed yourself. Two-dimensional slices are volumes with a
//! z-extent of one.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::restriction,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
)]

#![deny(
    unused_variables,
    unused_assignments,
    unused_must_use,
    missing_copy_implementations,
    trivial_numeric_casts,
    redundant_semicolons
)]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod io;

pub mod math;
pub mod bits;
pub mod transform;
pub mod speck;
pub mod compress;
pub mod stats;

pub mod error;

/// Export the most important items from `vspeck`.
/// _Note: This includes a type called `Result`, possibly overwriting the default `std::Result` type usage._
pub mod prelude {

    pub use crate::compress::{ Compressor, Decompressor };
    pub use crate::speck::{ Speck3d, Mode };
    pub use crate::transform::Cdf97;
    pub use crate::bits::BitBuffer;
    pub use crate::stats::{ calc_stats, Stats };

    // common math
    pub use crate::math::Vec3;

    // error handling
    pub use crate::error::{ Result, Error, UnitResult };
}
