

//! Low level binary input and output.
//! All multi-byte values are stored in little endian.

pub use ::std::io::{Read, Write};

use lebe::prelude::*;
use crate::error::{Result, UnitResult};
use std::path::Path;


/// Extension trait for primitive types like numbers and arrays.
pub trait Data: Sized + Default + Clone {

    /// Number of bytes this would consume in a file.
    const BYTE_SIZE: usize = ::std::mem::size_of::<Self>();

    /// Read a value of type `Self`.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Read as many values of type `Self` as fit into the specified slice.
    /// If the slice cannot be filled completely, returns `Error::Invalid`.
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Write this value to the writer.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of that slice to the writer.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read as many values of type `Self` as the specified count.
    #[inline]
    fn read_vec(read: &mut impl Read, count: usize) -> Result<Vec<Self>> {
        let mut vec = vec![Self::default(); count];
        Self::read_slice(read, &mut vec)?;
        Ok(vec)
    }
}


macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            #[inline]
            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            #[inline]
            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            #[inline]
            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);


/// Read a flat little-endian `f32` volume from a file,
/// as produced by most scientific simulation dumps.
/// The file length must be exactly `count * 4` bytes.
pub fn read_f32_file(path: impl AsRef<Path>, count: usize) -> Result<Vec<f32>> {
    let file = std::fs::File::open(path)?;
    let mut read = std::io::BufReader::new(file);

    let values = f32::read_vec(&mut read, count)?;
    Ok(values)
}

/// Write a flat little-endian `f32` volume to a file.
pub fn write_f32_file(path: impl AsRef<Path>, values: &[f32]) -> UnitResult {
    let file = std::fs::File::create(path)?;
    let mut write = std::io::BufWriter::new(file);

    f32::write_slice(&mut write, values)?;
    Ok(())
}
