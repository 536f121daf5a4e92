
//! Simple math utilities.

use std::convert::TryFrom;

/// Simple three-dimensional vector of any numerical type.
/// Supports only few mathematical operations
/// as this is used mainly as data struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Vec3<T> (pub T, pub T, pub T);

impl<T> Vec3<T> {

    /// Returns the vector with the maximum of either coordinates.
    pub fn max(self, other: Self) -> Self where T: Ord {
        Vec3(self.0.max(other.0), self.1.max(other.1), self.2.max(other.2))
    }

    /// Returns the vector with the minimum of either coordinates.
    pub fn min(self, other: Self) -> Self where T: Ord {
        Vec3(self.0.min(other.0), self.1.min(other.1), self.2.min(other.2))
    }

    /// Try to convert all components of this vector to a new type,
    /// yielding either a vector of that new type, or an error.
    pub fn try_from<S>(value: Vec3<S>) -> std::result::Result<Self, T::Error> where T: TryFrom<S> {
        let x = T::try_from(value.0)?;
        let y = T::try_from(value.1)?;
        let z = T::try_from(value.2)?;
        Ok(Vec3(x, y, z))
    }

    /// Seeing this vector as the dimensions of a volume,
    /// this returns the number of samples that the volume contains.
    #[inline] pub fn volume(self) -> T where T: std::ops::Mul<T, Output = T> {
        self.0 * self.1 * self.2
    }

    /// The first component of this 3D vector.
    #[inline] pub fn x(self) -> T { self.0 }

    /// The second component of this 3D vector.
    #[inline] pub fn y(self) -> T { self.1 }

    /// The third component of this 3D vector.
    #[inline] pub fn z(self) -> T { self.2 }
}

impl Vec3<usize> {

    /// Convert a three-dimensional coordinate to an index into a flattened
    /// volume array that stores samples with x varying fastest and z slowest.
    /// In debug mode, panics for an index out of bounds.
    #[inline]
    pub fn flat_index_for_size(self, dimensions: Vec3<usize>) -> usize {
        debug_assert!(
            self.x() < dimensions.x() && self.y() < dimensions.y() && self.z() < dimensions.z(),
            "Vec3 index {:?} is invalid for dimensions {:?}", self, dimensions
        );

        let Vec3(x, y, z) = self;
        (z * dimensions.y() + y) * dimensions.x() + x
    }
}

impl<T> From<(T, T, T)> for Vec3<T> {
    fn from((x, y, z): (T, T, T)) -> Self { Vec3(x, y, z) }
}

impl<T> From<Vec3<T>> for (T, T, T) {
    fn from(vec3: Vec3<T>) -> Self { (vec3.0, vec3.1, vec3.2) }
}


/// How many levels of dyadic wavelet transform a signal of this length supports.
/// Eight samples is the minimal length for one level.
pub(crate) fn num_of_xforms(len: usize) -> usize {
    debug_assert!(len > 0);

    let f = (len as f32 / 8.0).log2();
    if f < 0.0 { 0 } else { f as usize + 1 }
}

/// How many halving steps reduce a signal of this length to a single sample.
/// Each step keeps the larger half.
pub(crate) fn num_of_partitions(mut len: usize) -> usize {
    let mut parts = 0;

    while len > 1 {
        parts += 1;
        len -= len / 2;
    }

    parts
}

/// The lengths of the approximation and detail signals
/// after `levels` dyadic decompositions of a signal with the specified length.
pub(crate) fn approx_detail_len(orig_len: usize, levels: usize) -> (usize, usize) {
    let mut low_len = orig_len;
    let mut high_len = 0;

    for _ in 0 .. levels {
        let new_low = (low_len + 1) / 2;
        high_len = low_len - new_low;
        low_len = new_low;
    }

    (low_len, high_len)
}
