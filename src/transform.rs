
//! The biorthogonal 9/7 wavelet transform, forward and inverse.
//!
//! The decomposition is wavelet-packet style: every xy slice is transformed
//! for as many levels as the shorter of the two axes supports, then every
//! z column is transformed for as many levels as the z axis supports.
//! The coder's initial subband decomposition mirrors exactly this layout.

use crate::error::{Error, Result, UnitResult};
use crate::math::{Vec3, num_of_xforms, approx_detail_len};
use smallvec::SmallVec;


// Filter bank coefficients from "Biorthogonal Bases of Compactly Supported
// Wavelets", Cohen et al., page 551, with the lifting factorization
// of Daubechies and Sweldens.
const H: [f64; 5] = [
    0.602949018236, 0.266864118443, -0.078223266529,
    -0.016864118443, 0.026748757411,
];

const R0: f64 = H[0] - 2.0 * H[4] * H[1] / H[3];
const R1: f64 = H[2] - H[4] - H[4] * H[1] / H[3];
const S0: f64 = H[1] - H[3] - H[3] * R0 / R1;
const T0: f64 = H[0] - 2.0 * (H[2] - H[4]);

const ALPHA: f64 = H[4] / H[3];
const BETA: f64 = H[3] / R1;
const GAMMA: f64 = R1 / S0;
const DELTA: f64 = S0 / T0;
const EPSILON: f64 = std::f64::consts::SQRT_2 * T0;

/// Lengths of the per-level approximation signals, for a handful of levels.
type LevelLengths = SmallVec<[usize; 8]>;


/// Owns a volume of samples and transforms it in place.
///
/// The sample mean is subtracted before the forward transform
/// and added back after the inverse transform, so that the
/// coefficients are centered around zero.
#[derive(Debug, Clone, Default)]
pub struct Cdf97 {
    data: Vec<f64>,
    dimensions: Vec3<usize>,
    mean: f64,
}

impl Cdf97 {

    /// A transformer for volumes with the specified dimensions.
    /// Two-dimensional slices use a z extent of one.
    pub fn new(dimensions: Vec3<usize>) -> Result<Self> {
        if dimensions.volume() == 0 {
            return Err(Error::invalid("volume dimensions"));
        }

        Ok(Cdf97 { data: Vec::new(), dimensions, mean: 0.0 })
    }

    /// Copy the caller's samples into this transformer.
    pub fn copy_data(&mut self, values: &[f64]) -> UnitResult {
        if values.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        self.data.clear();
        self.data.extend_from_slice(values);
        Ok(())
    }

    /// Move the caller's samples into this transformer without copying.
    pub fn take_data(&mut self, values: Vec<f64>) -> UnitResult {
        if values.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        self.data = values;
        Ok(())
    }

    /// Move the samples out of this transformer.
    pub fn release_data(&mut self) -> Vec<f64> {
        std::mem::take(&mut self.data)
    }

    /// The samples currently owned by this transformer.
    pub fn data(&self) -> &[f64] { &self.data }

    /// The sample mean that was subtracted by the forward transform.
    pub fn image_mean(&self) -> f64 { self.mean }

    /// Provide the sample mean that the inverse transform should add back.
    pub fn set_image_mean(&mut self, mean: f64) { self.mean = mean; }

    /// Forward transform of the whole volume, in place.
    pub fn dwt3d(&mut self) -> UnitResult {
        let Vec3(dim_x, dim_y, dim_z) = self.dimensions;
        if self.data.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        self.mean = self.data.iter().sum::<f64>() / self.data.len() as f64;
        let mean = self.mean;
        for value in &mut self.data { *value -= mean; }

        let plane_size = dim_x * dim_y;
        let xy_levels = num_of_xforms(dim_x.min(dim_y));
        let z_levels = num_of_xforms(dim_z);

        let mut buffer = vec![ 0.0; dim_x.max(dim_y).max(dim_z) ];
        let mut rearranged = buffer.clone();

        for z in 0 .. dim_z {
            let plane = &mut self.data[z * plane_size .. (z + 1) * plane_size];
            for level in 0 .. xy_levels {
                let (len_x, _) = approx_detail_len(dim_x, level);
                let (len_y, _) = approx_detail_len(dim_y, level);
                forward_2d_one_level(plane, dim_x, len_x, len_y, &mut buffer, &mut rearranged);
            }
        }

        if z_levels > 0 {
            let mut column = vec![ 0.0; dim_z ];
            for column_start in 0 .. plane_size {
                for z in 0 .. dim_z { column[z] = self.data[column_start + z * plane_size]; }
                forward_1d(&mut column, z_levels, &mut buffer, &mut rearranged);
                for z in 0 .. dim_z { self.data[column_start + z * plane_size] = column[z]; }
            }
        }

        Ok(())
    }

    /// Inverse transform of the whole volume, in place.
    pub fn idwt3d(&mut self) -> UnitResult {
        let Vec3(dim_x, dim_y, dim_z) = self.dimensions;
        if self.data.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        let plane_size = dim_x * dim_y;
        let xy_levels = num_of_xforms(dim_x.min(dim_y));
        let z_levels = num_of_xforms(dim_z);

        let mut buffer = vec![ 0.0; dim_x.max(dim_y).max(dim_z) ];
        let mut rearranged = buffer.clone();

        if z_levels > 0 {
            let mut column = vec![ 0.0; dim_z ];
            for column_start in 0 .. plane_size {
                for z in 0 .. dim_z { column[z] = self.data[column_start + z * plane_size]; }
                inverse_1d(&mut column, z_levels, &mut buffer, &mut rearranged);
                for z in 0 .. dim_z { self.data[column_start + z * plane_size] = column[z]; }
            }
        }

        for z in 0 .. dim_z {
            let plane = &mut self.data[z * plane_size .. (z + 1) * plane_size];
            for level in (0 .. xy_levels).rev() {
                let (len_x, _) = approx_detail_len(dim_x, level);
                let (len_y, _) = approx_detail_len(dim_y, level);
                inverse_2d_one_level(plane, dim_x, len_x, len_y, &mut buffer, &mut rearranged);
            }
        }

        let mean = self.mean;
        for value in &mut self.data { *value += mean; }

        Ok(())
    }
}


/// Forward transform of a one-dimensional signal over multiple levels.
fn forward_1d(signal: &mut [f64], levels: usize, buffer: &mut [f64], rearranged: &mut [f64]) {
    let lengths: LevelLengths = (0 .. levels)
        .map(|level| approx_detail_len(signal.len(), level).0)
        .collect();

    for &length in &lengths {
        let current = &mut signal[.. length];
        buffer[.. length].copy_from_slice(current);

        if length % 2 == 0 { analysis_symmetric_even(&mut buffer[.. length]); }
        else               { analysis_symmetric_odd(&mut buffer[.. length]); }

        subbands_from_interleaved(&mut rearranged[.. length], &buffer[.. length]);
        current.copy_from_slice(&rearranged[.. length]);
    }
}

/// Inverse transform of a one-dimensional signal over multiple levels.
fn inverse_1d(signal: &mut [f64], levels: usize, _buffer: &mut [f64], rearranged: &mut [f64]) {
    let lengths: LevelLengths = (0 .. levels)
        .map(|level| approx_detail_len(signal.len(), level).0)
        .collect();

    for &length in lengths.iter().rev() {
        let current = &mut signal[.. length];
        interleaved_from_subbands(&mut rearranged[.. length], current);

        if length % 2 == 0 { synthesis_symmetric_even(&mut rearranged[.. length]); }
        else               { synthesis_symmetric_odd(&mut rearranged[.. length]); }

        current.copy_from_slice(&rearranged[.. length]);
    }
}

/// One forward level of the top left `len_x` by `len_y` region of an xy plane.
fn forward_2d_one_level(
    plane: &mut [f64], width: usize,
    len_x: usize, len_y: usize,
    buffer: &mut [f64], rearranged: &mut [f64],
){
    for y in 0 .. len_y {
        let row = &mut plane[y * width .. y * width + len_x];
        buffer[.. len_x].copy_from_slice(row);

        if len_x % 2 == 0 { analysis_symmetric_even(&mut buffer[.. len_x]); }
        else              { analysis_symmetric_odd(&mut buffer[.. len_x]); }

        subbands_from_interleaved(row, &buffer[.. len_x]);
    }

    for x in 0 .. len_x {
        for y in 0 .. len_y { buffer[y] = plane[y * width + x]; }

        if len_y % 2 == 0 { analysis_symmetric_even(&mut buffer[.. len_y]); }
        else              { analysis_symmetric_odd(&mut buffer[.. len_y]); }

        subbands_from_interleaved(&mut rearranged[.. len_y], &buffer[.. len_y]);
        for y in 0 .. len_y { plane[y * width + x] = rearranged[y]; }
    }
}

/// One inverse level of the top left `len_x` by `len_y` region of an xy plane.
fn inverse_2d_one_level(
    plane: &mut [f64], width: usize,
    len_x: usize, len_y: usize,
    buffer: &mut [f64], rearranged: &mut [f64],
){
    for x in 0 .. len_x {
        for y in 0 .. len_y { buffer[y] = plane[y * width + x]; }

        interleaved_from_subbands(&mut rearranged[.. len_y], &buffer[.. len_y]);

        if len_y % 2 == 0 { synthesis_symmetric_even(&mut rearranged[.. len_y]); }
        else              { synthesis_symmetric_odd(&mut rearranged[.. len_y]); }

        for y in 0 .. len_y { plane[y * width + x] = rearranged[y]; }
    }

    for y in 0 .. len_y {
        let row = &mut plane[y * width .. y * width + len_x];
        interleaved_from_subbands(&mut buffer[.. len_x], row);

        if len_x % 2 == 0 { synthesis_symmetric_even(&mut buffer[.. len_x]); }
        else              { synthesis_symmetric_odd(&mut buffer[.. len_x]); }

        row.copy_from_slice(&buffer[.. len_x]);
    }
}


/// Rearrange an interleaved lifting result into approximation samples
/// followed by detail samples. For example, `[a, d, a, d, a]`
/// becomes `[a, a, a, d, d]`.
fn subbands_from_interleaved(destination: &mut [f64], interleaved: &[f64]) {
    debug_assert_eq!(destination.len(), interleaved.len());
    let approx_count = (interleaved.len() + 1) / 2;

    for index in 0 .. approx_count {
        destination[index] = interleaved[index * 2];
    }

    for index in 0 .. interleaved.len() - approx_count {
        destination[approx_count + index] = interleaved[index * 2 + 1];
    }
}

/// Rearrange approximation samples followed by detail samples
/// back into their interleaved positions.
fn interleaved_from_subbands(destination: &mut [f64], subbands: &[f64]) {
    debug_assert_eq!(destination.len(), subbands.len());
    let approx_count = (subbands.len() + 1) / 2;

    for index in 0 .. approx_count {
        destination[index * 2] = subbands[index];
    }

    for index in 0 .. subbands.len() - approx_count {
        destination[index * 2 + 1] = subbands[approx_count + index];
    }
}


// The four lifting routines below follow the QccPack formulation
// of the 9/7 analysis and synthesis with symmetric boundary handling.
// Even indices hold approximation samples, odd indices detail samples.

fn analysis_symmetric_even(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len % 2 == 0 && len >= 4);

    let mut index = 1;
    while index < len - 2 {
        signal[index] += ALPHA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }
    signal[len - 1] += 2.0 * ALPHA * signal[len - 2];

    signal[0] += 2.0 * BETA * signal[1];
    index = 2;
    while index < len {
        signal[index] += BETA * (signal[index + 1] + signal[index - 1]);
        index += 2;
    }

    index = 1;
    while index < len - 2 {
        signal[index] += GAMMA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }
    signal[len - 1] += 2.0 * GAMMA * signal[len - 2];

    signal[0] = EPSILON * (signal[0] + 2.0 * DELTA * signal[1]);
    index = 2;
    while index < len {
        signal[index] = EPSILON * (signal[index] + DELTA * (signal[index + 1] + signal[index - 1]));
        index += 2;
    }

    index = 1;
    while index < len {
        signal[index] /= -EPSILON;
        index += 2;
    }
}

fn synthesis_symmetric_even(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len % 2 == 0 && len >= 4);

    let mut index = 1;
    while index < len {
        signal[index] *= -EPSILON;
        index += 2;
    }

    signal[0] = signal[0] / EPSILON - 2.0 * DELTA * signal[1];
    index = 2;
    while index < len {
        signal[index] = signal[index] / EPSILON - DELTA * (signal[index + 1] + signal[index - 1]);
        index += 2;
    }

    index = 1;
    while index < len - 2 {
        signal[index] -= GAMMA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }
    signal[len - 1] -= 2.0 * GAMMA * signal[len - 2];

    signal[0] -= 2.0 * BETA * signal[1];
    index = 2;
    while index < len {
        signal[index] -= BETA * (signal[index + 1] + signal[index - 1]);
        index += 2;
    }

    index = 1;
    while index < len - 2 {
        signal[index] -= ALPHA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }
    signal[len - 1] -= 2.0 * ALPHA * signal[len - 2];
}

fn analysis_symmetric_odd(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len % 2 == 1 && len >= 5);

    let mut index = 1;
    while index < len - 1 {
        signal[index] += ALPHA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }

    signal[0] += 2.0 * BETA * signal[1];
    index = 2;
    while index < len - 2 {
        signal[index] += BETA * (signal[index + 1] + signal[index - 1]);
        index += 2;
    }
    signal[len - 1] += 2.0 * BETA * signal[len - 2];

    index = 1;
    while index < len - 1 {
        signal[index] += GAMMA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }

    signal[0] = EPSILON * (signal[0] + 2.0 * DELTA * signal[1]);
    index = 2;
    while index < len - 2 {
        signal[index] = EPSILON * (signal[index] + DELTA * (signal[index + 1] + signal[index - 1]));
        index += 2;
    }
    signal[len - 1] = EPSILON * (signal[len - 1] + 2.0 * DELTA * signal[len - 2]);

    index = 1;
    while index < len {
        signal[index] /= -EPSILON;
        index += 2;
    }
}

fn synthesis_symmetric_odd(signal: &mut [f64]) {
    let len = signal.len();
    debug_assert!(len % 2 == 1 && len >= 5);

    let mut index = 1;
    while index < len {
        signal[index] *= -EPSILON;
        index += 2;
    }

    signal[0] = signal[0] / EPSILON - 2.0 * DELTA * signal[1];
    index = 2;
    while index < len - 2 {
        signal[index] = signal[index] / EPSILON - DELTA * (signal[index + 1] + signal[index - 1]);
        index += 2;
    }
    signal[len - 1] = signal[len - 1] / EPSILON - 2.0 * DELTA * signal[len - 2];

    index = 1;
    while index < len - 1 {
        signal[index] -= GAMMA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }

    signal[0] -= 2.0 * BETA * signal[1];
    index = 2;
    while index < len - 2 {
        signal[index] -= BETA * (signal[index + 1] + signal[index - 1]);
        index += 2;
    }
    signal[len - 1] -= 2.0 * BETA * signal[len - 2];

    index = 1;
    while index < len - 1 {
        signal[index] -= ALPHA * (signal[index - 1] + signal[index + 1]);
        index += 2;
    }
}
