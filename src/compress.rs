
//! The full compression pipeline and its stream framing.
//!
//! A compressed stream is a small little-endian header followed by the
//! packed bit sequence of the block coder. The header carries everything
//! a decoder needs: the volume dimensions, the subtracted sample mean,
//! and the index of the top bitplane.

use crate::bits::BitBuffer;
use crate::error::{Error, Result, UnitResult};
use crate::io::Data;
use crate::math::Vec3;
use crate::speck::{Mode, Speck3d};
use crate::transform::Cdf97;

use std::convert::TryFrom;


const STREAM_VERSION: u8 = 1;
const FLAG_QUANTIZATION: u8 = 1;


/// Describes the payload of an encoded stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {

    /// Dimensions of the encoded volume, x varying fastest.
    pub dimensions: Vec3<usize>,

    /// The sample mean that was subtracted before the transform.
    pub image_mean: f64,

    /// Index of the top bitplane of the wavelet coefficients.
    pub max_coeff_bits: i32,

    /// Number of coder bits that follow the header.
    pub bit_count: u64,

    /// Whether the stream was produced in quantization mode.
    pub quantization_mode: bool,
}

impl Header {

    /// Number of bytes this header occupies in a stream.
    pub const BYTE_SIZE: usize = 2 + 3 * 4 + 8 + 4 + 8;

    /// Write this header in its fixed little-endian layout.
    pub fn write(&self, write: &mut impl std::io::Write) -> UnitResult {
        STREAM_VERSION.write(write)?;

        let flags = if self.quantization_mode { FLAG_QUANTIZATION } else { 0 };
        flags.write(write)?;

        dimension_u32(self.dimensions.x())?.write(write)?;
        dimension_u32(self.dimensions.y())?.write(write)?;
        dimension_u32(self.dimensions.z())?.write(write)?;

        self.image_mean.write(write)?;
        self.max_coeff_bits.write(write)?;
        self.bit_count.write(write)?;
        Ok(())
    }

    /// Read and validate a header.
    pub fn read(read: &mut impl std::io::Read) -> Result<Self> {
        let version = u8::read(read)?;
        if version != STREAM_VERSION {
            return Err(Error::invalid("unknown stream version"));
        }

        let flags = u8::read(read)?;

        let dim_x = u32::read(read)? as usize;
        let dim_y = u32::read(read)? as usize;
        let dim_z = u32::read(read)? as usize;

        let dimensions = Vec3(dim_x, dim_y, dim_z);
        if dimensions.volume() == 0 {
            return Err(Error::invalid("volume dimensions"));
        }

        Ok(Header {
            dimensions,
            image_mean: f64::read(read)?,
            max_coeff_bits: i32::read(read)?,
            bit_count: u64::read(read)?,
            quantization_mode: flags & FLAG_QUANTIZATION != 0,
        })
    }
}

fn dimension_u32(dimension: usize) -> Result<u32> {
    u32::try_from(dimension).map_err(|_| Error::invalid("volume dimensions"))
}


/// Compresses a volume of samples into a self-describing byte stream.
///
/// Feed it samples, choose either a target rate or a quantization level,
/// then call [`Compressor::compress`].
#[derive(Debug, Clone)]
pub struct Compressor {
    dimensions: Vec3<usize>,
    samples: Vec<f64>,
    mode: Option<Mode>,
    tolerance: Option<f64>,
}

impl Compressor {

    /// A compressor for volumes with the specified dimensions.
    /// Two-dimensional slices use a z extent of one.
    pub fn new(dimensions: Vec3<usize>) -> Result<Self> {
        if dimensions.volume() == 0 {
            return Err(Error::invalid("volume dimensions"));
        }

        Ok(Compressor { dimensions, samples: Vec::new(), mode: None, tolerance: None })
    }

    /// Copy single precision samples, as found in most simulation dumps.
    pub fn copy_data_f32(&mut self, samples: &[f32]) -> UnitResult {
        if samples.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        self.samples = samples.iter().map(|&sample| f64::from(sample)).collect();
        Ok(())
    }

    /// Copy double precision samples.
    pub fn copy_data(&mut self, samples: &[f64]) -> UnitResult {
        if samples.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        self.samples.clear();
        self.samples.extend_from_slice(samples);
        Ok(())
    }

    /// Move double precision samples into the compressor without copying.
    pub fn take_data(&mut self, samples: Vec<f64>) -> UnitResult {
        if samples.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        self.samples = samples;
        Ok(())
    }

    /// Target a fixed output size of this many bits per sample, in `(0, 64]`.
    pub fn set_bpp(&mut self, bits_per_pixel: f64) -> UnitResult {
        if !bits_per_pixel.is_finite() || bits_per_pixel <= 0.0 || bits_per_pixel > 64.0 {
            return Err(Error::invalid("bits per pixel must be in (0, 64]"));
        }

        self.mode = Some(Mode::BitsPerPixel(bits_per_pixel));
        Ok(())
    }

    /// Target a fixed quality by terminating at this quantization level.
    /// The output size then varies with the content.
    pub fn set_qz_level(&mut self, level: i32) {
        self.mode = Some(Mode::QuantizationLevel(level));
    }

    /// In quantization mode, keep lowering the termination level until the
    /// maximum pointwise coefficient error is at most this tolerance.
    pub fn set_tolerance(&mut self, tolerance: f64) -> UnitResult {
        if !tolerance.is_finite() || tolerance <= 0.0 {
            return Err(Error::invalid("tolerance must be positive"));
        }

        self.tolerance = Some(tolerance);
        Ok(())
    }

    /// Transform and encode the provided samples.
    /// Consumes the samples; provide them again before compressing again.
    pub fn compress(&mut self) -> Result<Vec<u8>> {
        let mode = self.mode
            .ok_or_else(|| Error::invalid("neither a target rate nor a quantization level was chosen"))?;

        if self.samples.len() != self.dimensions.volume() {
            return Err(Error::invalid("sample buffer length"));
        }

        let mut transform = Cdf97::new(self.dimensions)?;
        transform.take_data(std::mem::take(&mut self.samples))?;
        transform.dwt3d()?;

        let image_mean = transform.image_mean();
        let coefficients = transform.release_data();

        let (mut encoder, quantization_mode) = match mode {
            Mode::BitsPerPixel(_) => {
                let mut encoder = Speck3d::new(self.dimensions);
                encoder.set_mode(mode)?;
                encoder.take_coeffs(coefficients)?;
                encoder.encode()?;
                (encoder, false)
            }

            Mode::QuantizationLevel(level) => {
                // the coefficients stay around so that the encoding can be
                // repeated at lower levels until the tolerance is met
                let mut level = level;
                loop {
                    let mut encoder = Speck3d::new(self.dimensions);
                    encoder.set_mode(Mode::QuantizationLevel(level))?;
                    encoder.copy_coeffs(&coefficients)?;
                    encoder.encode()?;

                    let error = encoder.max_quantization_error().unwrap_or(0.0);
                    match self.tolerance {
                        Some(tolerance) if error > tolerance => {
                            level -= 1;
                            if level <= encoder.max_coeff_bits() - 64 {
                                return Err(Error::invalid("tolerance cannot be met"));
                            }
                        }

                        _ => break (encoder, true),
                    }
                }
            }
        };

        let mut bits = encoder.take_bitstream();
        bits.pad_to_byte_boundary();

        let header = Header {
            dimensions: self.dimensions,
            image_mean,
            max_coeff_bits: encoder.max_coeff_bits(),
            bit_count: bits.len() as u64,
            quantization_mode,
        };

        let mut bytes = Vec::with_capacity(Header::BYTE_SIZE + bits.len() / 8);
        header.write(&mut bytes)?;
        bytes.extend_from_slice(&bits.pack_bytes()?);
        Ok(bytes)
    }
}


/// Decompresses a byte stream produced by a [`Compressor`].
///
/// The same stream can be decompressed repeatedly, for example with
/// different rate limits, because the coder output is embedded: decoding
/// a prefix yields a valid, lower-fidelity volume.
#[derive(Debug, Clone, Default)]
pub struct Decompressor {
    header: Option<Header>,
    bits: BitBuffer,
    bits_per_pixel_limit: Option<f64>,
}

impl Decompressor {

    /// A decompressor without a stream yet.
    pub fn new() -> Self { Self::default() }

    /// Parse the header and unpack the coder bits of an encoded stream.
    pub fn use_bitstream(&mut self, bytes: &[u8]) -> UnitResult {
        let mut read = bytes;
        let header = Header::read(&mut read)?;

        if (read.len() * 8) < header.bit_count as usize {
            return Err(Error::invalid("content size"));
        }

        self.bits = BitBuffer::unpack_bytes(read);
        self.header = Some(header);
        Ok(())
    }

    /// Decode only a prefix of the stream, as if it had been compressed
    /// with this target rate. Must be in `(0, 64]`.
    pub fn set_bpp(&mut self, bits_per_pixel: f64) -> UnitResult {
        if !bits_per_pixel.is_finite() || bits_per_pixel <= 0.0 || bits_per_pixel > 64.0 {
            return Err(Error::invalid("bits per pixel must be in (0, 64]"));
        }

        self.bits_per_pixel_limit = Some(bits_per_pixel);
        Ok(())
    }

    /// The parsed header of the provided stream, if any.
    pub fn header(&self) -> Option<Header> { self.header }

    /// Decode and inverse transform the stream into samples.
    pub fn decompress(&mut self) -> Result<Vec<f64>> {
        let header = self.header
            .ok_or_else(|| Error::invalid("no bitstream was provided"))?;

        let mut decoder = Speck3d::new(header.dimensions);
        decoder.set_max_coeff_bits(header.max_coeff_bits);

        if let Some(limit) = self.bits_per_pixel_limit {
            decoder.set_mode(Mode::BitsPerPixel(limit))?;
        }

        decoder.use_bitstream(self.bits.clone());
        decoder.decode()?;

        let mut transform = Cdf97::new(header.dimensions)?;
        transform.take_data(decoder.release_coeffs())?;
        transform.set_image_mean(header.image_mean);
        transform.idwt3d()?;

        Ok(transform.release_data())
    }

    /// Decode into single precision samples.
    pub fn decompress_f32(&mut self) -> Result<Vec<f32>> {
        Ok(self.decompress()?.into_iter().map(|sample| sample as f32).collect())
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn smooth_volume(dimensions: Vec3<usize>) -> Vec<f32> {
        let Vec3(dim_x, dim_y, dim_z) = dimensions;
        let mut samples = Vec::with_capacity(dimensions.volume());

        for z in 0 .. dim_z {
            for y in 0 .. dim_y {
                for x in 0 .. dim_x {
                    let value = (x as f32 * 0.3).sin() * 20.0
                        + (y as f32 * 0.2).cos() * 15.0
                        + (z as f32 * 0.4).sin() * 10.0;
                    samples.push(value);
                }
            }
        }

        samples
    }

    #[test]
    fn roundtrip_header(){
        let header = Header {
            dimensions: Vec3(128, 128, 41),
            image_mean: -0.25,
            max_coeff_bits: 11,
            bit_count: 65536,
            quantization_mode: true,
        };

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Header::BYTE_SIZE);

        let decoded = Header::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn unknown_version_is_rejected(){
        let header = Header {
            dimensions: Vec3(4, 4, 4),
            image_mean: 0.0,
            max_coeff_bits: 0,
            bit_count: 8,
            quantization_mode: false,
        };

        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        bytes[0] = 200;

        assert!(Header::read(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn roundtrip_pipeline_at_high_rate(){
        let dimensions = Vec3(32, 24, 17);
        let samples = smooth_volume(dimensions);

        let mut compressor = Compressor::new(dimensions).unwrap();
        compressor.copy_data_f32(&samples).unwrap();
        compressor.set_bpp(16.0).unwrap();
        let stream = compressor.compress().unwrap();

        let mut decompressor = Decompressor::new();
        decompressor.use_bitstream(&stream).unwrap();
        let decoded = decompressor.decompress_f32().unwrap();

        assert_eq!(decoded.len(), samples.len());
        for (&restored, &expected) in decoded.iter().zip(&samples) {
            assert!((restored - expected).abs() < 1e-2,
                "expected {}, restored {}", expected, restored);
        }
    }

    #[test]
    fn fixed_rate_stream_has_the_requested_size(){
        let dimensions = Vec3(32, 32, 32);
        let samples = smooth_volume(dimensions);

        let mut compressor = Compressor::new(dimensions).unwrap();
        compressor.copy_data_f32(&samples).unwrap();
        compressor.set_bpp(2.0).unwrap();
        let stream = compressor.compress().unwrap();

        let payload_bytes = stream.len() - Header::BYTE_SIZE;
        assert_eq!(payload_bytes, dimensions.volume() * 2 / 8);
    }

    #[test]
    fn compressing_without_a_mode_is_an_error(){
        let dimensions = Vec3(8, 8, 8);
        let samples = smooth_volume(dimensions);

        let mut compressor = Compressor::new(dimensions).unwrap();
        compressor.copy_data_f32(&samples).unwrap();
        assert!(compressor.compress().is_err());
    }

    #[test]
    fn decompressing_without_a_stream_is_an_error(){
        assert!(Decompressor::new().decompress().is_err());
    }

    #[test]
    fn truncated_stream_is_rejected(){
        let dimensions = Vec3(8, 8, 8);
        let samples = smooth_volume(dimensions);

        let mut compressor = Compressor::new(dimensions).unwrap();
        compressor.copy_data_f32(&samples).unwrap();
        compressor.set_bpp(4.0).unwrap();
        let stream = compressor.compress().unwrap();

        let mut decompressor = Decompressor::new();
        assert!(decompressor.use_bitstream(&stream[.. stream.len() / 2]).is_err());
    }
}
