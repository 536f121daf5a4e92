extern crate vspeck;

use vspeck::prelude::*;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};


/// A superposition of a few random plane waves plus mild noise,
/// resembling the magnitude fields of simulation dumps.
fn magnitude_field(dimensions: Vec3<usize>, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);

    let waves: Vec<(f32, f32, f32, f32, f32)> = (0 .. 6)
        .map(|_| (
            rng.gen_range(0.05 .. 0.4),
            rng.gen_range(0.05 .. 0.4),
            rng.gen_range(0.05 .. 0.4),
            rng.gen_range(0.0 .. std::f32::consts::TAU),
            rng.gen_range(2.0 .. 10.0),
        ))
        .collect();

    let Vec3(dim_x, dim_y, dim_z) = dimensions;
    let mut samples = Vec::with_capacity(dimensions.volume());

    for z in 0 .. dim_z {
        for y in 0 .. dim_y {
            for x in 0 .. dim_x {
                let mut value = 0.0;
                for &(freq_x, freq_y, freq_z, phase, amplitude) in &waves {
                    value += amplitude
                        * (freq_x * x as f32 + freq_y * y as f32 + freq_z * z as f32 + phase).sin();
                }

                samples.push(value + rng.gen_range(-0.1 .. 0.1));
            }
        }
    }

    samples
}

fn compress_at_rate(dimensions: Vec3<usize>, samples: &[f32], bits_per_pixel: f64) -> Vec<u8> {
    let mut compressor = Compressor::new(dimensions).unwrap();
    compressor.copy_data_f32(samples).unwrap();
    compressor.set_bpp(bits_per_pixel).unwrap();
    compressor.compress().unwrap()
}

fn quality(samples: &[f32], stream: &[u8]) -> Stats {
    let mut decompressor = Decompressor::new();
    decompressor.use_bitstream(stream).unwrap();
    let decoded = decompressor.decompress_f32().unwrap();
    calc_stats(samples, &decoded).unwrap()
}


#[test]
fn fidelity_improves_with_rate() {
    for &dimensions in &[ Vec3(17, 17, 17), Vec3(32, 32, 24) ] {
        let samples = magnitude_field(dimensions, 1);

        let mut previous_rmse = f64::INFINITY;
        for &bits_per_pixel in &[ 0.25, 0.5, 1.0, 2.0, 4.0 ] {
            let stream = compress_at_rate(dimensions, &samples, bits_per_pixel);
            let stats = quality(&samples, &stream);

            assert!(stats.rmse <= previous_rmse,
                "rmse grew from {} to {} at {} bpp for {:?}",
                previous_rmse, stats.rmse, bits_per_pixel, dimensions);

            previous_rmse = stats.rmse;
        }
    }
}

#[test]
fn reconstruction_quality_at_calibrated_rates() {
    let dimensions = Vec3(32, 32, 32);
    let samples = magnitude_field(dimensions, 2);

    let quarter = quality(&samples, &compress_at_rate(dimensions, &samples, 0.25));
    let one = quality(&samples, &compress_at_rate(dimensions, &samples, 1.0));
    let four = quality(&samples, &compress_at_rate(dimensions, &samples, 4.0));

    assert!(quarter.psnr > 20.0, "0.25 bpp psnr was {}", quarter.psnr);
    assert!(one.psnr > 30.0, "1 bpp psnr was {}", one.psnr);
    assert!(four.psnr > 40.0, "4 bpp psnr was {}", four.psnr);

    assert!(four.psnr >= one.psnr);
    assert!(one.psnr >= quarter.psnr);
}

#[test]
fn stream_is_embedded() {
    let dimensions = Vec3(24, 24, 24);
    let samples = magnitude_field(dimensions, 3);

    let low = compress_at_rate(dimensions, &samples, 1.0);
    let high = compress_at_rate(dimensions, &samples, 3.0);

    // identical headers apart from the bit count, and the low rate
    // payload is a strict prefix of the high rate payload
    let header_size = vspeck::compress::Header::BYTE_SIZE;
    let low_payload = &low[header_size ..];
    let high_payload = &high[header_size ..];

    assert!(low_payload.len() < high_payload.len());
    assert_eq!(low_payload, &high_payload[.. low_payload.len()]);
}

#[test]
fn rate_limited_decode_equals_low_rate_stream() {
    let dimensions = Vec3(24, 20, 16);
    let samples = magnitude_field(dimensions, 4);

    let low = compress_at_rate(dimensions, &samples, 1.0);
    let high = compress_at_rate(dimensions, &samples, 4.0);

    let mut low_decompressor = Decompressor::new();
    low_decompressor.use_bitstream(&low).unwrap();
    let from_low_stream = low_decompressor.decompress().unwrap();

    let mut limited_decompressor = Decompressor::new();
    limited_decompressor.use_bitstream(&high).unwrap();
    limited_decompressor.set_bpp(1.0).unwrap();
    let from_limited_decode = limited_decompressor.decompress().unwrap();

    assert_eq!(from_low_stream, from_limited_decode);
}

#[test]
fn output_does_not_depend_on_thread_count() {
    let dimensions = Vec3(20, 20, 20);
    let samples = magnitude_field(dimensions, 5);

    let parallel = compress_at_rate(dimensions, &samples, 2.0);

    let single_threaded_pool = rayon::ThreadPoolBuilder::new()
        .num_threads(1).build().unwrap();
    let serial = single_threaded_pool.install(|| compress_at_rate(dimensions, &samples, 2.0));

    assert_eq!(parallel, serial);

    let repeated = compress_at_rate(dimensions, &samples, 2.0);
    assert_eq!(parallel, repeated);
}

#[test]
fn quantization_tolerance_is_honored() {
    let dimensions = Vec3(32, 32, 16);
    let samples = magnitude_field(dimensions, 6);
    let tolerance = 1.0;

    let mut compressor = Compressor::new(dimensions).unwrap();
    compressor.copy_data_f32(&samples).unwrap();
    compressor.set_qz_level(-5);
    compressor.set_tolerance(tolerance).unwrap();
    let stream = compressor.compress().unwrap();

    let stats = quality(&samples, &stream);
    assert!(stats.linfty < tolerance,
        "largest error {} exceeds the tolerance", stats.linfty);
}

#[test]
fn quantization_streams_decode_without_a_rate_limit() {
    let dimensions = Vec3(17, 17, 17);
    let samples = magnitude_field(dimensions, 7);

    let mut compressor = Compressor::new(dimensions).unwrap();
    compressor.copy_data_f32(&samples).unwrap();
    compressor.set_qz_level(-8);
    let stream = compressor.compress().unwrap();

    let mut decompressor = Decompressor::new();
    decompressor.use_bitstream(&stream).unwrap();
    assert!(decompressor.header().unwrap().quantization_mode);

    let stats = quality(&samples, &stream);
    assert!(stats.psnr > 50.0, "quantization mode psnr was {}", stats.psnr);
}

#[test]
fn flat_slices_flow_through_the_same_pipeline() {
    let dimensions = Vec3(48, 40, 1);
    let samples = magnitude_field(dimensions, 8);

    let stream = compress_at_rate(dimensions, &samples, 8.0);
    let stats = quality(&samples, &stream);

    assert!(stats.psnr > 40.0, "flat slice psnr was {}", stats.psnr);
}

#[test]
fn odd_dimensions_roundtrip() {
    let dimensions = Vec3(17, 13, 11);
    let samples = magnitude_field(dimensions, 9);

    let stream = compress_at_rate(dimensions, &samples, 2.0);

    let mut decompressor = Decompressor::new();
    decompressor.use_bitstream(&stream).unwrap();
    let decoded = decompressor.decompress_f32().unwrap();

    assert_eq!(decoded.len(), dimensions.volume());

    let stats = calc_stats(&samples, &decoded).unwrap();
    assert!(stats.psnr > 25.0, "odd dimensions psnr was {}", stats.psnr);
}
