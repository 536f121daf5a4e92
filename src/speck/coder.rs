
//! The set partitioning state machine and its bitplane driver.

use crate::bits::BitBuffer;
use crate::error::{Error, Result, UnitResult};
use crate::math::{Vec3, num_of_partitions, num_of_xforms};
use crate::speck::Mode;
use crate::speck::set::{
    Significance, SetType, SpeckSet3d,
    partition_xyz, partition_xy, partition_z,
};

use rayon::prelude::*;


/// Hard cap on the number of bitplane iterations. Double precision
/// coefficients cannot carry more than about 53 meaningful bitplanes,
/// so this bound is generous.
const MAX_ITERATIONS: usize = 128;

/// Marks a slot in the list of insignificant pixels whose pixel has
/// migrated to the significant list. Dropped by the compaction
/// between two bitplanes.
const GARBAGE: usize = usize::MAX;

/// Unwinds the pass recursion when the bit budget is reached.
/// Never surfaces to callers; the driver converts it into success.
struct BudgetMet;

type CodeResult<T = ()> = std::result::Result<T, BudgetMet>;

const TAG_INSIG: u8 = 0;
const TAG_SIG_POS: u8 = 1;
const TAG_SIG_NEG: u8 = 2;


/// Codes a volume of wavelet coefficients into an embedded bitstream,
/// and reconstructs coefficients from such a bitstream.
///
/// The coefficients are expected in raster order,
/// with x varying fastest and z slowest.
/// A z extent of one yields the two-dimensional specialisation.
#[derive(Debug, Clone)]
pub struct Speck3d {
    dimensions: Vec3<usize>,
    coefficients: Vec<f64>,
    signs: Vec<bool>,

    bit_buffer: BitBuffer,
    budget: usize,
    mode: Option<Mode>,

    max_coeff_bits: i32,
    threshold: f64,

    lis: Vec<Vec<SpeckSet3d>>,
    lip: Vec<usize>,
    lsp_old: Vec<usize>,
    lsp_new: Vec<usize>,

    sig_map: Vec<bool>,
    sig_map_enabled: bool,
    sig_map_occupancy: f64,

    lip_tags: Vec<u8>,
    refinement_bits: Vec<bool>,

    max_qz_error: Option<f64>,
}

impl Speck3d {

    /// A coder for volumes with the specified dimensions.
    pub fn new(dimensions: Vec3<usize>) -> Self {
        Speck3d {
            dimensions,
            coefficients: Vec::new(),
            signs: Vec::new(),
            bit_buffer: BitBuffer::new(),
            budget: 0,
            mode: None,
            max_coeff_bits: 0,
            threshold: 0.0,
            lis: Vec::new(),
            lip: Vec::new(),
            lsp_old: Vec::new(),
            lsp_new: Vec::new(),
            sig_map: Vec::new(),
            sig_map_enabled: false,
            sig_map_occupancy: 0.8,
            lip_tags: Vec::new(),
            refinement_bits: Vec::new(),
            max_qz_error: None,
        }
    }

    /// The volume dimensions this coder was created for.
    pub fn dimensions(&self) -> Vec3<usize> { self.dimensions }

    /// Copy the caller's coefficients into this coder.
    /// Encoding consumes them, so call this again before re-encoding.
    pub fn copy_coeffs(&mut self, values: &[f64]) -> UnitResult {
        if values.len() != self.dimensions.volume() {
            return Err(Error::invalid("coefficient buffer length"));
        }

        self.coefficients.clear();
        self.coefficients.extend_from_slice(values);
        Ok(())
    }

    /// Move the caller's coefficients into this coder without copying.
    pub fn take_coeffs(&mut self, values: Vec<f64>) -> UnitResult {
        if values.len() != self.dimensions.volume() {
            return Err(Error::invalid("coefficient buffer length"));
        }

        self.coefficients = values;
        Ok(())
    }

    /// The coefficients currently owned by this coder.
    /// After decoding, these are the reconstructed values.
    pub fn coeffs(&self) -> &[f64] { &self.coefficients }

    /// Move the coefficients out of this coder.
    pub fn release_coeffs(&mut self) -> Vec<f64> {
        std::mem::take(&mut self.coefficients)
    }

    /// Choose the termination mode. Encoding requires one;
    /// decoding without one consumes all available bits.
    pub fn set_mode(&mut self, mode: Mode) -> UnitResult {
        if let Mode::BitsPerPixel(bits_per_pixel) = mode {
            if !bits_per_pixel.is_finite() || bits_per_pixel <= 0.0 || bits_per_pixel > 64.0 {
                return Err(Error::invalid("bits per pixel must be in (0, 64]"));
            }
        }

        self.mode = Some(mode);
        Ok(())
    }

    /// Tune at which occupancy of the significant-pixel list the encoder
    /// precomputes a significance bitmap. This is a performance toggle
    /// only and never changes the emitted bits. Must be in `[0, 1]`.
    pub fn set_sig_map_occupancy(&mut self, occupancy: f64) -> UnitResult {
        if !(0.0 ..= 1.0).contains(&occupancy) {
            return Err(Error::invalid("bitmap occupancy must be in [0, 1]"));
        }

        self.sig_map_occupancy = occupancy;
        Ok(())
    }

    /// The index of the top bitplane, determined by the encoder from the
    /// largest coefficient magnitude. A decoder needs this value from the
    /// stream header before decoding.
    pub fn max_coeff_bits(&self) -> i32 { self.max_coeff_bits }

    /// Provide the top bitplane index for decoding.
    pub fn set_max_coeff_bits(&mut self, max_coeff_bits: i32) {
        self.max_coeff_bits = max_coeff_bits;
    }

    /// The bit sequence produced by the last encode.
    pub fn bit_buffer(&self) -> &BitBuffer { &self.bit_buffer }

    /// Move the bit sequence out of this coder.
    pub fn take_bitstream(&mut self) -> BitBuffer {
        std::mem::take(&mut self.bit_buffer)
    }

    /// Provide the bit sequence to decode from.
    pub fn use_bitstream(&mut self, bits: BitBuffer) {
        self.bit_buffer = bits;
    }

    /// In quantization mode, the exact maximum pointwise error of the
    /// magnitudes a decoder reconstructs from the complete stream.
    /// `None` before encoding or in bit rate mode.
    pub fn max_quantization_error(&self) -> Option<f64> { self.max_qz_error }


    /// Transform the owned coefficients into the embedded bit sequence.
    pub fn encode(&mut self) -> UnitResult {
        let count = self.dimensions.volume();
        if count == 0 {
            return Err(Error::invalid("volume dimensions"));
        }

        if self.coefficients.len() != count {
            return Err(Error::invalid("coefficient buffer length"));
        }

        let mode = self.mode
            .ok_or_else(|| Error::invalid("no termination mode chosen"))?;

        self.budget = match mode {
            Mode::BitsPerPixel(bits_per_pixel) => bit_budget(bits_per_pixel, count)?,
            Mode::QuantizationLevel(_) => usize::MAX,
        };

        self.bit_buffer = BitBuffer::with_capacity(match mode {
            Mode::BitsPerPixel(_) => self.budget,
            Mode::QuantizationLevel(_) => count,
        });

        self.initialize_lists();
        self.max_qz_error = None;

        let max_coeff = self.make_coeff_positive();
        self.max_coeff_bits = if max_coeff > 0.0 { max_coeff.log2().floor() as i32 } else { 0 };
        self.threshold = f64::from(self.max_coeff_bits).exp2();

        let mut current_level = self.max_coeff_bits;
        if let Mode::QuantizationLevel(level) = mode {
            if level > self.max_coeff_bits {
                return Err(Error::invalid("quantization level above the top bitplane"));
            }
        }

        for _iteration in 0 .. MAX_ITERATIONS {
            debug_assert!(self.lists_account_for_every_pixel());
            self.update_significance_map();

            if self.sorting_pass_encode().is_err() { break; }
            if self.refinement_pass_encode().is_err() { break; }

            if let Mode::QuantizationLevel(level) = mode {
                if current_level <= level { break; }
                current_level -= 1;
            }

            self.threshold *= 0.5;
            self.compact_lists();
        }

        if let Mode::QuantizationLevel(_) = mode {
            // a decoder interprets the padding as insignificance decisions,
            // which change nothing about the decoded values
            self.bit_buffer.pad_to_byte_boundary();
            self.max_qz_error = Some(self.compute_max_quantization_error());
        }

        Ok(())
    }

    /// Reconstruct coefficients from the owned bit sequence.
    /// Requires the top bitplane index from the stream header.
    pub fn decode(&mut self) -> UnitResult {
        let count = self.dimensions.volume();
        if count == 0 {
            return Err(Error::invalid("volume dimensions"));
        }

        if self.bit_buffer.is_empty() {
            return Err(Error::invalid("empty bitstream"));
        }

        // by default, decode all the available bits
        self.budget = self.bit_buffer.len();
        if let Some(Mode::BitsPerPixel(bits_per_pixel)) = self.mode {
            self.budget = self.budget.min(bit_budget(bits_per_pixel, count)?);
        }

        self.coefficients.clear();
        self.coefficients.resize(count, 0.0);
        self.signs.clear();
        self.signs.resize(count, true);
        self.sig_map_enabled = false;

        self.initialize_lists();
        self.bit_buffer.rewind();
        self.threshold = f64::from(self.max_coeff_bits).exp2();

        for _iteration in 0 .. MAX_ITERATIONS {
            debug_assert!(self.lists_account_for_every_pixel());

            if self.sorting_pass_decode().is_err() { break; }
            if self.refinement_pass_decode().is_err() { break; }

            self.threshold *= 0.5;
            self.compact_lists();
        }

        // pixels that turned significant right before the bits ran out
        // still need their first reconstruction
        let newly_reconstructed = self.threshold * 1.5;
        for &pixel in &self.lsp_new {
            self.coefficients[pixel] = newly_reconstructed;
        }

        for (coefficient, &positive) in self.coefficients.iter_mut().zip(&self.signs) {
            if !positive { *coefficient = -*coefficient; }
        }

        Ok(())
    }


    /// Strip the signs off the coefficients and return the largest magnitude.
    fn make_coeff_positive(&mut self) -> f64 {
        self.signs.clear();
        self.signs.resize(self.coefficients.len(), true);

        let mut max = 0.0_f64;
        for (coefficient, positive) in self.coefficients.iter_mut().zip(self.signs.iter_mut()) {
            if *coefficient < 0.0 {
                *coefficient = -*coefficient;
                *positive = false;
            }

            if *coefficient > max { max = *coefficient; }
        }

        max
    }

    /// Seed the lists with the initial subband decomposition.
    /// The subband geometry mirrors the wavelet transform:
    /// joint xyz partitions while both the xy slices and the z axis
    /// support another level, then xy or z partitions alone.
    fn initialize_lists(&mut self) {
        let Vec3(dim_x, dim_y, dim_z) = self.dimensions;

        let bucket_count = 1
            + num_of_partitions(dim_x)
            + num_of_partitions(dim_y)
            + num_of_partitions(dim_z);

        self.lis.clear();
        self.lis.resize(bucket_count, Vec::new());
        self.lip.clear();

        let mut big = SpeckSet3d::whole_volume(self.dimensions);

        let xforms_xy = num_of_xforms(dim_x.min(dim_y));
        let xforms_z = num_of_xforms(dim_z);
        let mut transform = 0;

        while transform < xforms_xy && transform < xforms_z {
            let children = partition_xyz(&big);
            big = children[0];
            for child in &children[1 ..] {
                self.lis[child.part_level].push(*child);
            }
            transform += 1;
        }

        // at most one of these two tails runs
        while transform < xforms_xy {
            let children = partition_xy(&big);
            big = children[0];
            for child in &children[1 ..] {
                self.lis[child.part_level].push(*child);
            }
            transform += 1;
        }

        while transform < xforms_z {
            let children = partition_z(&big);
            big = children[0];
            self.lis[children[1].part_level].push(children[1]);
            transform += 1;
        }

        // the remaining set is the deepest approximation subband, which is
        // the most likely to turn significant first, so it goes to the
        // front of its bucket
        self.lis[big.part_level].insert(0, big);

        self.lsp_new.clear();
        self.lsp_old.clear();
        self.lsp_old.reserve(self.dimensions.volume());
    }

    /// Drop garbage sets and sentinel pixel slots in one linear sweep.
    /// Removing them mid-iteration would invalidate indices, so this
    /// only runs between two bitplanes.
    fn compact_lists(&mut self) {
        for bucket in &mut self.lis {
            bucket.retain(|set| set.set_type != SetType::Garbage);
        }

        self.lip.retain(|&pixel| pixel != GARBAGE);
    }

    /// Precompute the per-coefficient significance at the current threshold
    /// once the significant-pixel list dominates the volume. Set tests then
    /// read the bitmap instead of comparing magnitudes.
    fn update_significance_map(&mut self) {
        let count = self.coefficients.len();

        if self.lsp_old.len() as f64 > count as f64 * self.sig_map_occupancy {
            let threshold = self.threshold;
            self.sig_map.clear();
            self.sig_map.resize(count, false);

            let coefficients = &self.coefficients;
            self.sig_map.par_iter_mut().zip(coefficients.par_iter())
                .for_each(|(significant, &coefficient)| *significant = coefficient >= threshold);

            self.sig_map_enabled = true;
        }
        else {
            self.sig_map_enabled = false;
        }
    }

    /// Append a bit. Reaching the budget terminates the current pass,
    /// with the bit that reached it still counted.
    #[inline]
    fn emit(&mut self, bit: bool) -> CodeResult {
        self.bit_buffer.push(bit);

        if self.bit_buffer.len() >= self.budget { Err(BudgetMet) }
        else { Ok(()) }
    }

    /// Consume the next bit of the stream, if the budget allows another.
    #[inline]
    fn read_bit(&mut self) -> CodeResult<bool> {
        if self.bit_buffer.cursor() >= self.budget {
            return Err(BudgetMet);
        }

        self.bit_buffer.read().ok_or(BudgetMet)
    }

    #[inline]
    fn pixel_index(&self, set: &SpeckSet3d) -> usize {
        debug_assert!(set.is_pixel());
        Vec3(set.start_x as usize, set.start_y as usize, set.start_z as usize)
            .flat_index_for_size(self.dimensions)
    }

    /// Whether the set contains a coefficient at or above the threshold,
    /// and if so, the offset of the first one in z-major scan order.
    /// The offset lets the encoder deduce the significance of some children
    /// without scanning them again.
    fn decide_significance(&self, set: &SpeckSet3d) -> Option<(u32, u32, u32)> {
        debug_assert!(!set.is_empty());

        let Vec3(dim_x, dim_y, _) = self.dimensions;
        let slice_size = dim_x * dim_y;

        for z in set.start_z .. set.start_z + set.length_z {
            let slice_offset = z as usize * slice_size;
            for y in set.start_y .. set.start_y + set.length_y {
                let row_offset = slice_offset + y as usize * dim_x;
                for x in set.start_x .. set.start_x + set.length_x {
                    let index = row_offset + x as usize;

                    let significant =
                        if self.sig_map_enabled { self.sig_map[index] }
                        else { self.coefficients[index] >= self.threshold };

                    if significant {
                        return Some((x - set.start_x, y - set.start_y, z - set.start_z));
                    }
                }
            }
        }

        None
    }


    fn sorting_pass_encode(&mut self) -> CodeResult {
        // Process the pixel list first: tag every slot in parallel,
        // then append the bits serially in list order.
        let threshold = self.threshold;
        {
            let coefficients = &self.coefficients;
            let signs = &self.signs;
            let sig_map = &self.sig_map;
            let sig_map_enabled = self.sig_map_enabled;

            self.lip.par_iter()
                .map(|&pixel| {
                    let significant =
                        if sig_map_enabled { sig_map[pixel] }
                        else { coefficients[pixel] >= threshold };

                    if !significant { TAG_INSIG }
                    else if signs[pixel] { TAG_SIG_POS }
                    else { TAG_SIG_NEG }
                })
                .collect_into_vec(&mut self.lip_tags);
        }

        for slot in 0 .. self.lip_tags.len() {
            match self.lip_tags[slot] {
                TAG_INSIG => self.emit(false)?,

                tag => {
                    let pixel = self.lip[slot];
                    self.lip[slot] = GARBAGE;
                    self.lsp_new.push(pixel);

                    self.emit(true)?;
                    self.emit(tag == TAG_SIG_POS)?;
                }
            }
        }

        // Then the regular sets, deepest partition level first. Children
        // split off during this loop land in deeper buckets and are coded
        // immediately by the recursion.
        for bucket in (0 .. self.lis.len()).rev() {
            let mut index = 0;
            while index < self.lis[bucket].len() {
                self.process_set_encode(bucket, index, Significance::Dunno)?;
                index += 1;
            }
        }

        Ok(())
    }

    fn sorting_pass_decode(&mut self) -> CodeResult {
        for slot in 0 .. self.lip.len() {
            self.process_pixel_decode(slot)?;
        }

        for bucket in (0 .. self.lis.len()).rev() {
            let mut index = 0;
            while index < self.lis[bucket].len() {
                self.process_set_decode(bucket, index)?;
                index += 1;
            }
        }

        Ok(())
    }

    fn process_pixel_encode(&mut self, slot: usize, significance: Significance) -> CodeResult {
        debug_assert_ne!(significance, Significance::NewlySig);
        let pixel = self.lip[slot];

        let pixel_is_significant = match significance {
            Significance::Dunno =>
                if self.sig_map_enabled { self.sig_map[pixel] }
                else { self.coefficients[pixel] >= self.threshold },

            other => other == Significance::Sig,
        };

        self.emit(pixel_is_significant)?;

        if pixel_is_significant {
            let positive = self.signs[pixel];
            self.lip[slot] = GARBAGE;
            self.lsp_new.push(pixel);
            self.emit(positive)?;
        }

        Ok(())
    }

    fn process_pixel_decode(&mut self, slot: usize) -> CodeResult {
        if self.read_bit()? {
            let pixel = self.lip[slot];
            let positive = self.read_bit()?;

            self.signs[pixel] = positive;
            self.lip[slot] = GARBAGE;
            self.lsp_new.push(pixel);
        }

        Ok(())
    }

    fn process_set_encode(&mut self, bucket: usize, index: usize, significance: Significance) -> CodeResult {
        debug_assert_ne!(significance, Significance::NewlySig);
        debug_assert_ne!(self.lis[bucket][index].set_type, SetType::Garbage);
        debug_assert!(!self.lis[bucket][index].is_pixel());

        let set = self.lis[bucket][index];
        let mut child_significance = [ Significance::Dunno; 8 ];

        let set_is_significant = match significance {
            // An unknown set is scanned once. The scan yields the position
            // of the first significant coefficient, which pins down the
            // significance of some children for free: the child containing
            // it is significant, and if that child lies in the upper z
            // half, the preceding scan order proves children 0 to 3 empty
            // of significant coefficients.
            Significance::Dunno => match self.decide_significance(&set) {
                Some((offset_x, offset_y, offset_z)) => {
                    let mut child = 0;
                    if offset_x >= set.length_x - set.length_x / 2 { child += 1; }
                    if offset_y >= set.length_y - set.length_y / 2 { child += 2; }
                    if offset_z >= set.length_z - set.length_z / 2 { child += 4; }

                    child_significance[child] = Significance::Sig;
                    if child >= 4 {
                        for deduced in &mut child_significance[.. 4] {
                            *deduced = Significance::Insig;
                        }
                    }

                    true
                }

                None => false,
            },

            known => known == Significance::Sig,
        };

        self.lis[bucket][index].significance =
            if set_is_significant { Significance::Sig } else { Significance::Insig };

        self.emit(set_is_significant)?;

        if set_is_significant {
            self.code_set_encode(bucket, index, child_significance)?;
            self.lis[bucket][index].set_type = SetType::Garbage;
        }

        Ok(())
    }

    fn process_set_decode(&mut self, bucket: usize, index: usize) -> CodeResult {
        debug_assert!(!self.lis[bucket][index].is_pixel());

        let set_is_significant = self.read_bit()?;
        self.lis[bucket][index].significance =
            if set_is_significant { Significance::Sig } else { Significance::Insig };

        if set_is_significant {
            self.code_set_decode(bucket, index)?;
            self.lis[bucket][index].set_type = SetType::Garbage;
        }

        Ok(())
    }

    /// Split a significant set into its eight children and code each:
    /// pixels through the pixel list, non-empty sets through their
    /// partition level bucket, empty children not at all.
    fn code_set_encode(&mut self, bucket: usize, index: usize, child_significance: [Significance; 8]) -> CodeResult {
        let set = self.lis[bucket][index];
        let children = partition_xyz(&set);

        for (child, significance) in children.iter().zip(child_significance.iter().copied()) {
            if child.is_pixel() {
                let pixel = self.pixel_index(child);
                self.lip.push(pixel);
                self.process_pixel_encode(self.lip.len() - 1, significance)?;
            }
            else if !child.is_empty() {
                let child_bucket = child.part_level;
                self.lis[child_bucket].push(*child);
                self.process_set_encode(child_bucket, self.lis[child_bucket].len() - 1, significance)?;
            }
        }

        Ok(())
    }

    fn code_set_decode(&mut self, bucket: usize, index: usize) -> CodeResult {
        let set = self.lis[bucket][index];
        let children = partition_xyz(&set);

        for child in &children {
            if child.is_pixel() {
                let pixel = self.pixel_index(child);
                self.lip.push(pixel);
                self.process_pixel_decode(self.lip.len() - 1)?;
            }
            else if !child.is_empty() {
                let child_bucket = child.part_level;
                self.lis[child_bucket].push(*child);
                self.process_set_decode(child_bucket, self.lis[child_bucket].len() - 1)?;
            }
        }

        Ok(())
    }


    fn refinement_pass_encode(&mut self) -> CodeResult {
        let threshold = self.threshold;

        // decide every refinement bit in parallel, then append serially
        if self.sig_map_enabled {
            let sig_map = &self.sig_map;
            self.lsp_old.par_iter()
                .map(|&pixel| sig_map[pixel])
                .collect_into_vec(&mut self.refinement_bits);
        }
        else {
            let coefficients = &self.coefficients;
            self.lsp_old.par_iter()
                .map(|&pixel| coefficients[pixel] >= threshold)
                .collect_into_vec(&mut self.refinement_bits);
        }

        for index in 0 .. self.refinement_bits.len() {
            let bit = self.refinement_bits[index];
            self.emit(bit)?;
        }

        // reduce every significant magnitude to its residual
        if self.sig_map_enabled {
            // old and new significant pixels coincide with the bitmap,
            // so a single sweep over all coefficients covers both
            self.coefficients.par_iter_mut().for_each(|coefficient| {
                if *coefficient >= threshold { *coefficient -= threshold; }
            });
        }
        else {
            for index in 0 .. self.lsp_old.len() {
                if self.refinement_bits[index] {
                    let pixel = self.lsp_old[index];
                    self.coefficients[pixel] -= threshold;
                }
            }

            for index in 0 .. self.lsp_new.len() {
                let pixel = self.lsp_new[index];
                self.coefficients[pixel] -= threshold;
            }
        }

        self.lsp_old.append(&mut self.lsp_new);
        Ok(())
    }

    fn refinement_pass_decode(&mut self) -> CodeResult {
        let cursor = self.bit_buffer.cursor();
        let count = (self.budget - cursor).min(self.lsp_old.len());
        let half_threshold = self.threshold * 0.5;

        {
            let bits = &self.bit_buffer.as_slice()[cursor .. cursor + count];
            for (index, &bit) in bits.iter().enumerate() {
                let pixel = self.lsp_old[index];
                self.coefficients[pixel] += if bit { half_threshold } else { -half_threshold };
            }
        }

        self.bit_buffer.advance(count);
        if self.bit_buffer.cursor() >= self.budget {
            return Err(BudgetMet);
        }

        let newly_reconstructed = self.threshold * 1.5;
        for &pixel in &self.lsp_new {
            self.coefficients[pixel] = newly_reconstructed;
        }

        self.lsp_old.append(&mut self.lsp_new);
        Ok(())
    }


    /// In quantization mode the last bitplane completes, so every
    /// coefficient at or above the final threshold sits in the significant
    /// list with its residual in `[0, threshold)`. A decoder reconstructs
    /// it to `magnitude - residual + threshold / 2`, and everything else
    /// to zero.
    fn compute_max_quantization_error(&self) -> f64 {
        let half_threshold = self.threshold * 0.5;

        let mut is_significant = vec![ false; self.coefficients.len() ];
        for &pixel in &self.lsp_old { is_significant[pixel] = true; }

        self.coefficients.par_iter().zip(is_significant.par_iter())
            .map(|(&residual, &significant)| {
                if significant { (residual - half_threshold).abs() }
                else { residual }
            })
            .reduce(|| 0.0, f64::max)
    }

    /// Between two bitplanes, every coefficient index is accounted for in
    /// exactly one of the pixel list, a live set, or the significant lists.
    fn lists_account_for_every_pixel(&self) -> bool {
        let Vec3(dim_x, dim_y, _) = self.dimensions;
        let mut counted = vec![ 0_u32; self.dimensions.volume() ];

        for &pixel in self.lip.iter().filter(|&&pixel| pixel != GARBAGE) {
            counted[pixel] += 1;
        }

        for &pixel in self.lsp_old.iter().chain(&self.lsp_new) {
            counted[pixel] += 1;
        }

        for bucket in &self.lis {
            for set in bucket.iter().filter(|set| set.set_type != SetType::Garbage) {
                for z in set.start_z .. set.start_z + set.length_z {
                    for y in set.start_y .. set.start_y + set.length_y {
                        for x in set.start_x .. set.start_x + set.length_x {
                            let index = (z as usize * dim_y + y as usize) * dim_x + x as usize;
                            counted[index] += 1;
                        }
                    }
                }
            }
        }

        counted.iter().all(|&count| count == 1)
    }
}


/// The bit budget for a target rate: `ceil(bits_per_pixel * count)`,
/// rounded up to fill the last byte.
fn bit_budget(bits_per_pixel: f64, count: usize) -> Result<usize> {
    if !bits_per_pixel.is_finite() || bits_per_pixel <= 0.0 || bits_per_pixel > 64.0 {
        return Err(Error::invalid("bits per pixel must be in (0, 64]"));
    }

    let bits = (bits_per_pixel * count as f64).ceil() as usize;
    let bits = (bits + 7) / 8 * 8;

    if bits == 0 || bits > count * 64 {
        return Err(Error::invalid("bit budget out of range"));
    }

    Ok(bits)
}


#[cfg(test)]
mod test {
    use super::*;

    fn noise_volume(dimensions: Vec3<usize>, seed: u64) -> Vec<f64> {
        // simple deterministic pseudo random values in [-1, 1), some zero
        let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
        (0 .. dimensions.volume())
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let value = ((state >> 11) as f64 / (1_u64 << 53) as f64) * 2.0 - 1.0;
                if value.abs() < 0.05 { 0.0 } else { value * 20.0 }
            })
            .collect()
    }

    fn roundtrip(dimensions: Vec3<usize>, values: &[f64], mode: Mode) -> Vec<f64> {
        let mut encoder = Speck3d::new(dimensions);
        encoder.copy_coeffs(values).unwrap();
        encoder.set_mode(mode).unwrap();
        encoder.encode().unwrap();

        let mut decoder = Speck3d::new(dimensions);
        decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        decoder.use_bitstream(encoder.take_bitstream());
        decoder.decode().unwrap();
        decoder.release_coeffs()
    }

    #[test]
    fn initial_lists_cover_the_volume(){
        for &dimensions in &[ Vec3(17, 17, 17), Vec3(16, 12, 9), Vec3(24, 17, 1), Vec3(4, 4, 4) ] {
            let mut coder = Speck3d::new(dimensions);
            coder.coefficients = vec![ 0.0; dimensions.volume() ];
            coder.initialize_lists();

            assert!(coder.lists_account_for_every_pixel(), "dimensions {:?}", dimensions);
        }
    }

    #[test]
    fn bucket_count_matches_partition_depth(){
        let mut coder = Speck3d::new(Vec3(17, 17, 17));
        coder.coefficients = vec![ 0.0; 17 * 17 * 17 ];
        coder.initialize_lists();

        // 1 + 5 + 5 + 5 partition levels
        assert_eq!(coder.lis.len(), 16);
    }

    #[test]
    fn roundtrip_within_final_threshold(){
        let dimensions = Vec3(13, 10, 9);
        let values = noise_volume(dimensions, 3);

        // level -36 leaves a final threshold of two to the minus 36
        let decoded = roundtrip(dimensions, &values, Mode::QuantizationLevel(-36));

        for (&restored, &expected) in decoded.iter().zip(&values) {
            assert!((restored - expected).abs() < 1e-9,
                "expected {}, restored {}", expected, restored);
        }
    }

    #[test]
    fn roundtrip_high_bit_rate(){
        let dimensions = Vec3(8, 8, 8);
        let values = noise_volume(dimensions, 17);

        let decoded = roundtrip(dimensions, &values, Mode::BitsPerPixel(40.0));

        for (&restored, &expected) in decoded.iter().zip(&values) {
            assert!((restored - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn roundtrip_flat_slice(){
        let dimensions = Vec3(23, 19, 1);
        let values = noise_volume(dimensions, 8);

        let decoded = roundtrip(dimensions, &values, Mode::QuantizationLevel(-30));

        for (&restored, &expected) in decoded.iter().zip(&values) {
            assert!((restored - expected).abs() < 1e-7);
        }
    }

    #[test]
    fn budget_is_respected_exactly(){
        let dimensions = Vec3(16, 16, 16);
        let values = noise_volume(dimensions, 5);

        for &bits_per_pixel in &[ 0.5, 1.0, 2.0 ] {
            let mut encoder = Speck3d::new(dimensions);
            encoder.copy_coeffs(&values).unwrap();
            encoder.set_mode(Mode::BitsPerPixel(bits_per_pixel)).unwrap();
            encoder.encode().unwrap();

            let budget = (bits_per_pixel * dimensions.volume() as f64).ceil() as usize;
            let budget = (budget + 7) / 8 * 8;

            assert!(encoder.bit_buffer().len() <= budget);
            assert!(budget - encoder.bit_buffer().len() < 8);
        }
    }

    #[test]
    fn lower_rate_stream_is_a_prefix_of_higher_rate_stream(){
        let dimensions = Vec3(16, 16, 16);
        let values = noise_volume(dimensions, 11);

        let mut low = Speck3d::new(dimensions);
        low.copy_coeffs(&values).unwrap();
        low.set_mode(Mode::BitsPerPixel(1.0)).unwrap();
        low.encode().unwrap();

        let mut high = Speck3d::new(dimensions);
        high.copy_coeffs(&values).unwrap();
        high.set_mode(Mode::BitsPerPixel(2.0)).unwrap();
        high.encode().unwrap();

        let low_bits = low.bit_buffer().as_slice();
        let high_bits = high.bit_buffer().as_slice();
        assert!(low_bits.len() < high_bits.len());
        assert_eq!(low_bits, &high_bits[.. low_bits.len()]);
    }

    #[test]
    fn bitmap_occupancy_never_changes_the_stream(){
        let dimensions = Vec3(11, 7, 5);
        let values = noise_volume(dimensions, 23);

        let mut streams = Vec::new();
        for &occupancy in &[ 0.0, 0.5, 1.0 ] {
            let mut encoder = Speck3d::new(dimensions);
            encoder.copy_coeffs(&values).unwrap();
            encoder.set_mode(Mode::QuantizationLevel(-20)).unwrap();
            encoder.set_sig_map_occupancy(occupancy).unwrap();
            encoder.encode().unwrap();
            streams.push(encoder.take_bitstream().as_slice().to_vec());
        }

        assert_eq!(streams[0], streams[1]);
        assert_eq!(streams[0], streams[2]);
    }

    #[test]
    fn trailing_zero_padding_changes_nothing(){
        let dimensions = Vec3(9, 9, 9);
        let values = noise_volume(dimensions, 29);

        let mut encoder = Speck3d::new(dimensions);
        encoder.copy_coeffs(&values).unwrap();
        encoder.set_mode(Mode::QuantizationLevel(-10)).unwrap();
        encoder.encode().unwrap();

        let stream = encoder.take_bitstream();
        let mut padded = stream.clone();
        for _ in 0 .. 8 { padded.push(false); }

        let mut decoder = Speck3d::new(dimensions);
        decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        decoder.use_bitstream(stream);
        decoder.decode().unwrap();
        let plain = decoder.release_coeffs();

        let mut padded_decoder = Speck3d::new(dimensions);
        padded_decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        padded_decoder.use_bitstream(padded);
        padded_decoder.decode().unwrap();

        assert_eq!(plain, padded_decoder.release_coeffs());
    }

    #[test]
    fn sign_preservation(){
        let dimensions = Vec3(10, 10, 10);
        let values = noise_volume(dimensions, 31);

        let decoded = roundtrip(dimensions, &values, Mode::BitsPerPixel(8.0));

        for (&restored, &expected) in decoded.iter().zip(&values) {
            if expected.abs() > 1.0 && restored != 0.0 {
                assert_eq!(restored.is_sign_negative(), expected.is_sign_negative());
            }
        }
    }

    #[test]
    fn quantization_error_is_reported_and_bounded(){
        let dimensions = Vec3(12, 12, 6);
        let values = noise_volume(dimensions, 37);

        let mut encoder = Speck3d::new(dimensions);
        encoder.copy_coeffs(&values).unwrap();
        encoder.set_mode(Mode::QuantizationLevel(-8)).unwrap();
        encoder.encode().unwrap();

        // the loop stops once the threshold reaches two to the termination level
        let reported = encoder.max_quantization_error().unwrap();
        let final_threshold = (-8.0_f64).exp2();
        assert!(reported <= final_threshold);

        let mut decoder = Speck3d::new(dimensions);
        decoder.set_max_coeff_bits(encoder.max_coeff_bits());
        decoder.use_bitstream(encoder.take_bitstream());
        decoder.decode().unwrap();

        let max_error = decoder.release_coeffs().iter().zip(&values)
            .map(|(restored, expected)| (restored - expected).abs())
            .fold(0.0_f64, f64::max);

        assert!((max_error - reported).abs() < 1e-12,
            "reported {} but measured {}", reported, max_error);
    }

    #[test]
    fn quantization_level_above_top_bitplane_is_rejected(){
        let dimensions = Vec3(8, 8, 8);
        let values = noise_volume(dimensions, 41); // magnitudes around 20, top bitplane 4

        let mut encoder = Speck3d::new(dimensions);
        encoder.copy_coeffs(&values).unwrap();
        encoder.set_mode(Mode::QuantizationLevel(30)).unwrap();
        assert!(encoder.encode().is_err());
    }

    #[test]
    fn invalid_parameters_are_rejected(){
        let mut coder = Speck3d::new(Vec3(8, 8, 8));
        assert!(coder.copy_coeffs(&[ 1.0, 2.0 ]).is_err());
        assert!(coder.set_mode(Mode::BitsPerPixel(0.0)).is_err());
        assert!(coder.set_mode(Mode::BitsPerPixel(65.0)).is_err());
        assert!(coder.set_sig_map_occupancy(1.5).is_err());
        assert!(coder.encode().is_err()); // no coefficients provided
    }
}
