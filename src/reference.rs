//! Precomputed references the demodulator and modulator are constructed
//! with: the frequency-domain phase reference symbol of each transmission
//! mode and the carrier deinterleave permutation.

use crate::params::{OfdmParams, TransmissionMode};
use num_complex::Complex32;

/// Base phase table. Row `i`, column `k - k'` for the block containing
/// carrier `k`.
#[rustfmt::skip]
const PHASE_H: [[u8; 32]; 4] = [
    [0,2,0,0,0,0,1,1,2,0,0,0,2,2,1,1,0,2,0,0,0,0,1,1,2,0,0,0,2,2,1,1],
    [0,3,2,3,0,1,3,0,2,1,2,3,2,3,3,0,0,3,2,3,0,1,3,0,2,1,2,3,2,3,3,0],
    [0,0,0,2,0,2,1,3,2,2,0,2,2,0,1,3,0,0,0,2,0,2,1,3,2,2,0,2,2,0,1,3],
    [0,1,2,1,0,3,3,2,2,3,2,1,2,1,3,2,0,1,2,1,0,3,3,2,2,3,2,1,2,1,3,2],
];

/// Phase parameter blocks: (first carrier of the block, row into [`PHASE_H`],
/// additive phase index). Each block spans 32 consecutive carriers.
#[rustfmt::skip]
const PRS_BLOCKS_MODE_I: [(i32, u8, u8); 48] = [
    (-768, 0, 15), (-736, 1, 20), (-704, 2,  1), (-672, 3,  5),
    (-640, 0, 27), (-608, 1, 16), (-576, 2, 13), (-544, 3,  2),
    (-512, 0,  0), (-480, 1, 25), (-448, 2, 31), (-416, 3,  4),
    (-384, 0, 21), (-352, 1, 12), (-320, 2, 30), (-288, 3, 29),
    (-256, 0, 28), (-224, 1, 23), (-192, 2,  8), (-160, 3, 11),
    (-128, 0, 30), ( -96, 1, 19), ( -64, 2,  7), ( -32, 3, 24),
    (   1, 2,  1), (  33, 1,  5), (  65, 0, 21), (  97, 3, 27),
    ( 129, 2,  2), ( 161, 1, 28), ( 193, 0,  6), ( 225, 3,  1),
    ( 257, 2, 26), ( 289, 1,  8), ( 321, 0, 30), ( 353, 3, 24),
    ( 385, 2,  0), ( 417, 1, 12), ( 449, 0, 27), ( 481, 3, 15),
    ( 513, 2, 11), ( 545, 1, 19), ( 577, 0, 21), ( 609, 3,  7),
    ( 641, 2,  6), ( 673, 1,  3), ( 705, 0, 12), ( 737, 3, 25),
];

#[rustfmt::skip]
const PRS_BLOCKS_MODE_II: [(i32, u8, u8); 12] = [
    (-192, 0,  2), (-160, 1,  3), (-128, 2,  2), ( -96, 3,  2),
    ( -64, 0,  1), ( -32, 1,  2), (   1, 2,  0), (  33, 1,  2),
    (  65, 0,  2), (  97, 3,  1), ( 129, 2,  0), ( 161, 1,  3),
];

#[rustfmt::skip]
const PRS_BLOCKS_MODE_III: [(i32, u8, u8); 6] = [
    ( -96, 0,  2), ( -64, 1,  3), ( -32, 2,  0),
    (   1, 3,  2), (  33, 2,  2), (  65, 1,  2),
];

#[rustfmt::skip]
const PRS_BLOCKS_MODE_IV: [(i32, u8, u8); 24] = [
    (-384, 0,  0), (-352, 1,  1), (-320, 2,  1), (-288, 3,  2),
    (-256, 0,  2), (-224, 1,  2), (-192, 2,  0), (-160, 3,  3),
    (-128, 0,  3), ( -96, 1,  1), ( -64, 2,  3), ( -32, 3,  2),
    (   1, 0,  0), (  33, 3,  1), (  65, 2,  0), (  97, 1,  2),
    ( 129, 0,  0), ( 161, 3,  1), ( 193, 2,  2), ( 225, 1,  2),
    ( 257, 0,  2), ( 289, 3,  1), ( 321, 2,  3), ( 353, 1,  0),
];

fn prs_blocks(mode: TransmissionMode) -> &'static [(i32, u8, u8)] {
    match mode {
        TransmissionMode::I => &PRS_BLOCKS_MODE_I,
        TransmissionMode::II => &PRS_BLOCKS_MODE_II,
        TransmissionMode::III => &PRS_BLOCKS_MODE_III,
        TransmissionMode::IV => &PRS_BLOCKS_MODE_IV,
    }
}

/// Frequency-domain phase reference symbol: `nb_fft` coefficients with unit
/// magnitude on the data carriers and zero elsewhere (DC included).
pub fn prs_fft_reference(mode: TransmissionMode, params: &OfdmParams) -> Vec<Complex32> {
    let n = params.nb_fft as i32;
    let mut out = vec![Complex32::new(0.0, 0.0); params.nb_fft];
    for &(k_start, row, phase_index) in prs_blocks(mode) {
        for j in 0..32 {
            let k = k_start + j;
            let h = PHASE_H[row as usize][j as usize];
            let phi = std::f32::consts::FRAC_PI_2 * (h + phase_index) as f32;
            let bin = ((n + k) % n) as usize;
            out[bin] = Complex32::from_polar(1.0, phi);
        }
    }
    out
}

/// Carrier deinterleave table: logical carrier index to the slot of the
/// corresponding carrier in a DC-skipped, negative-first carrier vector.
///
/// The interleaver sequence is the full-period affine recurrence
/// `p <- (13*p + nb_fft/4 - 1) mod nb_fft`; values inside the carrier band
/// (DC excluded) are kept in order of generation.
pub fn carrier_mapper(params: &OfdmParams) -> Vec<usize> {
    let n = params.nb_fft;
    let c = params.nb_data_carriers;
    let half = (c / 2) as i32;
    let mid = (n / 2) as i32;

    let mut map = Vec::with_capacity(c);
    let mut p: usize = 0;
    while map.len() < c {
        p = (13 * p + n / 4 - 1) % n;
        let k = p as i32 - mid;
        if k == 0 || k.abs() > half {
            continue;
        }
        // Fold to the DC-skipped slot: negative carriers first.
        let slot = if k < 0 { k + half } else { k + half - 1 } as usize;
        map.push(slot);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::OfdmParams;

    const MODES: [TransmissionMode; 4] = [
        TransmissionMode::I,
        TransmissionMode::II,
        TransmissionMode::III,
        TransmissionMode::IV,
    ];

    #[test]
    fn prs_covers_exactly_the_data_carriers() {
        for mode in MODES {
            let params = OfdmParams::from_mode(mode);
            let prs = prs_fft_reference(mode, &params);
            let occupied = prs.iter().filter(|v| v.norm() > 0.5).count();
            assert_eq!(occupied, params.nb_data_carriers, "mode {mode:?}");
            assert_eq!(prs[0].norm(), 0.0, "DC must be empty in mode {mode:?}");
            for v in &prs {
                let m = v.norm();
                assert!(m == 0.0 || (m - 1.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn mapper_is_a_permutation() {
        for mode in MODES {
            let params = OfdmParams::from_mode(mode);
            let map = carrier_mapper(&params);
            assert_eq!(map.len(), params.nb_data_carriers);
            let mut seen = vec![false; params.nb_data_carriers];
            for &slot in &map {
                assert!(!seen[slot], "duplicate slot {slot} in mode {mode:?}");
                seen[slot] = true;
            }
        }
    }
}
