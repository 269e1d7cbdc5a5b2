//! Collision-suffix probing (§4.4).
//!
//! When the bare name is taken, probe a numeric suffix inserted before the
//! extension (`report.pdf` -> `report-42.pdf`). The search widens by an order
//! of magnitude each round (1, 10, 100, ..., 10^8) and draws 9 random
//! candidates per round rather than walking sequentially, so concurrent
//! allocators racing for the same name rarely pick the same suffix twice.

use rand::Rng;

const MAGNITUDES: [u64; 9] = [1, 10, 100, 1_000, 10_000, 100_000, 1_000_000, 10_000_000, 100_000_000];
const PROBES_PER_MAGNITUDE: u32 = 9;

fn split_stem_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

fn with_suffix(name: &str, n: u64) -> String {
    let (stem, ext) = split_stem_ext(name);
    format!("{stem}-{n}{ext}")
}

/// Finds a free name starting from `base`, calling `taken(candidate)` to test
/// each one. Returns the first candidate for which `taken` returns `false`.
///
/// Tries `base` itself first, then widens through `MAGNITUDES`, drawing
/// `PROBES_PER_MAGNITUDE` random suffixes per magnitude before moving to the
/// next. Returns `None` if every magnitude is exhausted without finding a
/// free name.
pub fn allocate_free_name(base: &str, mut taken: impl FnMut(&str) -> bool) -> Option<String> {
    if !taken(base) {
        return Some(base.to_string());
    }

    let mut rng = rand::thread_rng();
    for &magnitude in &MAGNITUDES {
        for _ in 0..PROBES_PER_MAGNITUDE {
            let n = rng.gen_range(1..=magnitude);
            let candidate = with_suffix(base, n);
            if !taken(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}
