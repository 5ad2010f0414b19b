use super::*;

/// Deterministic Fermat witnesses, truncated to the configured rounds.
pub const FERMAT_WITNESSES: [u32; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

/// Rounds used on gap endpoints.
pub const FERMAT_ROUNDS: usize = 3;

const INTERIOR_DIVISORS: [u32; 10] = [3, 5, 7, 11, 13, 17, 19, 23, 29, 31];

/// Fermat primality test: `a^(n−1) ≡ 1 (mod n)` for each witness. Composite
/// answers are definitive; "prime" answers are probabilistic.
pub fn fermat_probable_prime(n: &BigUint, rounds: usize) -> bool {
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if !n.bit(0) {
        return false;
    }
    if *n == BigUint::from(3u32) {
        return true;
    }

    let one = BigUint::from(1u32);
    let n_minus_1 = n - 1u32;

    for &witness in FERMAT_WITNESSES.iter().take(rounds.min(FERMAT_WITNESSES.len())) {
        let a = BigUint::from(witness);
        if a >= *n {
            continue;
        }
        if a.modpow(&n_minus_1, n) != one {
            return false;
        }
    }

    true
}

/// Every integer strictly between `start` and `start + gap_size` must be
/// composite. Cheap divisibility first, then a 1-round Fermat test.
pub fn gap_interior_composite(start: &BigUint, gap_size: u32) -> bool {
    if gap_size < 2 {
        return false;
    }

    let zero = BigUint::from(0u32);

    'offsets: for offset in 1..gap_size {
        let candidate = start + offset;

        if !candidate.bit(0) {
            continue;
        }

        for divisor in INTERIOR_DIVISORS {
            if &candidate % divisor == zero {
                continue 'offsets;
            }
        }

        if fermat_probable_prime(&candidate, 1) {
            return false;
        }
    }

    true
}

/// Natural log of an arbitrary-precision integer: take the top 53 bits as a
/// float mantissa and add `ln 2` per truncated bit.
pub fn ln_big(n: &BigUint) -> f64 {
    let bits = n.bits();
    if bits == 0 {
        return f64::NEG_INFINITY;
    }

    if bits <= 53 {
        let value = u64::try_from(n).expect("fits in 53 bits");
        return (value as f64).ln();
    }

    let shift = (bits - 53) as u32;
    let top = u64::try_from(&(n >> shift)).expect("exactly 53 bits");
    (top as f64).ln() + shift as f64 * std::f64::consts::LN_2
}

/// Merit of a gap starting at `prime`: `gap / ln(prime)`.
pub fn merit(prime: &BigUint, gap_size: u32) -> f64 {
    let ln_prime = ln_big(prime);
    if ln_prime <= 0.0 {
        return 0.0;
    }
    gap_size as f64 / ln_prime
}

/// Full verification of a candidate gap: both endpoints pass the endpoint
/// Fermat rounds and the whole interior is composite. Returns the
/// full-precision merit on success.
pub fn verify_gap(start: &BigUint, gap_size: u32) -> Option<f64> {
    if !fermat_probable_prime(start, FERMAT_ROUNDS) {
        return None;
    }

    let end = start + gap_size;
    if !fermat_probable_prime(&end, FERMAT_ROUNDS) {
        return None;
    }

    if !gap_interior_composite(start, gap_size) {
        return None;
    }

    Some(merit(start, gap_size))
}

/// Merit is stored in `bits` with six decimal places of precision.
pub fn merit_to_compact(merit: f64) -> u32 {
    (merit * 1_000_000.0).round() as u32
}

pub fn compact_to_merit(bits: u32) -> f64 {
    bits as f64 / 1_000_000.0
}
