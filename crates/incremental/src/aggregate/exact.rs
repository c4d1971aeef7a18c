//! Exact accumulation of finite floats.
//!
//! Every finite `f64` is an integer multiple of 2^-1074, so a fixed-point
//! integer wide enough for the whole exponent range holds any sum of them
//! without rounding. Adding and removing a term are exact inverses, and the
//! stored value does not depend on the order terms arrived in. Rounding to
//! `f64` happens once, when the result is read.

/// Bits per limb; limbs are stored in `i64` to leave room for carries.
const LIMB_BITS: usize = 32;
const LIMB_MASK: i64 = (1 << LIMB_BITS) - 1;

/// Bit position of 2^0.
const UNIT: usize = 1074;

/// 2^1024 is above every finite float, plus 64 bits of headroom for counts.
const LIMBS: usize = (UNIT + 1024 + 64 + LIMB_BITS - 1) / LIMB_BITS;

/// A signed fixed-point integer in units of 2^-1074.
///
/// Limbs below the top one are kept in `0..2^32`; the top limb carries the
/// sign. This normal form is unique, so equal sums compare equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ExactSum {
    limbs: [i64; LIMBS],
}

impl ExactSum {
    pub fn new() -> Self {
        Self { limbs: [0; LIMBS] }
    }

    /// Adds a finite float. Non-finite values must be handled by the caller.
    pub fn add_f64(&mut self, value: f64) {
        let (mantissa, pos, negative) = decompose(value);
        self.deposit(mantissa, pos, negative);
    }

    pub fn remove_f64(&mut self, value: f64) {
        let (mantissa, pos, negative) = decompose(value);
        self.deposit(mantissa, pos, !negative);
    }

    pub fn add_i128(&mut self, value: i128) {
        let magnitude = value.unsigned_abs();
        let negative = value < 0;
        self.deposit(magnitude as u64, UNIT, negative);
        self.deposit((magnitude >> 64) as u64, UNIT + 64, negative);
    }

    pub fn is_zero(&self) -> bool {
        self.limbs.iter().all(|&l| l == 0)
    }

    /// The sum rounded to nearest, ties to even. Overflows to infinity.
    pub fn to_f64(&self) -> f64 {
        let mut limbs = self.limbs;
        let negative = limbs[LIMBS - 1] < 0;
        if negative {
            for limb in limbs.iter_mut() {
                *limb = -*limb;
            }
            carry(&mut limbs, 0, LIMBS - 1);
        }
        let magnitude = round(&limbs);
        if negative {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Adds or subtracts `mantissa * 2^(pos - 1074)`.
    fn deposit(&mut self, mantissa: u64, pos: usize, negative: bool) {
        if mantissa == 0 {
            return;
        }
        let first = pos / LIMB_BITS;
        let mut wide = (mantissa as u128) << (pos % LIMB_BITS);
        let mut i = first;
        while wide != 0 {
            let chunk = (wide as i64) & LIMB_MASK;
            if negative {
                self.limbs[i] -= chunk;
            } else {
                self.limbs[i] += chunk;
            }
            wide >>= LIMB_BITS;
            i += 1;
        }
        carry(&mut self.limbs, first, i - 1);
    }
}

/// Splits a finite float into (mantissa, bit position of its unit, sign).
fn decompose(value: f64) -> (u64, usize, bool) {
    let bits = value.to_bits();
    let negative = bits >> 63 == 1;
    let exponent = ((bits >> 52) & 0x7FF) as usize;
    let fraction = bits & ((1 << 52) - 1);
    if exponent == 0 {
        (fraction, 0, negative)
    } else {
        (fraction | (1 << 52), exponent - 1, negative)
    }
}

/// Restores the normal form from `from` upwards; stops once no carry is
/// left past `touched`.
fn carry(limbs: &mut [i64; LIMBS], from: usize, touched: usize) {
    let mut i = from;
    while i < LIMBS - 1 {
        let c = limbs[i] >> LIMB_BITS;
        limbs[i] &= LIMB_MASK;
        limbs[i + 1] += c;
        if c == 0 && i >= touched {
            break;
        }
        i += 1;
    }
}

fn locate(pos: usize) -> (usize, usize) {
    let i = (pos / LIMB_BITS).min(LIMBS - 1);
    (i, pos - i * LIMB_BITS)
}

fn bit(limbs: &[i64; LIMBS], pos: usize) -> u64 {
    let (i, off) = locate(pos);
    ((limbs[i] as u64) >> off) & 1
}

/// Rounds a non-negative normal-form value to the nearest `f64`.
fn round(limbs: &[i64; LIMBS]) -> f64 {
    let Some(high) = limbs.iter().rposition(|&l| l != 0) else {
        return 0.0;
    };
    let msb = high * LIMB_BITS + 63 - (limbs[high] as u64).leading_zeros() as usize;

    // Below 2^53 units the value is exact as a subnormal or smallest normal
    if msb < 53 {
        let units = (limbs[0] as u64) | ((limbs[1] as u64) << LIMB_BITS);
        return f64::from_bits(units);
    }

    let mut shift = msb - 52;
    let mut significand = (shift..=msb).rev().fold(0u64, |acc, p| (acc << 1) | bit(limbs, p));

    let half = bit(limbs, shift - 1) == 1;
    let (i, off) = locate(shift - 1);
    let sticky =
        limbs[..i].iter().any(|&l| l != 0) || (limbs[i] as u64) & ((1u64 << off) - 1) != 0;
    if half && (sticky || significand & 1 == 1) {
        significand += 1;
        if significand == 1 << 53 {
            significand >>= 1;
            shift += 1;
        }
    }

    let biased = shift as u64 + 1;
    if biased >= 0x7FF {
        return f64::INFINITY;
    }
    f64::from_bits((biased << 52) | (significand & ((1 << 52) - 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(values: &[f64]) -> ExactSum {
        let mut acc = ExactSum::new();
        for v in values {
            acc.add_f64(*v);
        }
        acc
    }

    #[test]
    fn test_single_values_round_trip() {
        for v in [
            1.0,
            -1.0,
            0.1,
            -2.5e-300,
            f64::MAX,
            f64::MIN,
            f64::MIN_POSITIVE,
            f64::MIN_POSITIVE / 8.0,
            5e-324,
            123456.789,
        ] {
            assert_eq!(sum(&[v]).to_f64().to_bits(), v.to_bits(), "{}", v);
        }
    }

    #[test]
    fn test_rounds_once() {
        assert_eq!(sum(&[0.1, 0.2]).to_f64(), 0.30000000000000004);
        assert_eq!(sum(&[1e16, 1.0, -1e16]).to_f64(), 1.0);
        assert_eq!(sum(&[1.0, 1e-30, -1.0]).to_f64(), 1e-30);
    }

    #[test]
    fn test_remove_restores_exactly() {
        let mut acc = sum(&[0.1]);
        let before = acc.clone();
        acc.add_f64(0.2);
        acc.remove_f64(0.2);
        assert_eq!(acc, before);
        assert_eq!(acc.to_f64(), 0.1);

        acc.remove_f64(0.1);
        assert!(acc.is_zero());
        assert_eq!(acc.to_f64(), 0.0);
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = sum(&[1e300, -3.5, 7e-310, 0.1, -1e300]);
        let b = sum(&[0.1, 7e-310, -1e300, -3.5, 1e300]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_overflow_rounds_to_infinity() {
        assert_eq!(sum(&[f64::MAX, f64::MAX]).to_f64(), f64::INFINITY);
        assert_eq!(sum(&[f64::MIN, f64::MIN]).to_f64(), f64::NEG_INFINITY);
        assert_eq!(sum(&[f64::MAX, f64::MAX, f64::MIN]).to_f64(), f64::MAX);
    }

    #[test]
    fn test_integers_mix_exactly() {
        let mut acc = sum(&[0.5]);
        acc.add_i128(i64::MAX as i128);
        acc.add_i128(i64::MAX as i128);
        acc.add_i128(-(i64::MAX as i128) * 2);
        assert_eq!(acc.to_f64(), 0.5);
        acc.add_i128(i128::MIN);
        acc.add_i128(i128::MAX);
        assert_eq!(acc.to_f64(), -0.5);
    }
}
