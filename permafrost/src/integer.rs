//! Arbitrary-precision integers as borrowed from values.

/// Borrowed big integer.
///
/// The magnitude is stored as little-endian 64-bit limbs,
/// least significant limb first, without trailing zero limbs.
/// Zero has no limbs and is never negative.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Int<'a>
{
    /// Whether the integer is less than zero.
    pub negative: bool,

    /// The magnitude of the integer.
    pub limbs: &'a [u64],
}

impl<'a> Int<'a>
{
    /// Whether the integer is zero.
    pub fn is_zero(&self) -> bool
    {
        self.limbs.is_empty()
    }

    /// Convert to a native integer, if it fits.
    pub fn to_i128(&self) -> Option<i128>
    {
        let magnitude = match *self.limbs {
            []             => 0,
            [lo]           => u128::from(lo),
            [lo, hi]       => u128::from(hi) << 64 | u128::from(lo),
            _              => return None,
        };
        if self.negative {
            // i128::MIN has no positive counterpart.
            if magnitude == 1 << 127 {
                Some(i128::MIN)
            } else {
                i128::try_from(magnitude).ok().map(|m| -m)
            }
        } else {
            i128::try_from(magnitude).ok()
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn to_i128_bounds()
    {
        let min = Int{negative: true, limbs: &[0, 1 << 63]};
        assert_eq!(min.to_i128(), Some(i128::MIN));

        let too_large = Int{negative: false, limbs: &[0, 1 << 63]};
        assert_eq!(too_large.to_i128(), None);

        let three_limbs = Int{negative: false, limbs: &[1, 2, 3]};
        assert_eq!(three_limbs.to_i128(), None);

        assert_eq!(Int{negative: false, limbs: &[]}.to_i128(), Some(0));
        assert_eq!(Int{negative: true, limbs: &[5]}.to_i128(), Some(-5));
    }
}
