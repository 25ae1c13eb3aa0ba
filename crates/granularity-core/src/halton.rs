//! Incremental Halton(2,3) sequence for temporal sub-pixel jitter.
//!
//! Each call to [`HaltonSequence::next`] advances both dimensions by one index
//! using carry propagation instead of recomputing the radical inverse, so the
//! expected cost per step is constant.

use glam::Vec2;

/// Stateful Halton(2,3) generator.
///
/// The output after `n` calls equals the radical inverses of `n` in bases 2
/// and 3. The value is a pure function of the call count; [`reset`](Self::reset)
/// restarts the sequence.
#[derive(Debug, Clone, Default)]
pub struct HaltonSequence {
    base2: u32,
    base3: u32,
    value: Vec2,
}

impl HaltonSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart the sequence from index zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of steps taken since construction or the last reset.
    pub fn index(&self) -> u32 {
        self.base2
    }

    /// Last produced value, `(0, 0)` before the first step.
    pub fn current(&self) -> Vec2 {
        self.value
    }

    /// Advance by one index and return the new 2D sample in `[0, 1)²`.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Vec2 {
        self.step_base2();
        self.step_base3();
        self.value
    }

    fn step_base2(&mut self) {
        // Bits flipped by the increment form 0*1+; each one toggles its
        // contribution, from the lowest bit up to the last carry.
        let mut change = 0.5f32;
        let mut old = self.base2;
        self.base2 = self.base2.wrapping_add(1);
        let mut diff = self.base2 ^ old;

        loop {
            self.value.x += if old & 1 == 1 { -change } else { change };
            change *= 0.5;

            diff >>= 1;
            old >>= 1;
            if diff == 0 {
                break;
            }
        }
    }

    fn step_base3(&mut self) {
        // Base-3 digits live in 2-bit groups. A group reaching 3 is forced to
        // carry into the next group.
        const ONE_THIRD: f32 = 1.0 / 3.0;
        let mut mask = 0x3u32;
        let mut add = 0x1u32;
        let mut change = ONE_THIRD;
        self.base3 = self.base3.wrapping_add(1);

        loop {
            if self.base3 & mask == mask {
                self.base3 = self.base3.wrapping_add(add);
                self.value.y -= 2.0 * change;

                mask <<= 2;
                add <<= 2;
                change *= ONE_THIRD;
            } else {
                self.value.y += change;
                break;
            }
        }
    }
}

/// Radical inverse of `index` in `base`, computed directly.
pub fn radical_inverse(index: u32, base: u32) -> f32 {
    let mut result = 0.0f32;
    let mut f = 1.0f32;
    let mut i = index;

    while i > 0 {
        f /= base as f32;
        result += f * (i % base) as f32;
        i /= base;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_samples_match_halton_2_3() {
        let mut seq = HaltonSequence::new();
        let expected_x = [0.5, 0.25, 0.75, 0.125, 0.625, 0.375, 0.875];
        let expected_y = [
            1.0 / 3.0,
            2.0 / 3.0,
            1.0 / 9.0,
            4.0 / 9.0,
            7.0 / 9.0,
            2.0 / 9.0,
            5.0 / 9.0,
        ];

        for (x, y) in expected_x.iter().zip(expected_y.iter()) {
            let sample = seq.next();
            assert!((sample.x - x).abs() < 1e-6, "x={} expected {}", sample.x, x);
            assert!((sample.y - y).abs() < 1e-6, "y={} expected {}", sample.y, y);
        }
    }

    #[test]
    fn test_incremental_matches_radical_inverse() {
        let mut seq = HaltonSequence::new();
        for index in 1..=1000u32 {
            let sample = seq.next();
            assert!((sample.x - radical_inverse(index, 2)).abs() < 1e-3, "base 2 drift at {index}");
            assert!((sample.y - radical_inverse(index, 3)).abs() < 1e-3, "base 3 drift at {index}");
            assert!((0.0..1.0).contains(&sample.x));
            assert!((0.0..1.0).contains(&sample.y));
        }
        assert_eq!(seq.index(), 1000);
    }

    #[test]
    fn test_output_is_pure_function_of_call_count() {
        let mut a = HaltonSequence::new();
        let mut b = HaltonSequence::new();
        for _ in 0..37 {
            a.next();
        }
        for _ in 0..37 {
            b.next();
        }
        assert_eq!(a.current(), b.current());

        a.reset();
        assert_eq!(a.current(), Vec2::ZERO);
        assert_eq!(a.next(), HaltonSequence::new().next());
    }
}
