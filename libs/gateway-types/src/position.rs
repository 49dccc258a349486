/// Per-instrument signed position and volume-weighted average price.
///
/// Update rule for a signed delta `d` executed at price `p`:
/// - if the new size keeps (or starts) the same sign as the old one, the
///   average price is the size-weighted blend of old and new;
/// - if the new size is (numerically) zero, the average price resets to 0;
/// - if the sign flips, the old position was fully unwound and the
///   remainder opens a fresh position at the fill price.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position {
    pub size: f64,
    pub average_price: f64,
}

impl Position {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_fill(&mut self, delta: f64, price: f64) {
        let old_size = self.size;
        let new_size = old_size + delta;

        if new_size.abs() < f64::EPSILON {
            self.size = 0.0;
            self.average_price = 0.0;
            return;
        }

        let same_sign = old_size == 0.0 || old_size.signum() == new_size.signum();
        if same_sign {
            self.average_price = (old_size * self.average_price + delta * price) / new_size;
        } else {
            // Sign flip: the old side was closed out entirely and the
            // residual opens a fresh position at the fill price.
            self.average_price = price;
        }
        self.size = new_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulating_same_side_blends_average_price() {
        let mut pos = Position::new();
        pos.apply_fill(1.0, 100.0);
        pos.apply_fill(1.0, 200.0);
        assert_eq!(pos.size, 2.0);
        assert_eq!(pos.average_price, 150.0);
    }

    #[test]
    fn closing_to_zero_resets_average_price() {
        let mut pos = Position::new();
        pos.apply_fill(1.0, 100.0);
        pos.apply_fill(-1.0, 150.0);
        assert_eq!(pos.size, 0.0);
        assert_eq!(pos.average_price, 0.0);
    }

    #[test]
    fn sign_flip_opens_fresh_position_at_fill_price() {
        let mut pos = Position::new();
        pos.apply_fill(1.0, 100.0);
        pos.apply_fill(-2.0, 120.0);
        assert_eq!(pos.size, -1.0);
        assert_eq!(pos.average_price, 120.0);
    }

    #[test]
    fn size_is_monotone_in_signed_fills() {
        let mut pos = Position::new();
        let fills = [(1.0, 10.0), (0.5, 11.0), (-0.25, 12.0)];
        let expected: f64 = fills.iter().map(|(d, _)| d).sum();
        for (d, p) in fills {
            pos.apply_fill(d, p);
        }
        assert!((pos.size - expected).abs() < 1e-9);
    }
}
