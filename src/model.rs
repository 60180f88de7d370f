//! Order-0 symbol model over the byte alphabet.

use tracing::trace;

pub const ALPHABET: usize = 256;

/// Per-symbol occurrence counts and their running total.
///
/// Models are trained only by deterministic counting passes and are never
/// stored in the output; a decoder rebuilds an identical model from the same
/// training data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolModel {
    counts: [u64; ALPHABET],
    total: u64,
}

impl Default for SymbolModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolModel {
    pub fn new() -> Self {
        Self {
            counts: [0; ALPHABET],
            total: 0,
        }
    }

    #[inline]
    pub fn train(&mut self, symbol: u8) {
        self.counts[symbol as usize] += 1;
        self.total += 1;
    }

    pub fn train_with<I: IntoIterator<Item = u8>>(&mut self, symbols: I) {
        for s in symbols {
            self.train(s);
        }
    }

    pub fn count(&self, symbol: u8) -> u64 {
        self.counts[symbol as usize]
    }

    pub fn counts(&self) -> &[u64; ALPHABET] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// `(count, total)` of `symbol`; the probability is their ratio.
    pub fn probability(&self, symbol: u8) -> (u64, u64) {
        (self.count(symbol), self.total)
    }

    /// Number of symbols with a non-zero count.
    pub fn used_symbols(&self) -> usize {
        self.counts.iter().filter(|&&c| c != 0).count()
    }

    /// Order-0 entropy in bits per symbol.
    pub fn entropy_bits(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let n = self.total as f64;
        self.counts
            .iter()
            .filter(|&&c| c != 0)
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.log2()
            })
            .sum()
    }

    pub fn log_probabilities(&self, name: &str) {
        for s in 0..ALPHABET {
            let (c, t) = self.probability(s as u8);
            if c != 0 {
                trace!(model = name, symbol = s, "probability {c}/{t}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_probability() {
        let mut m = SymbolModel::new();
        m.train_with([1u8, 1, 2, 255]);
        assert_eq!(m.total(), 4);
        assert_eq!(m.probability(1), (2, 4));
        assert_eq!(m.probability(0), (0, 4));
        assert_eq!(m.used_symbols(), 3);
        assert!((m.entropy_bits() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn identical_training_gives_identical_models() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * i % 17) as u8).collect();
        let mut a = SymbolModel::new();
        let mut b = SymbolModel::new();
        a.train_with(data.iter().copied());
        b.train_with(data.iter().copied());
        assert_eq!(a, b);
    }
}
