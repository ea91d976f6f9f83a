//! Product Symbol Sets
//!
//! The list of exchange product ids (`BTC-USD`, ...) a connector subscribes to.

/// Ordered, de-duplicated set of product ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolSet(Vec<String>);

impl SymbolSet {
    /// Build from an iterator, trimming entries and dropping blanks and duplicates.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for sym in symbols {
            let sym = sym.as_ref().trim();
            if !sym.is_empty() && !out.iter().any(|s| s == sym) {
                out.push(sym.to_string());
            }
        }
        Self(out)
    }

    /// Parse a comma-separated list such as `"BTC-USD, ETH-USD"`.
    #[must_use]
    pub fn parse_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    /// Whether the set has no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Symbols in configured order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Owned copy of the symbols.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}
