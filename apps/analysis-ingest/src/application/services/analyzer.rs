//! Rolling Window Analyzer
//!
//! Default [`AnalysisPort`]: keeps a bounded price window per product and
//! refreshes its indicator snapshot on every tick that carries a price.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;

use crate::application::ports::{AnalysisError, AnalysisPort};
use crate::domain::indicators::{IndicatorSnapshot, PriceWindow};
use crate::domain::tick::Tick;

/// Default number of prices kept per product.
pub const DEFAULT_WINDOW: usize = 50;

struct ProductState {
    window: PriceWindow,
    latest: IndicatorSnapshot,
}

/// Per-product rolling indicators.
pub struct RollingWindowAnalyzer {
    capacity: usize,
    products: Mutex<HashMap<String, ProductState>>,
}

impl Default for RollingWindowAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RollingWindowAnalyzer {
    /// Analyzer keeping `capacity` prices per product.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            products: Mutex::new(HashMap::new()),
        }
    }

    /// Latest indicators for `product_id`.
    #[must_use]
    pub fn snapshot(&self, product_id: &str) -> Option<IndicatorSnapshot> {
        self.products.lock().get(product_id).map(|s| s.latest)
    }

    /// Prices currently held for `product_id`.
    #[must_use]
    pub fn window_len(&self, product_id: &str) -> usize {
        self.products
            .lock()
            .get(product_id)
            .map_or(0, |s| s.window.len())
    }
}

#[async_trait]
impl AnalysisPort for RollingWindowAnalyzer {
    async fn analyze(&self, tick: Tick) -> Result<(), AnalysisError> {
        let Some(price) = tick.price else {
            return Ok(());
        };
        let price = price.to_f64().ok_or_else(|| AnalysisError::Failed {
            product_id: tick.product_id.clone(),
            reason: format!("price {price} not representable"),
        })?;

        let snapshot = {
            let mut products = self.products.lock();
            let state = products
                .entry(tick.product_id.clone())
                .or_insert_with(|| ProductState {
                    window: PriceWindow::new(self.capacity),
                    latest: IndicatorSnapshot::default(),
                });
            state.latest = state.window.push(price);
            state.latest
        };

        tracing::debug!(
            product_id = %tick.product_id,
            price,
            sma_20 = ?snapshot.sma_20,
            ema_12 = ?snapshot.ema_12,
            price_change = ?snapshot.price_change,
            "Indicators updated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::*;

    fn tick(product: &str, price: Option<i64>) -> Tick {
        let mut tick = Tick::new(product, "coinbase", Utc::now(), Utc::now());
        tick.price = price.map(Decimal::from);
        tick
    }

    #[tokio::test]
    async fn windows_are_per_product() {
        let analyzer = RollingWindowAnalyzer::new(3);
        for price in [100, 101, 102, 103] {
            analyzer.analyze(tick("BTC-USD", Some(price))).await.unwrap();
        }
        analyzer.analyze(tick("ETH-USD", Some(10))).await.unwrap();

        assert_eq!(analyzer.window_len("BTC-USD"), 3);
        assert_eq!(analyzer.window_len("ETH-USD"), 1);
        assert_eq!(analyzer.window_len("SOL-USD"), 0);

        let change = analyzer.snapshot("BTC-USD").unwrap().price_change.unwrap();
        assert!((change - (1.0 / 102.0 * 100.0)).abs() < 1e-9);
        assert_eq!(analyzer.snapshot("ETH-USD").unwrap().price_change, None);
    }

    #[tokio::test]
    async fn ticks_without_price_are_ignored() {
        let analyzer = RollingWindowAnalyzer::default();
        analyzer.analyze(tick("BTC-USD", None)).await.unwrap();
        assert!(analyzer.snapshot("BTC-USD").is_none());
    }
}
