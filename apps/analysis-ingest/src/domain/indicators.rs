//! Rolling Price Indicators
//!
//! A bounded window of recent prices for one product and the indicator
//! values derived from it. Indicators are reported only once the window
//! holds enough prices for their period.

use std::collections::VecDeque;

use serde::Serialize;

/// Short simple moving average period.
pub const SMA_SHORT: usize = 20;
/// Long simple moving average period.
pub const SMA_LONG: usize = 50;
/// Fast exponential moving average period.
pub const EMA_FAST: usize = 12;
/// Slow exponential moving average period.
pub const EMA_SLOW: usize = 26;
/// MACD signal line period.
pub const MACD_SIGNAL: usize = 9;
/// Relative strength index period.
pub const RSI_PERIOD: usize = 14;
/// Bollinger band width in standard deviations around the SMA-20.
pub const BOLLINGER_WIDTH: f64 = 2.0;

/// Indicator values at one tick. `None` until the window is warm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    /// Relative strength index.
    pub rsi: Option<f64>,
    /// MACD line (EMA-12 minus EMA-26).
    pub macd: Option<f64>,
    /// MACD signal line.
    pub macd_signal: Option<f64>,
    /// MACD histogram.
    pub macd_histogram: Option<f64>,
    /// Upper Bollinger band.
    pub bollinger_upper: Option<f64>,
    /// Middle Bollinger band.
    pub bollinger_middle: Option<f64>,
    /// Lower Bollinger band.
    pub bollinger_lower: Option<f64>,
    /// 20 period simple moving average.
    pub sma_20: Option<f64>,
    /// 50 period simple moving average.
    pub sma_50: Option<f64>,
    /// 12 period exponential moving average.
    pub ema_12: Option<f64>,
    /// 26 period exponential moving average.
    pub ema_26: Option<f64>,
    /// Percent change from the previous price.
    pub price_change: Option<f64>,
}

/// Exponential moving average that reports after `period` samples.
#[derive(Debug, Clone)]
struct Ema {
    period: usize,
    alpha: f64,
    value: Option<f64>,
    samples: usize,
}

impl Ema {
    #[allow(clippy::cast_precision_loss)]
    fn new(period: usize) -> Self {
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            value: None,
            samples: 0,
        }
    }

    fn update(&mut self, price: f64) -> Option<f64> {
        self.samples += 1;
        let next = self
            .value
            .map_or(price, |prev| self.alpha.mul_add(price - prev, prev));
        self.value = Some(next);
        (self.samples >= self.period).then_some(next)
    }
}

/// Wilder-smoothed relative strength index.
///
/// Seeds with the plain mean of the first `period` changes, then smooths
/// as `avg = (avg * (period - 1) + change) / period`.
#[derive(Debug, Clone)]
struct Rsi {
    period: usize,
    previous: Option<f64>,
    changes: usize,
    avg_gain: f64,
    avg_loss: f64,
}

impl Rsi {
    const fn new(period: usize) -> Self {
        Self {
            period,
            previous: None,
            changes: 0,
            avg_gain: 0.0,
            avg_loss: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn update(&mut self, price: f64) -> Option<f64> {
        let previous = self.previous.replace(price)?;
        let change = price - previous;
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };

        self.changes += 1;
        let period = self.period as f64;
        if self.changes <= self.period {
            self.avg_gain += gain / period;
            self.avg_loss += loss / period;
            if self.changes < self.period {
                return None;
            }
        } else {
            self.avg_gain = self.avg_gain.mul_add(period - 1.0, gain) / period;
            self.avg_loss = self.avg_loss.mul_add(period - 1.0, loss) / period;
        }

        Some(if self.avg_loss == 0.0 {
            // Flat prices carry no momentum either way.
            if self.avg_gain == 0.0 { 50.0 } else { 100.0 }
        } else {
            100.0 - 100.0 / (1.0 + self.avg_gain / self.avg_loss)
        })
    }
}

/// Recent prices for one product.
#[derive(Debug, Clone)]
pub struct PriceWindow {
    capacity: usize,
    prices: VecDeque<f64>,
    ema_fast: Ema,
    ema_slow: Ema,
    macd_signal: Ema,
    rsi: Rsi,
}

impl PriceWindow {
    /// Window keeping at most `capacity` prices (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            prices: VecDeque::with_capacity(capacity),
            ema_fast: Ema::new(EMA_FAST),
            ema_slow: Ema::new(EMA_SLOW),
            macd_signal: Ema::new(MACD_SIGNAL),
            rsi: Rsi::new(RSI_PERIOD),
        }
    }

    /// Number of prices held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether no price has been pushed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Add a price and return the indicators including it.
    pub fn push(&mut self, price: f64) -> IndicatorSnapshot {
        let previous = self.prices.back().copied();
        if self.prices.len() == self.capacity {
            self.prices.pop_front();
        }
        self.prices.push_back(price);

        let ema_12 = self.ema_fast.update(price);
        let ema_26 = self.ema_slow.update(price);
        let macd = ema_12.zip(ema_26).map(|(fast, slow)| fast - slow);
        let macd_signal = macd.and_then(|line| self.macd_signal.update(line));
        let sma_20 = self.sma(SMA_SHORT);
        let band = sma_20
            .zip(self.std_dev(SMA_SHORT))
            .map(|(middle, sigma)| (middle, BOLLINGER_WIDTH * sigma));

        IndicatorSnapshot {
            rsi: self.rsi.update(price),
            macd,
            macd_signal,
            macd_histogram: macd.zip(macd_signal).map(|(line, signal)| line - signal),
            bollinger_upper: band.map(|(middle, width)| middle + width),
            bollinger_middle: band.map(|(middle, _)| middle),
            bollinger_lower: band.map(|(middle, width)| middle - width),
            sma_20,
            sma_50: self.sma(SMA_LONG),
            ema_12,
            ema_26,
            price_change: previous
                .filter(|prev| *prev != 0.0)
                .map(|prev| (price - prev) / prev * 100.0),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn sma(&self, period: usize) -> Option<f64> {
        if self.prices.len() < period {
            return None;
        }
        let sum: f64 = self.prices.iter().rev().take(period).sum();
        Some(sum / period as f64)
    }

    /// Population standard deviation of the last `period` prices.
    #[allow(clippy::cast_precision_loss)]
    fn std_dev(&self, period: usize) -> Option<f64> {
        let mean = self.sma(period)?;
        let squares: f64 = self
            .prices
            .iter()
            .rev()
            .take(period)
            .map(|price| (price - mean).powi(2))
            .sum();
        Some((squares / period as f64).sqrt())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn first_price_has_no_change() {
        let mut window = PriceWindow::new(50);
        let snapshot = window.push(100.0);
        assert_eq!(snapshot.price_change, None);
        assert_eq!(snapshot.sma_20, None);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn price_change_is_percent() {
        let mut window = PriceWindow::new(50);
        window.push(100.0);
        let snapshot = window.push(101.0);
        assert!(close(snapshot.price_change.unwrap(), 1.0));
    }

    #[test]
    fn sma_reported_after_period() {
        let mut window = PriceWindow::new(50);
        for i in 1..SMA_SHORT {
            assert_eq!(window.push(f64::from(u32::try_from(i).unwrap())).sma_20, None);
        }
        let snapshot = window.push(20.0);
        assert!(close(snapshot.sma_20.unwrap(), 10.5));
        assert_eq!(snapshot.sma_50, None);
    }

    #[test]
    fn constant_prices_converge_everywhere() {
        let mut window = PriceWindow::new(50);
        let mut last = IndicatorSnapshot::default();
        for _ in 0..60 {
            last = window.push(42.0);
        }
        assert!(close(last.sma_20.unwrap(), 42.0));
        assert!(close(last.sma_50.unwrap(), 42.0));
        assert!(close(last.ema_12.unwrap(), 42.0));
        assert!(close(last.ema_26.unwrap(), 42.0));
        assert!(close(last.macd.unwrap(), 0.0));
        assert!(close(last.macd_signal.unwrap(), 0.0));
        assert!(close(last.macd_histogram.unwrap(), 0.0));
        assert!(close(last.rsi.unwrap(), 50.0));
        assert!(close(last.bollinger_upper.unwrap(), 42.0));
        assert!(close(last.bollinger_middle.unwrap(), 42.0));
        assert!(close(last.bollinger_lower.unwrap(), 42.0));
    }

    #[test]
    fn rsi_needs_a_full_period_of_changes() {
        let mut window = PriceWindow::new(50);
        for i in 0..RSI_PERIOD {
            assert_eq!(window.push(100.0 + f64::from(u32::try_from(i).unwrap())).rsi, None);
        }
        assert!(window.push(200.0).rsi.is_some());
    }

    #[test]
    fn rsi_bounds_follow_direction() {
        let mut rising = PriceWindow::new(50);
        let mut falling = PriceWindow::new(50);
        let (mut up, mut down) = (None, None);
        for i in 0..30 {
            let step = f64::from(i);
            up = rising.push(100.0 + step).rsi;
            down = falling.push(100.0 - step).rsi;
        }
        assert!(close(up.unwrap(), 100.0));
        assert!(close(down.unwrap(), 0.0));
    }

    #[test]
    fn rsi_balanced_moves_are_neutral() {
        let mut window = PriceWindow::new(50);
        let mut rsi = None;
        for i in 0..=RSI_PERIOD {
            rsi = window.push(if i % 2 == 0 { 100.0 } else { 101.0 }).rsi;
        }
        assert!(close(rsi.unwrap(), 50.0));
    }

    #[test]
    fn wilder_smoothing_after_seed() {
        let mut window = PriceWindow::new(50);
        for i in 0..=RSI_PERIOD {
            window.push(if i % 2 == 0 { 100.0 } else { 101.0 });
        }
        // Seed: avg gain 0.5, avg loss 0.5. One more +1 move:
        // gain (0.5 * 13 + 1) / 14, loss 0.5 * 13 / 14.
        let last = window.push(101.0).rsi.unwrap();
        let gain = 0.5f64.mul_add(13.0, 1.0) / 14.0;
        let loss = 0.5 * 13.0 / 14.0;
        assert!(close(last, 100.0 - 100.0 / (1.0 + gain / loss)));
    }

    #[test]
    fn bollinger_bands_span_two_sigma() {
        let mut window = PriceWindow::new(50);
        let mut last = IndicatorSnapshot::default();
        for i in 1..=SMA_SHORT {
            last = window.push(f64::from(u32::try_from(i).unwrap()));
        }
        // Population variance of 1..=20 is (20^2 - 1) / 12.
        let sigma = (399.0f64 / 12.0).sqrt();
        assert!(close(last.bollinger_middle.unwrap(), 10.5));
        assert!(close(last.bollinger_upper.unwrap(), 2.0f64.mul_add(sigma, 10.5)));
        assert!(close(last.bollinger_lower.unwrap(), 2.0f64.mul_add(-sigma, 10.5)));
    }

    #[test]
    fn macd_signal_waits_for_its_own_period() {
        let mut window = PriceWindow::new(50);
        let mut snapshots = Vec::new();
        for i in 0..(EMA_SLOW + MACD_SIGNAL) {
            snapshots.push(window.push(100.0 + f64::from(u32::try_from(i).unwrap())));
        }
        let first_macd = snapshots.iter().position(|s| s.macd.is_some()).unwrap();
        let first_signal = snapshots.iter().position(|s| s.macd_signal.is_some()).unwrap();
        assert_eq!(first_macd, EMA_SLOW - 1);
        assert_eq!(first_signal, first_macd + MACD_SIGNAL - 1);

        let last = snapshots.last().unwrap();
        let histogram = last.macd.unwrap() - last.macd_signal.unwrap();
        assert!(close(last.macd_histogram.unwrap(), histogram));
    }

    #[test]
    fn window_is_bounded() {
        let mut window = PriceWindow::new(3);
        for price in [1.0, 2.0, 3.0, 4.0, 5.0] {
            window.push(price);
        }
        assert_eq!(window.len(), 3);
    }
}
