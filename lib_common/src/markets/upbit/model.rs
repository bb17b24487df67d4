use serde::{Deserialize, Serialize};

/// One entry of `GET /v1/market/all`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub market: String,
    #[serde(default)]
    pub korean_name: String,
    #[serde(default)]
    pub english_name: String,
}

impl MarketInfo {
    /// Quoted in Korean won.
    pub fn is_krw(&self) -> bool {
        self.market.starts_with("KRW-")
    }
}

/// One entry of `GET /v1/ticker`. Only the fields used for ranking are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub market: String,
    pub trade_price: f64,
    pub acc_trade_volume_24h: f64,
    #[serde(default)]
    pub acc_trade_price_24h: f64,
}

impl Ticker {
    /// Last price times 24h volume; the ranking key.
    pub fn turnover(&self) -> f64 {
        self.trade_price * self.acc_trade_volume_24h
    }
}
