// 7.0 config.rs: market configuration adapter. the engine never owns settings, it reads them
// from an external key-value store once per operation into an immutable MarketParams snapshot.
// 7.1 has the keys, 7.2 the store trait + in-memory store, 7.3 the snapshot and presets.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{MarketKey, Quote};

// 7.1: every per-market setting the engine reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKey {
    TakerFee,
    MakerFee,
    TakerFeeDeferred,
    MakerFeeDeferred,
    MaxLeverage,
    MaxMarketValue,
    MaxFundingVelocity,
    SkewScale,
    MinKeeperFee,
    MaxKeeperFee,
    LiquidationFeeRatio,
    LiquidationBufferRatio,
    MinInitialMargin,
    ConfirmationWindowRounds,
    ConfirmationWindowSeconds,
    MinDelay,
    MaxDelay,
    MaxPriceDivergence,
}

impl ParamKey {
    pub const ALL: [ParamKey; 18] = [
        ParamKey::TakerFee,
        ParamKey::MakerFee,
        ParamKey::TakerFeeDeferred,
        ParamKey::MakerFeeDeferred,
        ParamKey::MaxLeverage,
        ParamKey::MaxMarketValue,
        ParamKey::MaxFundingVelocity,
        ParamKey::SkewScale,
        ParamKey::MinKeeperFee,
        ParamKey::MaxKeeperFee,
        ParamKey::LiquidationFeeRatio,
        ParamKey::LiquidationBufferRatio,
        ParamKey::MinInitialMargin,
        ParamKey::ConfirmationWindowRounds,
        ParamKey::ConfirmationWindowSeconds,
        ParamKey::MinDelay,
        ParamKey::MaxDelay,
        ParamKey::MaxPriceDivergence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKey::TakerFee => "taker_fee",
            ParamKey::MakerFee => "maker_fee",
            ParamKey::TakerFeeDeferred => "taker_fee_deferred",
            ParamKey::MakerFeeDeferred => "maker_fee_deferred",
            ParamKey::MaxLeverage => "max_leverage",
            ParamKey::MaxMarketValue => "max_market_value",
            ParamKey::MaxFundingVelocity => "max_funding_velocity",
            ParamKey::SkewScale => "skew_scale",
            ParamKey::MinKeeperFee => "min_keeper_fee",
            ParamKey::MaxKeeperFee => "max_keeper_fee",
            ParamKey::LiquidationFeeRatio => "liquidation_fee_ratio",
            ParamKey::LiquidationBufferRatio => "liquidation_buffer_ratio",
            ParamKey::MinInitialMargin => "min_initial_margin",
            ParamKey::ConfirmationWindowRounds => "confirmation_window_rounds",
            ParamKey::ConfirmationWindowSeconds => "confirmation_window_seconds",
            ParamKey::MinDelay => "min_delay",
            ParamKey::MaxDelay => "max_delay",
            ParamKey::MaxPriceDivergence => "max_price_divergence",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

// 7.2: the external settings store. reads only, the engine never writes settings.
pub trait SettingsStore: Send + Sync {
    fn get(&self, market: &MarketKey, key: ParamKey) -> Option<Decimal>;
}

/// Settings kept in memory. used by tests, the simulator, and anything that loads settings from a file.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    values: RwLock<HashMap<(MarketKey, ParamKey), Decimal>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every key for `market` from a full parameter set.
    pub fn with_params(market: &MarketKey, params: &MarketParams) -> Self {
        let store = Self::new();
        store.set_all(market, params);
        store
    }

    pub fn set(&self, market: &MarketKey, key: ParamKey, value: Decimal) {
        if let Ok(mut values) = self.values.write() {
            values.insert((market.clone(), key), value);
        }
    }

    pub fn set_all(&self, market: &MarketKey, params: &MarketParams) {
        for key in ParamKey::ALL {
            self.set(market, key, params.raw(key));
        }
    }

    /// Parse `{"<market key>": {"<param key>": "<decimal>", ...}, ...}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let parsed: HashMap<String, HashMap<String, Decimal>> =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let store = Self::new();
        for (market, entries) in parsed {
            let market = MarketKey::new(market);
            for (name, value) in entries {
                let key = ParamKey::parse(&name).ok_or_else(|| ConfigError::UnknownKey(name.clone()))?;
                store.set(&market, key, value);
            }
        }
        Ok(store)
    }
}

impl SettingsStore for InMemorySettings {
    fn get(&self, market: &MarketKey, key: ParamKey) -> Option<Decimal> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(&(market.clone(), key)).copied())
    }
}

// 7.3: one consistent read of a market's settings. fees and ratios are fractions (0.003 = 0.3%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketParams {
    pub taker_fee: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee_deferred: Decimal,
    pub maker_fee_deferred: Decimal,
    pub max_leverage: Decimal,
    // cap on one side's open notional
    pub max_market_value: Quote,
    // max change of the daily funding rate per day, reached at full skew
    pub max_funding_velocity: Decimal,
    // skew (in base units) at which the funding velocity saturates
    pub skew_scale: Decimal,
    pub min_keeper_fee: Quote,
    pub max_keeper_fee: Quote,
    pub liquidation_fee_ratio: Decimal,
    pub liquidation_buffer_ratio: Decimal,
    pub min_initial_margin: Quote,
    pub confirmation_window_rounds: u64,
    pub confirmation_window_seconds: u64,
    pub min_delay: u64,
    pub max_delay: u64,
    // largest relative move between the two latest rounds that still counts as a usable price
    pub max_price_divergence: Decimal,
}

/// Which pair of fee rates a trade pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeSchedule {
    /// Filled on the spot at the current price.
    Immediate,
    /// Committed now and filled at a later oracle round.
    Deferred,
}

// longest delay or confirmation window a market may be configured with
pub const MAX_WINDOW_SECONDS: u64 = 30 * 86_400;

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            taker_fee: dec!(0.0035),
            maker_fee: dec!(0.002),
            taker_fee_deferred: dec!(0.0005),
            maker_fee_deferred: dec!(0.0002),
            max_leverage: dec!(10),
            max_market_value: Quote::new(dec!(10_000_000)),
            max_funding_velocity: dec!(3),
            skew_scale: dec!(1_000_000),
            min_keeper_fee: Quote::new(dec!(2)),
            max_keeper_fee: Quote::new(dec!(1000)),
            liquidation_fee_ratio: dec!(0.0035),
            liquidation_buffer_ratio: dec!(0.0025),
            min_initial_margin: Quote::new(dec!(40)),
            confirmation_window_rounds: 2,
            confirmation_window_seconds: 120,
            min_delay: 60,
            max_delay: 600,
            max_price_divergence: dec!(0.25),
        }
    }
}

impl MarketParams {
    // low fees, wide windows
    pub fn testnet() -> Self {
        Self {
            taker_fee: dec!(0.001),
            maker_fee: Decimal::ZERO,
            taker_fee_deferred: dec!(0.0001),
            maker_fee_deferred: Decimal::ZERO,
            max_leverage: dec!(25),
            confirmation_window_rounds: 5,
            confirmation_window_seconds: 600,
            ..Self::default()
        }
    }

    pub fn conservative() -> Self {
        Self {
            max_leverage: dec!(5),
            max_market_value: Quote::new(dec!(2_000_000)),
            min_initial_margin: Quote::new(dec!(100)),
            max_price_divergence: dec!(0.05),
            confirmation_window_rounds: 1,
            confirmation_window_seconds: 60,
            ..Self::default()
        }
    }

    /// (maker, taker) rates for `schedule`.
    pub fn fee_rates(&self, schedule: FeeSchedule) -> (Decimal, Decimal) {
        match schedule {
            FeeSchedule::Immediate => (self.maker_fee, self.taker_fee),
            FeeSchedule::Deferred => (self.maker_fee_deferred, self.taker_fee_deferred),
        }
    }

    /// Read every key for `market`, falling back to the default for keys the store lacks.
    pub fn load(store: &dyn SettingsStore, market: &MarketKey) -> Result<Self, ConfigError> {
        let mut params = Self::default();
        for key in ParamKey::ALL {
            if let Some(value) = store.get(market, key) {
                params.apply(key, value)?;
            }
        }
        params.validate()?;
        Ok(params)
    }

    pub fn raw(&self, key: ParamKey) -> Decimal {
        match key {
            ParamKey::TakerFee => self.taker_fee,
            ParamKey::MakerFee => self.maker_fee,
            ParamKey::TakerFeeDeferred => self.taker_fee_deferred,
            ParamKey::MakerFeeDeferred => self.maker_fee_deferred,
            ParamKey::MaxLeverage => self.max_leverage,
            ParamKey::MaxMarketValue => self.max_market_value.value(),
            ParamKey::MaxFundingVelocity => self.max_funding_velocity,
            ParamKey::SkewScale => self.skew_scale,
            ParamKey::MinKeeperFee => self.min_keeper_fee.value(),
            ParamKey::MaxKeeperFee => self.max_keeper_fee.value(),
            ParamKey::LiquidationFeeRatio => self.liquidation_fee_ratio,
            ParamKey::LiquidationBufferRatio => self.liquidation_buffer_ratio,
            ParamKey::MinInitialMargin => self.min_initial_margin.value(),
            ParamKey::ConfirmationWindowRounds => Decimal::from(self.confirmation_window_rounds),
            ParamKey::ConfirmationWindowSeconds => Decimal::from(self.confirmation_window_seconds),
            ParamKey::MinDelay => Decimal::from(self.min_delay),
            ParamKey::MaxDelay => Decimal::from(self.max_delay),
            ParamKey::MaxPriceDivergence => self.max_price_divergence,
        }
    }

    fn apply(&mut self, key: ParamKey, value: Decimal) -> Result<(), ConfigError> {
        match key {
            ParamKey::TakerFee => self.taker_fee = value,
            ParamKey::MakerFee => self.maker_fee = value,
            ParamKey::TakerFeeDeferred => self.taker_fee_deferred = value,
            ParamKey::MakerFeeDeferred => self.maker_fee_deferred = value,
            ParamKey::MaxLeverage => self.max_leverage = value,
            ParamKey::MaxMarketValue => self.max_market_value = Quote::new(value),
            ParamKey::MaxFundingVelocity => self.max_funding_velocity = value,
            ParamKey::SkewScale => self.skew_scale = value,
            ParamKey::MinKeeperFee => self.min_keeper_fee = Quote::new(value),
            ParamKey::MaxKeeperFee => self.max_keeper_fee = Quote::new(value),
            ParamKey::LiquidationFeeRatio => self.liquidation_fee_ratio = value,
            ParamKey::LiquidationBufferRatio => self.liquidation_buffer_ratio = value,
            ParamKey::MinInitialMargin => self.min_initial_margin = Quote::new(value),
            ParamKey::ConfirmationWindowRounds => self.confirmation_window_rounds = whole(key, value)?,
            ParamKey::ConfirmationWindowSeconds => self.confirmation_window_seconds = whole(key, value)?,
            ParamKey::MinDelay => self.min_delay = whole(key, value)?,
            ParamKey::MaxDelay => self.max_delay = whole(key, value)?,
            ParamKey::MaxPriceDivergence => self.max_price_divergence = value,
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, fee) in [
            (ParamKey::TakerFee, self.taker_fee),
            (ParamKey::MakerFee, self.maker_fee),
            (ParamKey::TakerFeeDeferred, self.taker_fee_deferred),
            (ParamKey::MakerFeeDeferred, self.maker_fee_deferred),
            (ParamKey::LiquidationFeeRatio, self.liquidation_fee_ratio),
            (ParamKey::LiquidationBufferRatio, self.liquidation_buffer_ratio),
        ] {
            if fee < Decimal::ZERO || fee >= Decimal::ONE {
                return Err(ConfigError::InvalidValue {
                    key: key.as_str(),
                    reason: "must be a fraction in [0, 1)".to_string(),
                });
            }
        }

        for (key, value) in [
            (ParamKey::MaxLeverage, self.max_leverage),
            (ParamKey::SkewScale, self.skew_scale),
            (ParamKey::MaxPriceDivergence, self.max_price_divergence),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::InvalidValue {
                    key: key.as_str(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        if self.max_funding_velocity < Decimal::ZERO || self.max_market_value.is_negative() {
            return Err(ConfigError::InvalidValue {
                key: ParamKey::MaxFundingVelocity.as_str(),
                reason: "funding velocity and market value caps cannot be negative".to_string(),
            });
        }

        if self.min_keeper_fee.is_negative() || self.min_keeper_fee > self.max_keeper_fee {
            return Err(ConfigError::InvalidValue {
                key: ParamKey::MinKeeperFee.as_str(),
                reason: "min keeper fee must be in [0, max keeper fee]".to_string(),
            });
        }

        for (key, seconds) in [
            (ParamKey::MaxDelay, self.max_delay),
            (ParamKey::ConfirmationWindowSeconds, self.confirmation_window_seconds),
        ] {
            if seconds > MAX_WINDOW_SECONDS {
                return Err(ConfigError::InvalidValue {
                    key: key.as_str(),
                    reason: format!("{seconds}s is longer than {MAX_WINDOW_SECONDS}s"),
                });
            }
        }

        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvalidValue {
                key: ParamKey::MinDelay.as_str(),
                reason: format!("min delay {} exceeds max delay {}", self.min_delay, self.max_delay),
            });
        }

        Ok(())
    }
}

fn whole(key: ParamKey, value: Decimal) -> Result<u64, ConfigError> {
    if !value.fract().is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.as_str(),
            reason: format!("expected a whole number, got {value}"),
        });
    }
    value.to_u64().ok_or(ConfigError::InvalidValue {
        key: key.as_str(),
        reason: format!("{value} is out of range"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("unknown settings key {0}")]
    UnknownKey(String),

    #[error("settings parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn params(&self) -> MarketParams {
        match self {
            Environment::Development => MarketParams::default(),
            Environment::Testnet => MarketParams::testnet(),
            Environment::Mainnet => MarketParams::conservative(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth() -> MarketKey {
        MarketKey::new("sETH-PERP")
    }

    #[test]
    fn test_presets_valid() {
        assert!(Environment::Development.params().validate().is_ok());
        assert!(Environment::Testnet.params().validate().is_ok());
        assert!(Environment::Mainnet.params().validate().is_ok());
    }

    #[test]
    fn test_load_falls_back_to_defaults() {
        let store = InMemorySettings::new();
        store.set(&eth(), ParamKey::TakerFeeDeferred, dec!(0.001));

        let params = MarketParams::load(&store, &eth()).unwrap();
        assert_eq!(params.taker_fee_deferred, dec!(0.001));
        assert_eq!(params.max_leverage, MarketParams::default().max_leverage);
    }

    #[test]
    fn test_load_is_per_market() {
        let store = InMemorySettings::new();
        store.set(&MarketKey::new("sBTC-PERP"), ParamKey::MaxLeverage, dec!(3));

        let params = MarketParams::load(&store, &eth()).unwrap();
        assert_eq!(params.max_leverage, dec!(10));
    }

    #[test]
    fn test_round_trip_through_store() {
        let params = MarketParams::testnet();
        let store = InMemorySettings::with_params(&eth(), &params);
        assert_eq!(MarketParams::load(&store, &eth()).unwrap(), params);
    }

    #[test]
    fn test_fractional_window_rejected() {
        let store = InMemorySettings::new();
        store.set(&eth(), ParamKey::ConfirmationWindowRounds, dec!(1.5));

        let result = MarketParams::load(&store, &eth());
        assert!(matches!(result, Err(ConfigError::InvalidValue { key: "confirmation_window_rounds", .. })));
    }

    #[test]
    fn test_delay_bounds_validated() {
        let mut params = MarketParams::default();
        params.min_delay = 700;
        assert!(matches!(params.validate(), Err(ConfigError::InvalidValue { key: "min_delay", .. })));
    }

    #[test]
    fn test_window_lengths_capped() {
        let mut params = MarketParams::default();
        params.max_delay = u64::MAX;
        assert!(matches!(params.validate(), Err(ConfigError::InvalidValue { key: "max_delay", .. })));

        let store = InMemorySettings::new();
        store.set(&eth(), ParamKey::ConfirmationWindowSeconds, dec!(100_000_000));
        let result = MarketParams::load(&store, &eth());
        assert!(matches!(result, Err(ConfigError::InvalidValue { key: "confirmation_window_seconds", .. })));

        params.max_delay = MAX_WINDOW_SECONDS;
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_fee_schedules() {
        let params = MarketParams::default();
        assert_eq!(params.fee_rates(FeeSchedule::Immediate), (dec!(0.002), dec!(0.0035)));
        assert_eq!(params.fee_rates(FeeSchedule::Deferred), (dec!(0.0002), dec!(0.0005)));
    }

    #[test]
    fn test_fee_out_of_range() {
        let mut params = MarketParams::default();
        params.taker_fee = dec!(1.2);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "sETH-PERP": { "taker_fee_deferred": "0.0007", "min_delay": "30" }
        }"#;
        let store = InMemorySettings::from_json(json).unwrap();
        let params = MarketParams::load(&store, &eth()).unwrap();
        assert_eq!(params.taker_fee_deferred, dec!(0.0007));
        assert_eq!(params.min_delay, 30);
    }

    #[test]
    fn test_from_json_unknown_key() {
        let json = r#"{ "sETH-PERP": { "bogus": "1" } }"#;
        assert_eq!(
            InMemorySettings::from_json(json).unwrap_err(),
            ConfigError::UnknownKey("bogus".to_string())
        );
    }

    #[test]
    fn test_key_names_round_trip() {
        for key in ParamKey::ALL {
            assert_eq!(ParamKey::parse(key.as_str()), Some(key));
        }
    }
}
