//! Pre-trade policy checks.
//!
//! Stateless predicates over an authenticated request. The kill switch
//! is evaluated first and overrides everything else. No side effects.

use rust_decimal::Decimal;

use crate::config::Config;
use crate::error::{AgentError, Result};

pub struct PolicyEngine {
    allowed_platforms: Vec<String>,
    max_slippage_bps: u32,
    max_order_notional: Decimal,
    kill_switch: bool,
}

impl PolicyEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            allowed_platforms: config.allowed_platforms.clone(),
            max_slippage_bps: config.max_slippage_bps,
            max_order_notional: config.max_order_notional,
            kill_switch: config.kill_switch,
        }
    }

    pub fn check_kill_switch(&self) -> Result<()> {
        if self.kill_switch {
            return Err(AgentError::PolicyKillSwitch);
        }
        Ok(())
    }

    pub fn check_platform(&self, platform: &str) -> Result<()> {
        self.check_kill_switch()?;
        let platform = platform.to_lowercase();
        if !self.allowed_platforms.iter().any(|p| p == &platform) {
            return Err(AgentError::PolicyPlatformBlocked(platform));
        }
        Ok(())
    }

    pub fn check_slippage(&self, requested_bps: u32) -> Result<()> {
        self.check_kill_switch()?;
        if requested_bps > self.max_slippage_bps {
            return Err(AgentError::PolicySlippageExceeded {
                requested: requested_bps,
                max: self.max_slippage_bps,
            });
        }
        Ok(())
    }

    pub fn check_notional(&self, notional: Decimal) -> Result<()> {
        self.check_kill_switch()?;
        if notional > self.max_order_notional {
            return Err(AgentError::PolicyOrderLimit {
                notional,
                limit: self.max_order_notional,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn allow_list_is_case_insensitive() {
        let engine = PolicyEngine::new(&Config::for_tests());
        assert!(engine.check_platform("Alpha").is_ok());
        let err = engine.check_platform("shadow-exchange").unwrap_err();
        assert_eq!(err.code(), "POLICY_PLATFORM_BLOCKED");
    }

    #[test]
    fn slippage_and_notional_limits() {
        let engine = PolicyEngine::new(&Config::for_tests());
        assert!(engine.check_slippage(200).is_ok());
        assert_eq!(
            engine.check_slippage(201).unwrap_err().code(),
            "POLICY_SLIPPAGE_EXCEEDED"
        );
        assert!(engine.check_notional(dec!(500)).is_ok());
        assert_eq!(
            engine.check_notional(dec!(500.01)).unwrap_err().code(),
            "POLICY_ORDER_LIMIT"
        );
    }

    #[test]
    fn kill_switch_overrides_every_check() {
        let mut config = Config::for_tests();
        config.kill_switch = true;
        let engine = PolicyEngine::new(&config);
        assert_eq!(
            engine.check_platform("alpha").unwrap_err().code(),
            "POLICY_KILL_SWITCH"
        );
        assert_eq!(
            engine.check_slippage(1).unwrap_err().code(),
            "POLICY_KILL_SWITCH"
        );
        assert_eq!(
            engine.check_notional(dec!(1)).unwrap_err().code(),
            "POLICY_KILL_SWITCH"
        );
    }
}
