// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{GridError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = GridError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_lock_section(cfg)?;
    validate_claim_section(cfg)?;
    validate_reclaim_section(cfg)?;
    Ok(())
}

fn validate_lock_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.lock.retry_base_ms == 0 {
        return Err(GridError::ConfigError(
            "[lock].retry_base_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.lock.retry_max_ms < cfg.lock.retry_base_ms {
        return Err(GridError::ConfigError(format!(
            "[lock].retry_max_ms ({}) must be >= retry_base_ms ({})",
            cfg.lock.retry_max_ms, cfg.lock.retry_base_ms
        )));
    }
    Ok(())
}

fn validate_claim_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.claim.max_candidates == 0 {
        return Err(GridError::ConfigError(
            "[claim].max_candidates must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_reclaim_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.reclaim.interval_ms == 0 {
        return Err(GridError::ConfigError(
            "[reclaim].interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ConfigFile::try_from(RawConfigFile::default()).unwrap();
        assert_eq!(cfg.lock.timeout_ms, 5_000);
        assert_eq!(cfg.reclaim.stale_after_ms, 3_600_000);
        assert!(cfg.claim.require_evidence);
    }

    #[test]
    fn rejects_zero_candidates() {
        let mut raw = RawConfigFile::default();
        raw.claim.max_candidates = 0;
        assert!(matches!(
            ConfigFile::try_from(raw),
            Err(GridError::ConfigError(_))
        ));
    }

    #[test]
    fn rejects_inverted_retry_bounds() {
        let mut raw = RawConfigFile::default();
        raw.lock.retry_base_ms = 100;
        raw.lock.retry_max_ms = 50;
        assert!(ConfigFile::try_from(raw).is_err());
    }

    #[test]
    fn zero_reclaim_budget_is_allowed() {
        let mut raw = RawConfigFile::default();
        raw.reclaim.stale_after_ms = 0;
        let cfg = ConfigFile::try_from(raw).unwrap();
        assert!(cfg.reclaim_stale_after().is_zero());
    }
}
