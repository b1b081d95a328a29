pub mod band_reversion;
pub mod ma_cross;

use std::sync::Arc;

use crate::engine::strategy::Strategy;
use crate::errors::AppError;

pub use band_reversion::BandReversion;
pub use ma_cross::MaCross;

/// Names of the strategies shipped with the crate.
pub fn builtin_names() -> &'static [&'static str] {
    &[MaCross::NAME, BandReversion::NAME]
}

/// Look up a built-in strategy by name.
pub fn find_strategy(name: &str) -> Result<Arc<dyn Strategy>, AppError> {
    match name {
        MaCross::NAME => Ok(Arc::new(MaCross)),
        BandReversion::NAME => Ok(Arc::new(BandReversion)),
        other => Err(AppError::StrategyNotFound(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::full_schema;

    #[test]
    fn test_every_builtin_resolves() {
        for name in builtin_names() {
            let strategy = find_strategy(name).unwrap();
            assert_eq!(strategy.name(), *name);
            let schema = full_schema(strategy.as_ref());
            assert!(schema.spec("leverage").is_some());
            assert!(!schema.optimized_specs().is_empty());
            assert!(schema.validate_domain(&schema.defaults()).is_ok());
        }
    }

    #[test]
    fn test_unknown_strategy() {
        assert!(matches!(
            find_strategy("martingale"),
            Err(AppError::StrategyNotFound(_))
        ));
    }
}
