pub mod settings;

pub use settings::{Config, FallbackMode};

use crate::error::ExchangeError;
use std::sync::Arc;

/// Loads the application configuration from the process environment,
/// `.env` included, and validates it.
pub fn load_config() -> Result<Arc<settings::Config>, ExchangeError> {
    dotenv::dotenv().ok();

    let config = settings::Config::from_env();
    config.validate()?;
    config.log_settings();

    Ok(Arc::new(config))
}
