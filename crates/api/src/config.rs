//! Server configuration, loaded from the environment.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Secret for validating bearer tokens on the checkout endpoint.
    pub jwt_secret: String,
    /// Origins allowed to call the browser-facing endpoints.
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;

        // Default to localhost for development; production sets ALLOWED_ORIGINS.
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret,
            allowed_origins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set_required_vars() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/atelier_test");
        std::env::set_var("JWT_SECRET", "test-secret");
    }

    #[test]
    #[serial]
    fn loads_with_defaults() {
        set_required_vars();
        std::env::remove_var("BIND_ADDRESS");
        std::env::remove_var("ALLOWED_ORIGINS");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.allowed_origins.len(), 2);
    }

    #[test]
    #[serial]
    fn parses_origin_list() {
        set_required_vars();
        std::env::set_var(
            "ALLOWED_ORIGINS",
            "https://atelier.example , https://www.atelier.example",
        );

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.allowed_origins,
            vec![
                "https://atelier.example".to_string(),
                "https://www.atelier.example".to_string()
            ]
        );
        std::env::remove_var("ALLOWED_ORIGINS");
    }

    #[test]
    #[serial]
    fn missing_database_url_fails() {
        std::env::remove_var("DATABASE_URL");
        std::env::set_var("JWT_SECRET", "test-secret");
        assert!(Config::from_env().is_err());
    }
}
