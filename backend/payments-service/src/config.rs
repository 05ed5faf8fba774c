//! Environment-driven configuration, loaded once at startup.

use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub rabbitmq_url: String,
    pub port: u16,
    pub instance_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").map_err(|_| "DATABASE_URL environment variable not set".to_string())?;
        let rabbitmq_url =
            env::var("RABBITMQ_URL").map_err(|_| "RABBITMQ_URL environment variable not set".to_string())?;

        let port = env::var("PORT")
            .or_else(|_| env::var("PAYMENTS_SERVICE_PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8082);

        let instance_id = env::var("INSTANCE_ID").unwrap_or_else(|_| "payments-1".to_string());

        Ok(Self {
            database_url,
            rabbitmq_url,
            port,
            instance_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn missing_database_url_is_an_error() {
        env::remove_var("DATABASE_URL");
        env::remove_var("RABBITMQ_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn reads_required_and_optional_vars() {
        env::set_var("DATABASE_URL", "postgres://localhost/test");
        env::set_var("RABBITMQ_URL", "amqp://localhost//");
        env::remove_var("PORT");
        env::remove_var("PAYMENTS_SERVICE_PORT");

        let config = Config::from_env().unwrap();
        assert_eq!(config.port, 8082);

        env::remove_var("DATABASE_URL");
        env::remove_var("RABBITMQ_URL");
    }
}
