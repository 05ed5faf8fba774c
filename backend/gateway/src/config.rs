//! Environment-driven configuration, loaded once at startup.

use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub redis_url: String,
    pub port: u16,
    pub instance_id: String,
    pub request_timeout: Duration,
    /// Backend URLs per logical service name, e.g. "orders" -> N instance
    /// URLs. Multi-instance services are routed by `user_id mod N`;
    /// single-instance services always use index 0.
    pub backends: std::collections::HashMap<String, Vec<String>>,
}

fn parse_backend_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let redis_url = env::var("REDIS_URL").map_err(|_| "REDIS_URL environment variable not set".to_string())?;

        let orders_url =
            env::var("ORDERS_SERVICE_URL").map_err(|_| "ORDERS_SERVICE_URL environment variable not set".to_string())?;
        let payments_url = env::var("PAYMENTS_SERVICE_URL")
            .map_err(|_| "PAYMENTS_SERVICE_URL environment variable not set".to_string())?;

        let mut backends = std::collections::HashMap::new();
        backends.insert("orders".to_string(), parse_backend_list(&orders_url));
        backends.insert("payments".to_string(), parse_backend_list(&payments_url));

        let port = env::var("API_GATEWAY_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let instance_id = env::var("INSTANCE_ID").unwrap_or_else(|_| "gateway-1".to_string());

        let request_timeout = env::var("REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            redis_url,
            port,
            instance_id,
            request_timeout,
            backends,
        })
    }

    /// Picks the backend URL for `service` using `user_id mod N` affinity
    /// hashing. Returns `None` for an unknown service name.
    pub fn pick_backend(&self, service: &str, user_id: i64) -> Option<&str> {
        let urls = self.backends.get(service)?;
        if urls.is_empty() {
            return None;
        }
        let index = (user_id.unsigned_abs() as usize) % urls.len();
        Some(urls[index].as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parses_comma_separated_backend_lists() {
        let urls = parse_backend_list("http://o1:8081, http://o2:8081/");
        assert_eq!(urls, vec!["http://o1:8081", "http://o2:8081"]);
    }

    #[test]
    #[serial]
    fn missing_required_vars_is_an_error() {
        env::remove_var("REDIS_URL");
        env::remove_var("ORDERS_SERVICE_URL");
        env::remove_var("PAYMENTS_SERVICE_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn picks_instance_by_user_id_mod_n() {
        env::set_var("REDIS_URL", "redis://localhost");
        env::set_var("ORDERS_SERVICE_URL", "http://o1:8081,http://o2:8081");
        env::set_var("PAYMENTS_SERVICE_URL", "http://p1:8082");

        let config = Config::from_env().unwrap();
        assert_eq!(config.pick_backend("orders", 0), Some("http://o1:8081"));
        assert_eq!(config.pick_backend("orders", 1), Some("http://o2:8081"));
        assert_eq!(config.pick_backend("orders", 2), Some("http://o1:8081"));
        assert_eq!(config.pick_backend("payments", 42), Some("http://p1:8082"));
        assert_eq!(config.pick_backend("unknown", 1), None);

        env::remove_var("REDIS_URL");
        env::remove_var("ORDERS_SERVICE_URL");
        env::remove_var("PAYMENTS_SERVICE_URL");
    }
}
