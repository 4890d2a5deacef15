//! Server configuration from environment variables

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection string
    pub database_url: String,
    /// Address the HTTP server binds to
    pub bind_addr: String,
    /// Agent notified about dead-lettered tasks and rejections
    pub supervisor: String,
    /// Agent that receives approval requests
    pub approver: String,
}

impl Config {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:foreman.db".into()),
            bind_addr: std::env::var("FOREMAN_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".into()),
            supervisor: std::env::var("FOREMAN_SUPERVISOR")
                .unwrap_or_else(|_| "supervisor".into()),
            approver: std::env::var("FOREMAN_APPROVER")
                .unwrap_or_else(|_| "operator".into()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:foreman.db".into(),
            bind_addr: "0.0.0.0:3000".into(),
            supervisor: "supervisor".into(),
            approver: "operator".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_url, "sqlite:foreman.db");
        assert_eq!(config.supervisor, "supervisor");
        assert_eq!(config.approver, "operator");
    }
}
