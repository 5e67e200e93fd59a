use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const STORE_FILE: &str = "pushcast.db";
pub const USERS_FILE: &str = "users.toml";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    /// Holds the server key pair and the SQLite database.
    pub data_dir: PathBuf,
    pub users_file: PathBuf,
    pub push: PushConfig,
}

impl AppConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub contact_email: String,
    pub ttl_seconds: u32,
    /// Upper bound on queue entries attempted per run.
    pub batch_size: usize,
    /// Shortest delay the timer is ever armed with.
    pub run_delay: Duration,
    pub send_timeout: Duration,
    pub padding_target: usize,
}

#[cfg(test)]
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            data_dir: "data".into(),
            users_file: PathBuf::from("data").join(USERS_FILE),
            push: PushConfig::default(),
        }
    }
}

#[cfg(test)]
impl Default for PushConfig {
    fn default() -> Self {
        Self {
            contact_email: "ops@example.org".to_string(),
            ttl_seconds: 86_400,
            batch_size: 50,
            run_delay: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            padding_target: 0,
        }
    }
}
