//! Configuration management for the OrderDesk sync engine

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::document::ConfigDocument;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub paths: PathSettings,
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Overrides `network.serverUrl` of the local document
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    /// Directory holding artifact versions
    pub work_dir: PathBuf,
    pub local_config: PathBuf,
    pub shadow_config: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings {
                base_url: None,
                timeout_secs: 60,
            },
            paths: PathSettings {
                work_dir: PathBuf::from("./data"),
                local_config: PathBuf::from("./data/orderdesk.json"),
                shadow_config: PathBuf::from("./data/server.json"),
            },
            schedule: ScheduleSettings {
                interval_secs: 900,
            },
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let work_dir = PathBuf::from(
            env::var("ORDERDESK_WORK_DIR").unwrap_or_else(|_| "./data".to_string()),
        );

        Settings {
            server: ServerSettings {
                base_url: env::var("ORDERDESK_SERVER_URL").ok(),
                timeout_secs: env::var("ORDERDESK_HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            },
            paths: PathSettings {
                local_config: env::var("ORDERDESK_LOCAL_CONFIG")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| work_dir.join("orderdesk.json")),
                shadow_config: env::var("ORDERDESK_SHADOW_CONFIG")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| work_dir.join("server.json")),
                work_dir,
            },
            schedule: ScheduleSettings {
                interval_secs: env::var("ORDERDESK_SYNC_INTERVAL_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .unwrap_or(900),
            },
        }
    }

    /// Central service for `doc`, unless the environment names another
    pub fn server_url(&self, doc: &ConfigDocument) -> String {
        self.server
            .base_url
            .clone()
            .unwrap_or_else(|| doc.network.server_url.clone())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    /// Interval between periodic cycles, never shorter than one second
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.schedule.interval_secs.max(1))
    }
}
