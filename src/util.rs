use std::path::PathBuf;

const AUTO_MONITOR_INTERVAL: &str = "AUTO_MONITOR_INTERVAL";

pub fn get_interval_override() -> Option<u64> {
    let interval_from_env = std::env::var(AUTO_MONITOR_INTERVAL);
    interval_from_env.ok().and_then(|res| res.parse().ok())
}

const AUTO_MONITOR_DATABASE_PATH: &str = "AUTO_MONITOR_DATABASE_PATH";

pub fn get_database_path_override() -> Option<PathBuf> {
    let path_from_env = std::env::var(AUTO_MONITOR_DATABASE_PATH);
    path_from_env
        .ok()
        .filter(|res| !res.trim().is_empty())
        .map(PathBuf::from)
}

const AUTO_MONITOR_RETENTION_DAYS: &str = "AUTO_MONITOR_RETENTION_DAYS";

pub fn get_retention_days_override() -> Option<u32> {
    let days_from_env = std::env::var(AUTO_MONITOR_RETENTION_DAYS);
    days_from_env.ok().and_then(|res| res.parse().ok())
}
