use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfigDto {
    #[serde(default = "default_worker_name")]
    pub worker_name: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Local directory where remote jobs are packaged before upload.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    #[serde(default)]
    pub computers_file: Option<String>,
    /// Store snapshot loaded on start and written on exit.
    #[serde(default)]
    pub store_snapshot: Option<String>,
}

impl Default for EngineConfigDto {
    fn default() -> Self {
        EngineConfigDto {
            worker_name: default_worker_name(),
            pool_size: default_pool_size(),
            log_dir: default_log_dir(),
            staging_dir: default_staging_dir(),
            computers_file: None,
            store_snapshot: None,
        }
    }
}

fn default_worker_name() -> String {
    "localhost".to_string()
}

fn default_pool_size() -> usize {
    4
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_staging_dir() -> String {
    std::env::temp_dir().join("nodeflow").to_string_lossy().into_owned()
}
