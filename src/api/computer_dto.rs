use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputersDto {
    pub computers: Vec<ComputerDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputerDto {
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,

    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_filename: Option<String>,

    pub workdir: String,

    #[serde(default)]
    pub scheduler: SchedulerKindDto,
    #[serde(default)]
    pub transport: TransportKindDto,
    #[serde(default = "default_runner")]
    pub runner: String,
    /// Shell lines run before every remote command (module loads, `PATH` exports).
    #[serde(default)]
    pub prepend_text: Option<String>,

    #[serde(default)]
    pub retry: Option<RetryDto>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKindDto {
    #[default]
    Direct,
    Slurm,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKindDto {
    #[default]
    Ssh,
    /// Paths and commands are local to the engine host.
    Local,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RetryDto {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_port() -> u16 {
    22
}

fn default_runner() -> String {
    "nodeflow exec-job".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}
