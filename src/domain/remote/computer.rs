use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::computer_dto::{ComputerDto, ComputersDto, SchedulerKindDto, TransportKindDto};
use crate::domain::remote::retry::RetryPolicy;
use crate::domain::utils::id::ComputerName;
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    KeyFile(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScheduler {
    /// Background process started with `nohup`, polled with `ps`.
    Direct,
    Slurm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Ssh,
    Local,
}

/// A named execution target.
#[derive(Debug, Clone)]
pub struct Computer {
    pub name: ComputerName,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    /// Always set for SSH computers.
    pub credential: Option<Credential>,
    pub workdir: String,
    pub scheduler: BatchScheduler,
    pub transport: TransportKind,
    /// Command run inside a job directory to execute the packaged node.
    pub runner: String,
    pub prepend_text: Option<String>,
    pub retry: RetryPolicy,
    pub job_timeout: Option<Duration>,
}

impl Computer {
    /// Working directory of one node's job.
    pub fn job_dir(&self, job: &str) -> String {
        format!("{}/{}", self.workdir.trim_end_matches('/'), job)
    }
}

impl TryFrom<ComputerDto> for Computer {
    type Error = Error;

    fn try_from(dto: ComputerDto) -> Result<Self> {
        let transport = match dto.transport {
            TransportKindDto::Ssh => TransportKind::Ssh,
            TransportKindDto::Local => TransportKind::Local,
        };

        let credential = match (dto.password, dto.key_filename) {
            (Some(password), None) => Some(Credential::Password(password)),
            (None, Some(key)) => Some(Credential::KeyFile(PathBuf::from(key))),
            (Some(_), Some(_)) => {
                return Err(Error::ConfigError(format!("Computer '{}' sets both password and keyFilename", dto.name)));
            }
            (None, None) if transport == TransportKind::Ssh => {
                return Err(Error::ConfigError(format!("Computer '{}' needs either a password or a keyFilename", dto.name)));
            }
            (None, None) => None,
        };

        if dto.workdir.trim().is_empty() {
            return Err(Error::ConfigError(format!("Computer '{}' has an empty workdir", dto.name)));
        }

        let scheduler = match dto.scheduler {
            SchedulerKindDto::Direct => BatchScheduler::Direct,
            SchedulerKindDto::Slurm => BatchScheduler::Slurm,
        };

        Ok(Computer {
            name: ComputerName::new(dto.name),
            hostname: dto.hostname,
            port: dto.port,
            username: dto.username,
            credential,
            workdir: dto.workdir,
            scheduler,
            transport,
            runner: dto.runner,
            prepend_text: dto.prepend_text.filter(|text| !text.trim().is_empty()),
            retry: dto.retry.as_ref().map(RetryPolicy::from).unwrap_or_default(),
            job_timeout: dto.job_timeout_secs.map(Duration::from_secs),
        })
    }
}

/// Computers by name, loaded from the computers configuration file.
#[derive(Debug, Clone, Default)]
pub struct ComputerRegistry {
    computers: HashMap<ComputerName, Computer>,
}

impl ComputerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dto(dto: ComputersDto) -> Result<Self> {
        let mut registry = ComputerRegistry::new();
        for computer_dto in dto.computers {
            let computer = Computer::try_from(computer_dto)?;
            if registry.computers.contains_key(&computer.name) {
                return Err(Error::ConfigError(format!("Computer '{}' is defined twice", computer.name)));
            }
            registry.insert(computer);
        }
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let dto: ComputersDto = parse_json_file(path.as_ref())?;
        let registry = Self::from_dto(dto)?;
        log::info!("[Computers] Loaded {} computer(s) from '{}'", registry.computers.len(), path.as_ref().display());
        Ok(registry)
    }

    pub fn insert(&mut self, computer: Computer) {
        self.computers.insert(computer.name.clone(), computer);
    }

    pub fn get(&self, name: &ComputerName) -> Result<&Computer> {
        self.computers.get(name).ok_or_else(|| Error::UnknownComputer(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.computers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto_json(extra: &str) -> String {
        format!(r#"{{"computers": [{{"name": "hpc", "hostname": "login.example.org", "username": "me", "workdir": "/scratch/me"{}}}]}}"#, extra)
    }

    #[test]
    fn key_file_computer_uses_defaults() {
        let dto: ComputersDto = serde_json::from_str(&dto_json(r#", "keyFilename": "~/.ssh/id_ed25519""#)).unwrap();
        let registry = ComputerRegistry::from_dto(dto).unwrap();
        let hpc = registry.get(&ComputerName::new("hpc")).unwrap();

        assert_eq!(hpc.port, 22);
        assert_eq!(hpc.scheduler, BatchScheduler::Direct);
        assert_eq!(hpc.runner, "nodeflow exec-job");
        assert_eq!(hpc.retry, RetryPolicy::default());
        assert_eq!(hpc.job_dir("abc"), "/scratch/me/abc");
    }

    #[test]
    fn credentials_must_be_exactly_one() {
        let both: ComputersDto = serde_json::from_str(&dto_json(r#", "password": "pw", "keyFilename": "k""#)).unwrap();
        assert!(matches!(ComputerRegistry::from_dto(both), Err(Error::ConfigError(_))));

        let neither: ComputersDto = serde_json::from_str(&dto_json("")).unwrap();
        assert!(matches!(ComputerRegistry::from_dto(neither), Err(Error::ConfigError(_))));

        let local: ComputersDto = serde_json::from_str(&dto_json(r#", "transport": "local", "scheduler": "slurm""#)).unwrap();
        let registry = ComputerRegistry::from_dto(local).unwrap();
        assert_eq!(registry.get(&ComputerName::new("hpc")).unwrap().scheduler, BatchScheduler::Slurm);
    }

    #[test]
    fn unknown_computer() {
        let registry = ComputerRegistry::new();
        assert!(matches!(registry.get(&ComputerName::new("nope")), Err(Error::UnknownComputer(_))));
    }
}
