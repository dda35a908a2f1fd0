use std::path::Path;

use crate::api::engine_config_dto::EngineConfigDto;
use crate::api::nodetree_dto::NodeTreeDto;
use crate::domain::executor::registry::ExecutorRegistry;
use crate::domain::model::builder;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Reads a nodetree submission and checks it against `registry` before anything is stored.
pub fn load_nodetree(file_path: impl AsRef<Path>, registry: &ExecutorRegistry) -> Result<NodeTreeDto> {
    let file_path = file_path.as_ref();
    let dto: NodeTreeDto = parse_json_file(file_path)?;
    log::info!("Nodetree '{}' parsed from '{}' ({} nodes).", dto.name, file_path.display(), dto.nodes.len());

    builder::validate(&dto, registry)?;
    log::info!("Nodetree '{}' is valid.", dto.name);

    Ok(dto)
}

/// Engine settings from `file_path`, or the defaults when no file is given.
pub fn load_engine_config(file_path: Option<&Path>) -> Result<EngineConfigDto> {
    match file_path {
        Some(path) => parse_json_file(path),
        None => Ok(EngineConfigDto::default()),
    }
}
