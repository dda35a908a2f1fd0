pub mod computer_dto;
pub mod engine_config_dto;
pub mod nodetree_dto;
