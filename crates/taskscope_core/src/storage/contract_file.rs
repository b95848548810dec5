use super::{store_dir, write_private};
use crate::contract::WriteContract;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: u32 = 1;
const CONTRACT_FILE_NAME: &str = "contract.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredContract {
    schema_version: u32,
    contract: WriteContract,
}

pub fn contract_path() -> Result<PathBuf, AppError> {
    Ok(store_dir()?.join(CONTRACT_FILE_NAME))
}

pub fn load_contract(path: &Path) -> Result<Option<WriteContract>, AppError> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let stored: StoredContract =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;

    if stored.schema_version != SCHEMA_VERSION {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    Ok(Some(stored.contract))
}

pub fn save_contract(path: &Path, contract: &WriteContract) -> Result<(), AppError> {
    let stored = StoredContract {
        schema_version: SCHEMA_VERSION,
        contract: contract.clone(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;
    write_private(path, &content)
}

pub fn remove_contract(path: &Path) -> Result<(), AppError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::io(err.to_string())),
    }
}
