use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct StoreConfig {
    pub catalog_path: PathBuf,
    pub records_path: PathBuf,
}

impl StoreConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        Self {
            catalog_path: base_path.join("catalog.sqlite"),
            records_path: base_path.join("records.sqlite"),
        }
    }
}
