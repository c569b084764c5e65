pub mod config;
pub mod model;
pub mod process;
pub mod tribunal;

pub use config::{BatchConfig, ConfigError, DataJudConfig, parse_timezone};
pub use model::{Case, CaseId, Movement, MovementId, truncate_chars};
pub use process::ProcessNumber;
pub use tribunal::{AliasTable, ResolutionError, TribunalResolver};
