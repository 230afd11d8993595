//! oraprov configuration layer
//!
//! Every environment variable read goes through this module; provisioning code
//! accesses structured config instead of calling `std::env::var` directly.
//!
//! - `loader`: env_or, env_optional, env_bool helpers and `.env` loading
//! - `schema`: ObservabilityConfig, PathsConfig, ServerEnv
//! - `env_keys`: key constants (including legacy aliases)

pub mod env_keys;
pub mod loader;
pub mod schema;

pub use loader::{env_bool, env_optional, env_or, load_dotenv, load_dotenv_from_dir};
pub use loader::{remove_env_var, set_env_var, ScopedEnvGuard};
pub use schema::{ObservabilityConfig, PathsConfig, ServerEnv};
