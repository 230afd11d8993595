//! One module per provisioning step, in run order.

pub mod os_packages;
pub mod fetch;
pub mod compat_links;
pub mod loader_path;
pub mod python_deps;
pub mod wallet;
pub mod supervisor;
