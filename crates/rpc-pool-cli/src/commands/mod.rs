pub mod hosts;
pub mod probe;

use std::path::Path;

use anyhow::Context;
use rpc_pool::ClientConfig;

pub(crate) fn load_config(path: &str) -> anyhow::Result<ClientConfig> {
    ClientConfig::from_file(Path::new(path)).with_context(|| format!("loading {path}"))
}
