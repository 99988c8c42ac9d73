use crate::{errors::Error, Result};

/// Initialize tracing for one of the workspace binaries.
///
/// Default: info for our crates, warn for everything else. `RUST_LOG` wins.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,zvm=info,zvm_core=info,zvm_api=info,zvm_telegram=info,{}=info",
            service_name.replace('-', "_")
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| Error::External(format!("failed to init logging: {e}")))
}
