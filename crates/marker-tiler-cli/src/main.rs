mod report;
mod settings;

use settings::Settings;
use tracing_subscriber::EnvFilter;

fn main() {
    // Default to info logs unless RUST_LOG says otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_cli();
    tracing::debug!(?settings, "Parsed settings");

    if let Err(err) = report::run(&settings) {
        tracing::error!(%err, "Failed to build tile report");
        std::process::exit(1);
    }
}
