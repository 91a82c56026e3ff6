//! obs-studio-node server host.

use tracing::{error, info};

fn main() {
    osn_host::init_logging();
    info!("osn-host starting");

    if let Err(err) = osn_host::run(std::env::args().nth(1)) {
        error!("osn-host failed: {err:#}");
        std::process::exit(1);
    }
}
