use clap::{Parser, Subcommand};
use utils::version;

use crate::config::daemon::{DaemonArgs, ListDevicesArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the device plugins
    Daemon(Box<DaemonArgs>),
    /// Print the device catalogs as JSON and exit
    #[command(name = "list-devices")]
    ListDevices(ListDevicesArgs),
}
