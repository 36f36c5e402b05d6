use anyhow::Result;
use clap::Parser;
use flex_device_plugin::app::load_catalogs;
use flex_device_plugin::app::Application;
use flex_device_plugin::config::Cli;
use flex_device_plugin::config::Commands;
use flex_device_plugin::config::DaemonArgs;
use flex_device_plugin::config::ListDevicesArgs;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = utils::logging::init();

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::ListDevices(list_args) => list_devices(list_args),
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    tracing::info!("Starting flex device plugin {}", &**version::VERSION);

    let catalogs = load_catalogs(&daemon_args.inventory).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let mut app = Application::new(daemon_args, &catalogs);

    app.run().await
}

fn list_devices(list_args: ListDevicesArgs) -> Result<()> {
    let catalogs = load_catalogs(&list_args.inventory).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    println!("{}", serde_json::to_string_pretty(&catalogs)?);
    Ok(())
}
