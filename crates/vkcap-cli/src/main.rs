mod probe;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use vkcap_core::config::default_config_path;
use vkcap_core::VkcapConfig;
use vkcap_layer::{Dispatch, DryRunDriver, VulkanDriver, ENTRY_POINTS};

#[derive(Parser)]
#[command(name = "vkcap")]
#[command(about = "vkcap - Vulkan call capture and handle tracking")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to $VKCAP_CONFIG or vkcap.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture scenario against the system Vulkan driver
    Probe {
        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the capture scenario against the in-process dry-run driver
    DryRun {
        /// Number of physical devices the dry-run driver reports
        #[arg(long, default_value_t = 1)]
        physical_devices: u32,

        /// Make the first call to this entry point fail
        #[arg(long)]
        fail: Option<String>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Fail if the configuration file is missing or invalid
        #[arg(long)]
        check: bool,
    },

    /// List every intercepted entry point
    EntryPoints,
}

fn main() -> anyhow::Result<()> {
    vkcap_common::init_logging();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Probe { json } => {
            let config = VkcapConfig::load_or_default(&config_path);
            info!("probing system Vulkan driver");
            let driver = VulkanDriver::new()?;
            let passed = probe::run(Arc::new(driver) as Arc<dyn Dispatch>, &config.capture, json);
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::DryRun {
            physical_devices,
            fail,
            json,
        } => {
            let config = VkcapConfig::load_or_default(&config_path);
            let driver = DryRunDriver::with_physical_devices(physical_devices);
            if let Some(name) = fail {
                let Some(call) = ENTRY_POINTS.iter().copied().find(|call| *call == name) else {
                    anyhow::bail!("unknown entry point: {}", name);
                };
                driver.queue_result(call, ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            let passed = probe::run(Arc::new(driver) as Arc<dyn Dispatch>, &config.capture, json);
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Config { check } => {
            let config = if check {
                VkcapConfig::load(&config_path)?
            } else {
                VkcapConfig::load_or_default(&config_path)
            };
            print!("{}", config.to_toml()?);
        }
        Commands::EntryPoints => {
            for name in ENTRY_POINTS {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
