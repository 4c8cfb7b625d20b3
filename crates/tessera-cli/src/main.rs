//! Tessera CLI - list sample devices, partition and run demonstration models.

mod partition;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tessera_hal::{ExecutionPreference, HalVersion, OperandType, OperationTuple, OperationType};
use tessera_runtime::{
    Device, DeviceRegistry, EnvProperties, MapProperties, PropertySource, StaticServiceManager,
};
use tessera_sample_driver::{SampleConfig, SampleDriver};

/// Name of the sample device running everything except FLOOR.
const FLOAT_DEVICE: &str = "sample-float";
/// Name of the sample device running only FLOOR.
const FLOOR_DEVICE: &str = "sample-floor";

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Inspect devices and partition models across them", long_about = None)]
#[command(version)]
struct Cli {
    /// Log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the sample devices and their negotiated capabilities
    Devices {
        #[command(flatten)]
        devices: DeviceArgs,
    },
    /// Partition an alternating ADD/FLOOR chain across the sample devices and run it
    Partition {
        /// Number of operations in the chain
        #[arg(short, long, default_value = "4")]
        length: usize,

        /// Execution preference used to rank devices
        #[arg(long, value_enum, default_value_t = Preference::FastSingleAnswer)]
        preference: Preference,

        #[command(flatten)]
        devices: DeviceArgs,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Property overrides (format: key=value, can be repeated)
    #[arg(short = 'p', long = "prop")]
    props: Vec<String>,

    /// Interface revision the sample drivers implement
    #[arg(long, value_enum, default_value_t = Revision::V1_2)]
    revision: Revision,
}

#[derive(Clone, Copy, ValueEnum)]
enum Revision {
    #[value(name = "v1_0")]
    V1_0,
    #[value(name = "v1_1")]
    V1_1,
    #[value(name = "v1_2")]
    V1_2,
}

impl From<Revision> for HalVersion {
    fn from(revision: Revision) -> Self {
        match revision {
            Revision::V1_0 => HalVersion::V1_0,
            Revision::V1_1 => HalVersion::V1_1,
            Revision::V1_2 => HalVersion::V1_2,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Preference {
    LowPower,
    FastSingleAnswer,
    SustainedSpeed,
}

impl From<Preference> for ExecutionPreference {
    fn from(preference: Preference) -> Self {
        match preference {
            Preference::LowPower => ExecutionPreference::LowPower,
            Preference::FastSingleAnswer => ExecutionPreference::FastSingleAnswer,
            Preference::SustainedSpeed => ExecutionPreference::SustainedSpeed,
        }
    }
}

/// Command-line overrides first, then the process environment.
struct CliProperties {
    overrides: MapProperties,
    env: EnvProperties,
}

impl PropertySource for CliProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.overrides.get(key).or_else(|| self.env.get(key))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Devices { devices } => {
            let registry = build_registry(&devices)?;
            cmd_devices(&registry);
        }
        Commands::Partition {
            length,
            preference,
            devices,
        } => {
            let registry = build_registry(&devices)?;
            partition::cmd_partition(&registry, length, preference.into())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse repeated `key=value` arguments.
fn parse_props(args: &[String]) -> Result<MapProperties> {
    let mut properties = MapProperties::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            anyhow::bail!("Invalid property format '{}'. Expected format: key=value", arg);
        };
        if key.is_empty() {
            anyhow::bail!("Empty property key in '{}'", arg);
        }
        properties.set(key, value);
    }
    Ok(properties)
}

/// Publish the two sample drivers and discover them.
fn build_registry(args: &DeviceArgs) -> Result<DeviceRegistry> {
    let overrides = parse_props(&args.props).with_context(|| "Failed to parse --prop arguments")?;
    let properties = Arc::new(CliProperties {
        overrides,
        env: EnvProperties,
    });

    let version = HalVersion::from(args.revision);
    let float_tuples = [
        OperationType::Add,
        OperationType::Sub,
        OperationType::Mul,
        OperationType::Relu,
    ]
    .map(|op| OperationTuple::new(op, OperandType::TensorFloat32));
    let floor_tuples = [OperationTuple::new(OperationType::Floor, OperandType::TensorFloat32)];

    let float = SampleConfig::default()
        .with_version(version)
        .with_supported(float_tuples);
    let floor = SampleConfig::default()
        .with_version(version)
        .with_supported(floor_tuples)
        .with_performance(0.5, 0.5);

    let manager = StaticServiceManager::new()
        .with(FLOAT_DEVICE, SampleDriver::new(FLOAT_DEVICE, float))
        .with(FLOOR_DEVICE, SampleDriver::new(FLOOR_DEVICE, floor));
    let registry = DeviceRegistry::discover(Some(&manager), properties);
    if registry.is_empty() {
        anyhow::bail!("No devices discovered");
    }
    Ok(registry)
}

fn cmd_devices(registry: &DeviceRegistry) {
    println!("Devices ({}):", registry.len());
    for device in registry.devices() {
        print_device(device);
    }
}

fn print_device(device: &Device) {
    let interface = device.interface();
    let revision = device
        .version()
        .map_or_else(|| "invalid".to_string(), |version| version.to_string());
    let (_, version_string) = interface.get_version_string();

    println!();
    println!("{}", device.name());
    println!("  Revision: {} (feature level {})", revision, device.feature_level());
    println!("  Type: {}", interface.get_type());
    println!("  Version: {}", version_string);
    println!("  Status: {:?}", interface.get_status());
    println!("  Coverage mode: {}", device.coverage_mode().value());
    println!("  Caches compilation: {}", device.caches_compilation());

    let performance = [
        ("float32", device.float32_performance()),
        ("quantized8", device.quantized8_performance()),
        ("relaxed", device.relaxed_float32_to_float16_performance()),
    ];
    for (label, info) in performance {
        println!(
            "  Performance {:<10} exec {:>8.3}  power {:>8.3}",
            label, info.exec_time, info.power_usage
        );
    }

    let tuples: Vec<_> = device.supported_operation_tuples().collect();
    println!(
        "  Supported tuples ({} of {} declared):",
        tuples.len(),
        device.capabilities().supported_operation_tuples.len()
    );
    for tuple in tuples {
        println!("    {}", tuple);
    }
}
