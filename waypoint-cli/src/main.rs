//! Waypoint CLI Tool
//!
//! Command line interface for validating routing configuration and simulating routing decisions

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use waypoint_core::{Config, InstanceId, ServiceName};
use waypoint_loadbalance::{HealthProbe, ProbeReport, RoutingService};

#[derive(Parser)]
#[command(name = "waypoint-cli")]
#[command(about = "A CLI tool for Waypoint service routing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long, default_value = waypoint_core::config::loader::DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Route one request and print the forward target
    Route {
        /// Path to configuration file
        #[arg(short, long, default_value = waypoint_core::config::loader::DEFAULT_CONFIG_PATH)]
        config: String,
        /// Logical service name
        #[arg(short, long)]
        service: String,
        /// Request path appended to the chosen instance
        #[arg(short, long, default_value = "/")]
        path: String,
        #[command(flatten)]
        observations: Observations,
        /// Print the forward instruction as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show per-service health statistics as JSON
    Stats {
        /// Path to configuration file
        #[arg(short, long, default_value = waypoint_core::config::loader::DEFAULT_CONFIG_PATH)]
        config: String,
        #[command(flatten)]
        observations: Observations,
    },
    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "waypoint_example.toml")]
        output: String,
    },
}

/// 模拟探测结果
#[derive(Args)]
struct Observations {
    /// Observed latency, e.g. http://localhost:8081=100
    #[arg(long = "latency", value_name = "ADDR=MS")]
    latencies: Vec<String>,
    /// Health override, e.g. http://localhost:8083=false
    #[arg(long = "health", value_name = "ADDR=BOOL")]
    health: Vec<String>,
}

/// 把命令行参数当作一次探测的结果
///
/// 没有指定健康状态的实例沿用配置中的注册状态
struct ObservationProbe {
    health: HashMap<String, bool>,
    latencies: HashMap<String, Duration>,
    registered_healthy: HashMap<String, bool>,
}

impl ObservationProbe {
    fn new(config: &Config, observations: &Observations) -> Result<Self> {
        let mut health = HashMap::new();
        for entry in &observations.health {
            let (address, value) = split_observation(entry)?;
            let healthy: bool = value
                .parse()
                .with_context(|| format!("Invalid health value in '{}'", entry))?;
            health.insert(address.to_string(), healthy);
        }

        let mut latencies = HashMap::new();
        for entry in &observations.latencies {
            let (address, value) = split_observation(entry)?;
            let ms: f64 = value
                .parse()
                .with_context(|| format!("Invalid latency value in '{}'", entry))?;
            if !ms.is_finite() || ms < 0.0 {
                anyhow::bail!("Latency must be a non-negative number: '{}'", entry);
            }
            let latency = Duration::try_from_secs_f64(ms / 1000.0)
                .with_context(|| format!("Latency out of range in '{}'", entry))?;
            latencies.insert(address.to_string(), latency);
        }

        // 同一地址出现在多个服务中时，任一服务标记健康即视为健康
        let mut registered_healthy: HashMap<String, bool> = HashMap::new();
        for instance in config
            .services
            .values()
            .flat_map(|service| service.instances.iter())
        {
            *registered_healthy
                .entry(instance.address.clone())
                .or_insert(false) |= instance.healthy;
        }

        Ok(Self {
            health,
            latencies,
            registered_healthy,
        })
    }
}

#[async_trait]
impl HealthProbe for ObservationProbe {
    async fn probe(&self, instance: &InstanceId) -> ProbeReport {
        let address = instance.as_str();
        let healthy = self
            .health
            .get(address)
            .or_else(|| self.registered_healthy.get(address))
            .copied()
            .unwrap_or(false);

        ProbeReport {
            healthy,
            latency: self.latencies.get(address).copied(),
        }
    }
}

fn split_observation(entry: &str) -> Result<(&str, &str)> {
    entry
        .rsplit_once('=')
        .filter(|(address, value)| !address.is_empty() && !value.is_empty())
        .ok_or_else(|| anyhow::anyhow!("Expected ADDR=VALUE, got '{}'", entry))
}

/// 加载配置并用命令行观测值完成一轮模拟探测
async fn build_service(config_path: &str, observations: &Observations) -> Result<RoutingService> {
    let config = waypoint_core::config::loader::load_config_from_path(config_path)?;
    let probe = Arc::new(ObservationProbe::new(&config, observations)?);
    let service = RoutingService::from_config(config, probe)?;

    let summary = service.trigger_health_check().await;
    tracing::info!(
        "Seeded {} instances ({} healthy)",
        summary.total_instances,
        summary.healthy_instances
    );
    Ok(service)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => {
            println!("Validating configuration file: {}", config);
            let cfg = waypoint_core::config::loader::load_config_from_path(&config)?;
            match cfg.validate() {
                Ok(()) => {
                    println!("✅ Configuration is valid");
                    println!("  - {} services configured", cfg.services.len());
                    println!("  - {} instances configured", cfg.total_instances());
                }
                Err(e) => {
                    eprintln!("❌ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Route {
            config,
            service,
            path,
            observations,
            json,
        } => {
            let routing = build_service(&config, &observations).await?;
            let service_name = ServiceName::new(service.as_str())?;

            match routing.route(&service_name, &path) {
                Ok(instruction) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&instruction)?);
                    } else {
                        println!("✅ {} {} -> {}", service_name, path, instruction.target_address);
                        println!("  - instance: {}", instruction.instance_id);
                        println!("  - request id: {}", instruction.request_id);
                        println!("  - timeout: {}ms", instruction.timeout.as_millis());
                    }
                }
                Err(e) => {
                    eprintln!("❌ Routing failed ({}): {}", e.status_code(), e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Stats {
            config,
            observations,
        } => {
            let routing = build_service(&config, &observations).await?;
            let stats: std::collections::BTreeMap<_, _> = routing
                .health_stats()
                .into_iter()
                .map(|(name, stats)| (name.to_string(), stats))
                .collect();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::GenerateConfig { output } => {
            println!("Generating configuration file: {}", output);
            generate_config_file(&output)?;
            println!("✅ Configuration file generated successfully");
        }
    }

    Ok(())
}

/// 生成配置文件
fn generate_config_file(output_path: &str) -> Result<()> {
    let config_content = r#"# Waypoint Routing Configuration File

[settings]
# EWMA smoothing factor for latency estimates, in (0, 1]
latency_smoothing_factor = 0.2
# "deprioritize" sorts never-observed instances last, "prefer" sorts them first
unobserved_latency = "deprioritize"
forward_timeout_ms = 5000
health_check_interval_seconds = 10
health_check_timeout_ms = 2000
# Treat 5xx responses like connection failures and evict the instance
evict_on_server_error = false

[services.product-service]
instances = [
    { address = "http://localhost:8081", healthy = true },
    { address = "http://localhost:8082", healthy = true },
    { address = "http://localhost:8083" },
]

[services.board-service]
instances = [
    { address = "http://localhost:9081", healthy = true },
]
"#;

    std::fs::write(output_path, config_content)
        .with_context(|| format!("Failed to write '{}'", output_path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::{GlobalSettings, InstanceConfig, ServiceConfig};

    fn create_test_config() -> Config {
        let mut services = HashMap::new();
        services.insert(
            "product-service".to_string(),
            ServiceConfig {
                instances: vec![
                    InstanceConfig {
                        address: "http://localhost:8081".to_string(),
                        healthy: true,
                    },
                    InstanceConfig {
                        address: "http://localhost:8083".to_string(),
                        healthy: false,
                    },
                ],
            },
        );
        Config {
            settings: GlobalSettings::default(),
            services,
        }
    }

    #[test]
    fn test_split_observation() {
        assert_eq!(
            split_observation("http://localhost:8081=100").unwrap(),
            ("http://localhost:8081", "100")
        );
        assert!(split_observation("http://localhost:8081").is_err());
        assert!(split_observation("http://localhost:8081=").is_err());
    }

    #[tokio::test]
    async fn test_observation_probe_overrides_registration_health() {
        let observations = Observations {
            latencies: vec!["http://localhost:8081=100".to_string()],
            health: vec!["http://localhost:8083=true".to_string()],
        };
        let probe = ObservationProbe::new(&create_test_config(), &observations).unwrap();

        let a = probe
            .probe(&InstanceId::new("http://localhost:8081").unwrap())
            .await;
        assert!(a.healthy);
        let latency_ms = a.latency.unwrap().as_secs_f64() * 1000.0;
        assert!((latency_ms - 100.0).abs() < 1e-6);

        let c = probe
            .probe(&InstanceId::new("http://localhost:8083").unwrap())
            .await;
        assert!(c.healthy);
        assert_eq!(c.latency, None);

        let unknown = probe
            .probe(&InstanceId::new("http://localhost:9999").unwrap())
            .await;
        assert!(!unknown.healthy);
    }

    #[test]
    fn test_observation_probe_rejects_bad_values() {
        let observations = Observations {
            latencies: vec!["http://localhost:8081=-5".to_string()],
            health: vec![],
        };
        assert!(ObservationProbe::new(&create_test_config(), &observations).is_err());

        let observations = Observations {
            latencies: vec![],
            health: vec!["http://localhost:8081=maybe".to_string()],
        };
        assert!(ObservationProbe::new(&create_test_config(), &observations).is_err());
    }

    #[test]
    fn test_observation_probe_rejects_out_of_range_latency() {
        let observations = Observations {
            latencies: vec!["http://localhost:8081=1e30".to_string()],
            health: vec![],
        };
        let err = ObservationProbe::new(&create_test_config(), &observations)
            .err()
            .unwrap();
        assert!(err.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn test_shared_address_is_healthy_if_any_service_says_so() {
        let mut config = create_test_config();
        config.services.insert(
            "order-service".to_string(),
            ServiceConfig {
                instances: vec![InstanceConfig {
                    address: "http://localhost:8083".to_string(),
                    healthy: true,
                }],
            },
        );
        config.services.insert(
            "board-service".to_string(),
            ServiceConfig {
                instances: vec![InstanceConfig {
                    address: "http://localhost:8081".to_string(),
                    healthy: false,
                }],
            },
        );
        let observations = Observations {
            latencies: vec![],
            health: vec![],
        };
        let probe = ObservationProbe::new(&config, &observations).unwrap();

        for address in ["http://localhost:8081", "http://localhost:8083"] {
            let report = probe.probe(&InstanceId::new(address).unwrap()).await;
            assert!(report.healthy, "{} should be healthy", address);
        }
    }
}
