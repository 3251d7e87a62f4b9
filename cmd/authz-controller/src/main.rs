use clap::{Parser, Subcommand};
use pkg_api::AppState;
use pkg_api::server::serve;
use pkg_constants::authz::LOCAL_CLUSTER;
use pkg_constants::network::{DEFAULT_API_ADDR, DEFAULT_API_PORT};
use pkg_constants::paths::{DEFAULT_CONFIG, DEFAULT_DATA_DIR};
use pkg_constants::state::DEFAULT_RESYNC_INTERVAL_SECS;
use pkg_controllers::{GlobalRoleBindingController, ReconcilerConfig};
use pkg_state::authz::AuthzStore;
use pkg_state::client::StateStore;
use pkg_types::config::{ControllerConfigFile, LogFormat, load_config_file};
use pkg_types::rbac::ClusterRoleTemplateBinding;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "authz-controller",
    about = "Grants the cluster roles inherited through global role bindings"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG)]
    config: String,

    /// API endpoint of the running controller
    #[arg(long, default_value = DEFAULT_API_ADDR)]
    server: String,

    /// Log output format: plain or json
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller and its API server until interrupted
    Run {
        /// Directory for SlateDB state storage
        #[arg(long)]
        data_dir: Option<String>,

        /// Port for the API server (loopback only)
        #[arg(long)]
        port: Option<u16>,

        /// Cluster that never receives inherited cluster roles (repeatable)
        #[arg(long = "exclude-cluster")]
        exclude_clusters: Vec<String>,

        /// Seconds between full resyncs
        #[arg(long)]
        resync_interval: Option<u64>,
    },
    /// Queue one global role binding for reconciliation
    Reconcile {
        /// GlobalRoleBinding name
        name: String,
    },
    /// Store GlobalRoles, GlobalRoleBindings and Clusters from a YAML file
    Apply {
        #[arg(long, short)]
        file: String,
    },
    /// List cluster role template bindings
    Bindings {
        /// Only bindings owned by this GlobalRoleBinding
        #[arg(long)]
        owner: Option<String>,
        /// Only bindings in this cluster
        #[arg(long)]
        cluster: Option<String>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)?;

    // Merge: CLI args > config file > defaults
    init_tracing(cli.log_format.or(file_cfg.log_format).unwrap_or_default());

    let server = cli.server.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Run {
            data_dir,
            port,
            exclude_clusters,
            resync_interval,
        } => {
            info!("Config file: {}", cli.config);
            let data_dir = data_dir
                .or(file_cfg.data_dir)
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
            let port = port.or(file_cfg.port).unwrap_or(DEFAULT_API_PORT);
            let excluded = if !exclude_clusters.is_empty() {
                exclude_clusters
            } else {
                file_cfg
                    .excluded_clusters
                    .unwrap_or_else(|| vec![LOCAL_CLUSTER.to_string()])
            };
            let resync = resync_interval
                .or(file_cfg.resync_interval_secs)
                .unwrap_or(DEFAULT_RESYNC_INTERVAL_SECS);
            run(data_dir, port, ReconcilerConfig::with_excluded_clusters(excluded), resync).await
        }
        Commands::Reconcile { name } => {
            let url = format!("{}/api/v1/globalrolebindings/{}/reconcile", server, name);
            let resp = client.post(&url).send().await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                anyhow::bail!("server returned {}: {}", status, body);
            }
            println!("{}", body);
            Ok(())
        }
        Commands::Apply { file } => {
            let content = std::fs::read_to_string(&file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file, e))?;
            let url = format!("{}/api/v1/apply", server);
            let resp = client.post(&url).body(content).send().await?;
            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("server returned {}: {}", status, resp.text().await?);
            }
            let applied: Vec<String> = resp.json().await?;
            for id in applied {
                println!("{} configured", id);
            }
            Ok(())
        }
        Commands::Bindings { owner, cluster } => {
            let mut url = reqwest::Url::parse(&format!(
                "{}/api/v1/clusterroletemplatebindings",
                server
            ))?;
            {
                let mut query = url.query_pairs_mut();
                if let Some(owner) = &owner {
                    query.append_pair("owner", owner);
                }
                if let Some(cluster) = &cluster {
                    query.append_pair("cluster", cluster);
                }
            }
            let resp = client.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                anyhow::bail!("server returned {}: {}", status, resp.text().await?);
            }
            let bindings: Vec<ClusterRoleTemplateBinding> = resp.json().await?;
            print_bindings(&bindings);
            Ok(())
        }
    }
}

async fn run(
    data_dir: String,
    port: u16,
    config: ReconcilerConfig,
    resync: u64,
) -> anyhow::Result<()> {
    info!("Starting authz-controller");
    info!("  Data dir:          {}", data_dir);
    info!("  Port:              {}", port);
    info!("  Excluded clusters: {:?}", config.excluded_clusters);
    info!("  Resync interval:   {}s", resync);

    // The API port acts as the instance lock: bind it before opening the store.
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind {}: {} (is another authz-controller running?)",
            addr,
            e
        )
    })?;

    let store = AuthzStore::new(StateStore::new(&data_dir).await?).await?;
    let controller = GlobalRoleBindingController::new(store.clone(), config)
        .with_resync_interval(Duration::from_secs(resync));
    let state = AppState {
        store: store.clone(),
        queue: controller.queue(),
    };
    let handle = controller.start();
    let mut api = tokio::spawn(serve(listener, state.clone()));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("Shutting down");
        }
        res = &mut api => {
            match res {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => warn!("API server failed: {:#}", e),
                Err(e) => warn!("API server task failed: {}", e),
            }
        }
    }

    api.abort();
    state.queue.shutdown();
    handle.await?;
    store.close().await?;
    Ok(())
}

fn print_bindings(bindings: &[ClusterRoleTemplateBinding]) {
    println!(
        "{:<16} {:<20} {:<20} {:<24} {}",
        "NAMESPACE", "NAME", "ROLE", "PRINCIPAL", "OWNER"
    );
    for b in bindings {
        println!(
            "{:<16} {:<20} {:<20} {:<24} {}",
            b.namespace,
            b.name,
            b.role_template_name,
            b.principal.to_string(),
            b.grb_owner().unwrap_or("-")
        );
    }

    if bindings.is_empty() {
        println!("(no bindings)");
    }
}
