//! Binary entry point for the Flotilla CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use flotilla::{
    Account, AccountConfig, Client, ClientConfig, Cluster, ClusterError, ClusterTemplate,
    ConfigError, CreateClusterRequest, Quotas,
};

mod cli;

use cli::{Cli, Command, CredentialsCommand};

const LOG_ENV_VAR: &str = "FLOTILLA_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unable to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn client_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::load_without_cli_args()?;
    if cli.no_cache {
        config.cache = false;
    }
    if let Some(timeout) = cli.wait_timeout {
        config.wait_timeout_secs = timeout;
    }
    Ok(config)
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = client_config(&cli)?;
    let mut account = AccountConfig::load_without_cli_args()?.to_account()?;
    let client = Client::from_config(&config)?;
    if let Some(warning) = client.cache_warning() {
        tracing::warn!("{warning}");
    }
    let mut out = io::stdout().lock();
    run(&client, &mut account, cli.command, &mut out).await
}

async fn run(
    client: &Client,
    account: &mut Account,
    command: Command,
    out: &mut impl Write,
) -> Result<(), CliError> {
    match command {
        Command::Quotas => write_quotas(out, &client.quotas(account).await?)?,
        Command::Create(args) => {
            let request = CreateClusterRequest::new(&args.name, args.template, args.nodes)?;
            let cluster = client.create_cluster(account, &request, args.wait).await?;
            write_clusters(out, &[cluster])?;
        }
        Command::Get(args) => {
            let cluster = client.get_cluster(account, &args.cluster, args.wait).await?;
            write_clusters(out, &[cluster])?;
        }
        Command::List => write_clusters(out, &client.list_clusters(account).await?)?,
        Command::Templates(args) => {
            let templates = client
                .list_cluster_templates(account, args.filter.as_deref())
                .await?;
            write_templates(out, &templates)?;
        }
        Command::Resize(args) => {
            let cluster = client
                .resize_cluster(account, &args.cluster, args.nodes, args.wait)
                .await?;
            write_clusters(out, &[cluster])?;
        }
        Command::Grow(args) => {
            let cluster = client
                .grow_cluster(account, &args.cluster, args.nodes, args.wait)
                .await?;
            write_clusters(out, &[cluster])?;
        }
        Command::Autoscale(args) => {
            let enabled = args.setting == "on";
            let cluster = client.set_autoscale(account, &args.cluster, enabled).await?;
            write_clusters(out, &[cluster])?;
        }
        Command::Rebuild(args) => {
            let cluster = client
                .rebuild_cluster(account, &args.cluster, args.wait)
                .await?;
            write_clusters(out, &[cluster])?;
        }
        Command::Delete(args) => {
            let cluster = client
                .delete_cluster(account, &args.cluster, args.wait)
                .await?;
            write_clusters(out, &[cluster])?;
        }
        Command::Credentials(args) => credentials(client, account, args, out).await?,
    }
    Ok(())
}

async fn credentials(
    client: &Client,
    account: &mut Account,
    args: CredentialsCommand,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let override_path = args
        .path
        .map(Utf8PathBuf::from_path_buf)
        .transpose()
        .map_err(|path| {
            CliError::InvalidArgument(format!("{} is not valid UTF-8", path.display()))
        })?;
    let override_dir = override_path.as_deref();

    if args.remove {
        let removed = client.delete_cluster_credentials(account, &args.cluster, override_dir)?;
        if !removed {
            tracing::info!("no credentials found for {}", args.cluster);
        }
        return Ok(());
    }

    let path = if args.force {
        client
            .download_cluster_credentials(account, &args.cluster, override_dir)
            .await?
    } else {
        client
            .ensure_cluster_credentials(account, &args.cluster, override_dir)
            .await?
    };
    writeln!(out, "{path}")?;
    Ok(())
}

fn write_clusters(out: &mut impl Write, clusters: &[Cluster]) -> io::Result<()> {
    writeln!(out, "ID\tNAME\tSTATUS\tNODES\tCOE")?;
    for cluster in clusters {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            cluster.id,
            cluster.name,
            cluster.status,
            cluster.nodes,
            cluster.coe.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

fn write_templates(out: &mut impl Write, templates: &[ClusterTemplate]) -> io::Result<()> {
    writeln!(out, "ID\tNAME\tCOE\tHOST")?;
    for template in templates {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            template.id,
            template.name,
            template.coe.as_deref().unwrap_or("-"),
            template.host_type.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

fn write_quotas(out: &mut impl Write, quotas: &Quotas) -> io::Result<()> {
    let show = |value: Option<u32>| value.map_or_else(|| String::from("unknown"), |v| v.to_string());
    writeln!(out, "max clusters:\t{}", show(quotas.max_clusters))?;
    writeln!(
        out,
        "max nodes per cluster:\t{}",
        show(quotas.max_nodes_per_cluster)
    )
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
