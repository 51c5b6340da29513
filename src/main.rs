use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use lendsync::{
    load_loan_numbers, AuthedClient, Cli, Command, Dataset, HttpTransport, OAuthClient,
    PaymentPlan, PullContext, PullError, Resource, ResourceQuery,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("{}: {err:#}", env!("CARGO_PKG_NAME"));
        process::exit(1);
    }
    if let Err(err) = run(cli) {
        let code = err
            .downcast_ref::<PullError>()
            .map(PullError::exit_code)
            .unwrap_or(1);
        error!(exit_code = code, "{err:#}");
        eprintln!("{}: {err:#}", env!("CARGO_PKG_NAME"));
        process::exit(code);
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {:?}", path))?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
    installed
        .map_err(|err| anyhow!(err))
        .context("failed to install tracing subscriber")
}

fn run(cli: Cli) -> Result<()> {
    info!(command = ?cli.command, "starting pull");
    let options = cli.run_options();
    let policy = cli.request_policy();

    // payments read their keys from disk before any request is made
    let loan_numbers = if matches!(cli.command, Command::Payments { .. }) {
        let loans = Dataset::new(options.data_dir.join(Resource::Loans.dataset_file()));
        load_loan_numbers(&loans).context("failed to load loan numbers; pull loans first")?
    } else {
        Vec::new()
    };

    info!("initiating connection...");
    let oauth = OAuthClient::new(cli.token_url.clone(), cli.credentials(), cli.timeout())
        .context("failed to build token client")?;
    let token = oauth.initiate(&policy)?;
    let transport = HttpTransport::new(&cli.timezone, cli.timeout())
        .context("failed to build HTTP client")?;
    let client = AuthedClient::new(transport, oauth, policy);
    let mut ctx = PullContext::new(client, token, cli.api_base_url()?, options);

    let summary = match cli.command {
        Command::Loans => ctx.pull(ResourceQuery::new(Resource::Loans))?,
        Command::Notes => ctx.pull(ResourceQuery::new(Resource::Notes))?,
        Command::Listings { filter } => ctx.pull(ResourceQuery::listings(filter))?,
        Command::Payments {
            since,
            batch_size,
            window_days,
        } => {
            let plan = PaymentPlan {
                batch_size,
                window_days,
                since,
                until: Local::now().date_naive(),
            };
            ctx.pull_payments(&loan_numbers, &plan)?
        }
    };

    info!(
        resource = ?summary.resource,
        records = summary.records_written,
        pages = summary.pages,
        path = %summary.path.display(),
        "done"
    );
    println!(
        "{} records written to {}",
        summary.records_written,
        summary.path.display()
    );
    Ok(())
}
