//! Binary entry point for the `zstack-machine` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use zstack_machine::{
    ConfigError, Credentials, Driver, DriverConfig, DriverError, ProcessCommandRunner,
    ReqwestTransport, SessionClient,
    SessionHandle, SshProvisioner, VmInstanceInventory, ZstackError, ZstackInstanceClient,
};

mod cli;

use cli::{Cli, Command};

const DEFAULT_LOG_FILTER: &str = "warn,zstack_machine=info";

type CliDriver = Driver<ZstackInstanceClient, SshProvisioner<ProcessCommandRunner>>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] ZstackError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("--instance-uuid (or ZSTACK_INSTANCE_UUID) is required for `{0}`")]
    MissingInstance(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(lines) => {
            write_lines(io::stdout(), &lines);
            0
        }
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<Vec<String>, CliError> {
    let instance_uuid = required_instance(&cli)?;
    let config = DriverConfig::load_without_cli_args()?;
    let session: SessionHandle = Arc::new(SessionClient::new(
        config.endpoint.as_str(),
        Credentials::new(config.account_name.as_str(), &config.account_password),
        Arc::new(ReqwestTransport::new()),
    ));

    // Validation happens here, before the session logs in.
    let mut driver = build_driver(&session, config)?;
    session.login().await?;

    let result = execute(cli.command, instance_uuid.as_deref(), &mut driver).await;
    if let Err(err) = session.teardown().await {
        warn!(error = %err, "session teardown failed");
    }
    result
}

fn required_instance(cli: &Cli) -> Result<Option<String>, CliError> {
    let uuid = cli
        .instance_uuid
        .as_deref()
        .map(str::trim)
        .filter(|uuid| !uuid.is_empty())
        .map(ToOwned::to_owned);
    if cli.command.needs_instance() && uuid.is_none() {
        return Err(CliError::MissingInstance(command_name(cli.command)));
    }
    Ok(uuid)
}

fn build_driver(session: &SessionHandle, config: DriverConfig) -> Result<CliDriver, CliError> {
    let api = ZstackInstanceClient::new(Arc::clone(session));
    let provisioner = SshProvisioner::with_process_runner(config.has_data_disk());
    Ok(Driver::new(api, provisioner, config)?)
}

async fn execute(
    command: Command,
    instance_uuid: Option<&str>,
    driver: &mut CliDriver,
) -> Result<Vec<String>, CliError> {
    if let Some(uuid) = instance_uuid
        && command.needs_instance()
    {
        driver.attach(uuid).await?;
    }

    let lines = match command {
        Command::Create => {
            driver.create().await?;
            driver.instance_uuid().map(ToOwned::to_owned).into_iter().collect()
        }
        Command::Start => driver.start().await.map(|()| Vec::new())?,
        Command::Stop => driver.stop().await.map(|()| Vec::new())?,
        Command::Kill => driver.kill().await.map(|()| Vec::new())?,
        Command::Restart => driver.restart().await.map(|()| Vec::new())?,
        Command::Remove => driver.remove().await.map(|()| Vec::new())?,
        Command::State => vec![driver.state().await?.to_string()],
        Command::Ip => vec![driver.ip().await?],
        Command::Url => vec![driver.url().await?],
        Command::List => render_instances(&driver.list().await?),
    };
    Ok(lines)
}

fn render_instances(instances: &[VmInstanceInventory]) -> Vec<String> {
    instances
        .iter()
        .map(|instance| {
            format!(
                "{}\t{}\t{}\t{}",
                instance.uuid,
                instance.name,
                instance.state,
                instance.primary_ip()
            )
        })
        .collect()
}

fn command_name(command: Command) -> String {
    format!("{command:?}").to_lowercase()
}

fn write_lines(mut target: impl Write, lines: &[String]) {
    for line in lines {
        writeln!(target, "{line}").ok();
    }
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
