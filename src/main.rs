// src/main.rs
//! Hardware wallet CLI entry point
use anyhow::Result;
use clap::Parser;
use defi_hardware_wallet::cli::{Cli, Commands};
use defi_hardware_wallet::core::config::{DeviceKind, WalletConfig};
use defi_hardware_wallet::HardwareWalletError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;
    info!("Starting hw_wallet v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => WalletConfig::load(path)?,
        None => WalletConfig::load_default()?,
    };
    apply_cli_overrides(&mut config, &cli)?;

    let result = match config.device.kind {
        DeviceKind::Ledger => run_ledger(config, cli.command).await,
        DeviceKind::Trezor => run_trezor(config, cli.command).await,
    };
    if let Err(e) = &result {
        report_failure(e);
    }
    result
}

fn report_failure(err: &anyhow::Error) {
    let Some(wallet_err) = err.downcast_ref::<HardwareWalletError>() else {
        return;
    };
    if wallet_err.is_critical() {
        error!("device returned an untrustworthy signature, do not broadcast: {}", wallet_err);
    } else if wallet_err.is_retryable() {
        warn!("transient failure, the command can be retried: {}", wallet_err);
    }
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn apply_cli_overrides(config: &mut WalletConfig, cli: &Cli) -> Result<()> {
    if let Some(kind) = cli.device {
        config.device.kind = kind;
    }

    match &cli.command {
        Commands::Accounts { path, count, confirm } => {
            override_window(config, path, count);
            config.derivation.ask_confirmation |= *confirm;
        }
        Commands::Sign { path, count, chain_id, .. } => {
            override_window(config, path, count);
            if chain_id.is_some() {
                config.network.chain_id = *chain_id;
            }
        }
        Commands::AppConfig => {}
    }

    config.validate()?;
    Ok(())
}

fn override_window(config: &mut WalletConfig, path: &Option<String>, count: &Option<u32>) {
    if let Some(path) = path {
        config.derivation.path = path.clone();
    }
    if let Some(count) = count {
        config.derivation.window_size = *count;
    }
}

#[cfg(any(feature = "ledger", feature = "trezor"))]
fn chain_provider(
    config: &WalletConfig,
) -> Result<Box<dyn defi_hardware_wallet::blockchain::network::ChainIdProvider>> {
    use defi_hardware_wallet::blockchain::network::{FixedChainId, RpcNetwork};

    if let Some(chain_id) = config.network.chain_id {
        return Ok(Box::new(FixedChainId(chain_id)));
    }
    Ok(Box::new(RpcNetwork::new(&config.network.rpc_url, config.network.request_timeout())?))
}

#[cfg(feature = "ledger")]
async fn run_ledger(config: WalletConfig, command: Commands) -> Result<()> {
    use defi_hardware_wallet::hardware::LedgerHid;
    let transport = LedgerHid::new(config.device.timeout());
    run(transport, config, command).await
}

#[cfg(not(feature = "ledger"))]
async fn run_ledger(_config: WalletConfig, _command: Commands) -> Result<()> {
    anyhow::bail!("Ledger support not compiled in, rebuild with `--features ledger`")
}

#[cfg(feature = "trezor")]
async fn run_trezor(config: WalletConfig, command: Commands) -> Result<()> {
    use defi_hardware_wallet::hardware::TrezorHid;
    let transport = TrezorHid::new(config.device.timeout());
    run(transport, config, command).await
}

#[cfg(not(feature = "trezor"))]
async fn run_trezor(_config: WalletConfig, _command: Commands) -> Result<()> {
    anyhow::bail!("Trezor support not compiled in, rebuild with `--features trezor`")
}

#[cfg(any(feature = "ledger", feature = "trezor"))]
async fn run<T>(transport: T, config: WalletConfig, command: Commands) -> Result<()>
where
    T: defi_hardware_wallet::hardware::DeviceTransport,
{
    use defi_hardware_wallet::core::transaction::UnsignedTransaction;
    use defi_hardware_wallet::hardware::HardwareWallet;

    let chain = chain_provider(&config)?;
    let wallet = HardwareWallet::new(transport, chain, config);

    if !wallet.init().await {
        anyhow::bail!("{} device not found", wallet.transport().name());
    }

    match command {
        Commands::Accounts { .. } => {
            for (index, address) in wallet.get_accounts().await?.iter().enumerate() {
                let path = wallet.address_path(address).unwrap_or_default();
                println!("{}\t{}\t{}", index, address, path);
            }
        }
        Commands::Sign { tx, .. } => {
            let unsigned = UnsignedTransaction::from_json(&read_input(&tx)?)?;
            // Populates the address cache the signer resolves `from` against.
            wallet.get_accounts().await?;
            let signed = wallet.sign_transaction(&unsigned).await?;
            println!("{}", serde_json::to_string_pretty(&signed)?);
        }
        Commands::AppConfig => {
            let app = wallet.get_app_config().await?;
            println!("{} {} (flags 0x{:02x})", app.name, app.version, app.flags);
        }
    }

    Ok(())
}

#[cfg(any(feature = "ledger", feature = "trezor"))]
fn read_input(path: &std::path::Path) -> Result<String> {
    use anyhow::Context;
    use std::io::Read;

    if path == std::path::Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
