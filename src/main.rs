use colored::Colorize;
use tickwatch::{
    AppResult,
    cli::{Cli, Commands, ConfigAction},
    config::Config,
    init_logging,
    market_data::normalize_symbol,
    session::WatchSession,
};

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse_args();

    let mut config = Config::load_or_default(&cli.config_file);
    if !cli.symbols.is_empty() {
        config.symbols = cli.symbols.iter().map(|s| normalize_symbol(s)).collect();
    }
    config.validate()?;

    let _log_guard = init_logging(&cli.effective_log_level(), &config.log.file_path)?;

    tracing::info!("Tickwatch starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command() {
        Commands::Config { action } => handle_config_command(&config, action)?,
        Commands::Watch => {
            let mut session = WatchSession::new(config);
            for alert in cli.parsed_alerts()? {
                session.add_alert(alert)?;
            }

            if cli.is_dry_run_mode() {
                session.print_dry_run_summary();
                return Ok(());
            }

            println!("{}", "tickwatch - streaming watchlist".bold());
            println!("Press Ctrl-C to exit\n");
            session.run().await?;
        }
    }

    Ok(())
}

fn handle_config_command(config: &Config, action: Option<ConfigAction>) -> AppResult<()> {
    match action {
        Some(ConfigAction::Show) => config.display()?,
        Some(ConfigAction::Reset) => {
            let defaults = Config::default();
            defaults.display()?;
        }
        None => Config::display_help()?,
    }
    Ok(())
}
