use anyhow::Result;
use colored::Colorize;
use peerchat::{
    app,
    cli::{Cli, Commands, ConfigAction},
    config::Config,
    init_logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load configuration
    let mut config = Config::load_or_default(&cli.config_file);
    config.apply_env_overrides();

    let level = if cli.verbose || cli.log_level != "info" {
        cli.effective_log_level()
    } else {
        config.log.level.clone()
    };
    let _log_guard = init_logging(&level, config.log.file_path.as_deref())?;

    tracing::info!("peerchat starting...");
    tracing::debug!("CLI arguments: {:?}", cli);

    match cli.command() {
        Commands::Run {
            server,
            token,
            allow,
        } => {
            if let Some(server) = server {
                config.signaling.server_url = server;
            }
            if let Some(token) = token {
                config.signaling.token = token;
            }
            config.allowed_remote_ids.extend(allow);
            app::run_session(config).await?;
        }
        Commands::Config { action } => match action {
            Some(ConfigAction::Show) => config.display()?,
            Some(ConfigAction::Reset) => {
                Config::default().save_to_file(&cli.config_file)?;
                println!(
                    "{} {}",
                    "Configuration reset:".green(),
                    cli.config_file
                );
            }
            None => Config::display_help()?,
        },
        Commands::Demo => app::demo::run_demo().await?,
    }

    Ok(())
}
