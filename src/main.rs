use clap::Parser;
use color_eyre::Result;
use mood_journal::{Config, Database, Profile, cli::{Cli, Commands}};

fn main() -> Result<()> {
    // Set up error reporting with color-eyre
    color_eyre::install()?;

    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Determine profile: --dev flag enables dev mode, otherwise use prod
    let profile = if cli.dev {
        Profile::Dev
    } else {
        Profile::Prod
    };

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::get_config_path(profile)?,
    };
    let mut config = Config::load_from(&config_path, profile)?;

    let db_path = config.get_database_path();
    let db = Database::new(
        db_path.to_str()
            .ok_or_else(|| color_eyre::eyre::eyre!("Database path contains invalid UTF-8"))?
    )?;

    match cli.command {
        Commands::Write { text, date, image } => {
            mood_journal::cli::handle_write(text, date, image, &config, &db)?;
        }
        Commands::Show { date, offset } => {
            mood_journal::cli::handle_show(date, offset, &db)?;
        }
        Commands::List { from, to } => {
            mood_journal::cli::handle_list(from, to, &db)?;
        }
        Commands::Delete { date } => {
            mood_journal::cli::handle_delete(date, &db)?;
        }
        Commands::Profile { action } => {
            mood_journal::cli::handle_profile(action, &db)?;
        }
        Commands::Model { action } => {
            mood_journal::cli::handle_model(action, &mut config, &config_path)?;
        }
    }

    Ok(())
}
