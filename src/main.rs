mod cli;

use clap::Parser;

use cli::{AccountsCommands, ChangesCommands, Cli, Commands, PlansCommands, SyncCommands};

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Status => cli::status::run(),
        Commands::Accounts { command } => match command {
            AccountsCommands::Add {
                label,
                currency,
                account_type,
                opening_balance,
                description,
            } => cli::accounts::add(
                &label,
                currency.as_deref(),
                &account_type,
                opening_balance,
                description.as_deref(),
            ),
            AccountsCommands::List => cli::accounts::list(),
            AccountsCommands::Delete { id } => cli::accounts::delete(id),
        },
        Commands::Sync { command } => match command {
            SyncCommands::Enable { account, name } => cli::sync::enable(account, &name),
            SyncCommands::Disable { account } => cli::sync::disable(account),
            SyncCommands::Bump { account } => cli::sync::bump(account),
        },
        Commands::Changes { command } => match command {
            ChangesCommands::List { account, sequence } => cli::changes::list(account, sequence),
            ChangesCommands::Export { account, output } => cli::changes::export(account, output),
        },
        Commands::Plans { command } => match command {
            PlansCommands::Run { instances } => cli::plans::run(&instances),
        },
        Commands::Backup { output } => cli::backup::run(output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
