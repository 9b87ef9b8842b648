mod ai;
mod categorizer;
mod cli;
mod db;
mod error;
mod expenses;
mod fmt;
mod importer;
mod invoices;
mod models;
mod normalizer;
mod reports;
mod settings;

use clap::Parser;

use cli::{Cli, Commands, ExpensesCommands, InvoicesCommands, ReportCommands, RulesCommands};

fn init_logging(verbose: bool) {
    let level = if verbose { log::LevelFilter::Info } else { log::LevelFilter::Warn };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .format_module_path(false)
        .format_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    // A .env next to the binary may carry the AI key.
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let user = cli.user;

    let result = match cli.command {
        Commands::Init {
            data_dir,
            no_ai,
            locale,
        } => cli::init::run(data_dir, user, no_ai, locale),
        Commands::Import {
            files,
            delimiter,
            locale,
        } => cli::import::run(&files, user, delimiter, locale.as_deref()).await,
        Commands::Invoices { command } => match command {
            InvoicesCommands::List => cli::invoices::list(user),
            InvoicesCommands::Show { id } => cli::invoices::show(id, user),
            InvoicesCommands::Delete { id, force } => cli::invoices::delete(id, user, force),
        },
        Commands::Expenses { command } => match command {
            ExpensesCommands::List {
                window,
                category,
                merchant,
                uncategorized,
                limit,
            } => cli::expenses::list(user, &window, category.as_deref(), merchant, uncategorized, limit),
            ExpensesCommands::Show { id } => cli::expenses::show(id, user),
            ExpensesCommands::Add {
                date,
                merchant,
                amount,
                category,
                description,
                tags,
            } => cli::expenses::add(user, &date, merchant, amount, category.as_deref(), description, tags),
            ExpensesCommands::Update {
                id,
                date,
                merchant,
                amount,
                category,
                description,
                tags,
            } => cli::expenses::update(
                user,
                id,
                date.as_deref(),
                merchant,
                amount,
                category.as_deref(),
                description,
                tags,
            ),
            ExpensesCommands::Delete { id } => cli::expenses::delete(id, user),
            ExpensesCommands::Recategorize { id } => cli::expenses::recategorize(id, user).await,
            ExpensesCommands::Suggest { merchant } => cli::expenses::suggest(&merchant, user).await,
        },
        Commands::Categorize => cli::categorize::run(user).await,
        Commands::Rules { command } => match command {
            RulesCommands::Add {
                pattern,
                category,
                match_type,
                priority,
            } => cli::rules::add(&pattern, &category, &match_type, priority),
            RulesCommands::List => cli::rules::list(),
            RulesCommands::Delete { id } => cli::rules::delete(id),
        },
        Commands::Report { command } => match command {
            ReportCommands::Summary { window, top } => cli::report::run_summary(user, &window, top),
            ReportCommands::Trend { months, by_category } => cli::report::run_trend(user, months, by_category),
            ReportCommands::Unusual {
                window,
                k,
                min_samples,
            } => cli::report::run_unusual(user, &window, k, min_samples),
            ReportCommands::Budget { months, shrinkage } => cli::report::run_budget(user, months, shrinkage),
        },
        Commands::Export {
            format,
            output,
            window,
        } => cli::export::run(user, &format, output.as_deref(), &window),
        Commands::Status => cli::status::run(user),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
