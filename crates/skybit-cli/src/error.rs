use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{err:#}").to_lowercase();

    if msg.contains("api key not configured") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Set your backend API key with:");
        eprintln!("  {} export SKYBIT_API_KEY=<value>", "$".dimmed());
        eprintln!("  or add `api_key` under [backend] in ~/.skybit/config.toml");
    }

    if msg.contains("task not found") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  List available tasks with:");
        eprintln!("  {} skybit task list", "$".dimmed());
    }

    if msg.contains("already running") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Wait for the current run to finish, then check it with:");
        eprintln!("  {} skybit task steps <id>", "$".dimmed());
    }

    if msg.contains("already open") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Another skybit process (usually the daemon) holds the database.");
        eprintln!("  Stop it first, or point this command at another file with --db-path.");
    }

    if msg.contains("unreadable task record")
        || (msg.contains("failed to open database") && !msg.contains("already open"))
    {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  The database file is damaged. Move it aside to start fresh:");
        eprintln!(
            "  {} mv ~/.skybit/skybit.db ~/.skybit/skybit.db.bak",
            "$".dimmed()
        );
    }

    if msg.contains("connection refused") || msg.contains("network") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check your internet connection and try again.");
    }

    std::process::exit(1);
}
