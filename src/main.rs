fn is_json_mode_args() -> bool {
    std::env::args().any(|arg| arg == "--json" || arg == "--robot")
}

fn report(err: &olap_explorer::CliError) -> ! {
    if err.code == 0 {
        // --help / --version
        print!("{}", err.message);
        std::process::exit(0);
    }
    if is_json_mode_args() {
        eprintln!("{}", err.to_json());
    } else {
        eprintln!("{}", err.message.trim_end());
        if let Some(hint) = &err.hint {
            eprintln!("hint: {hint}");
        }
    }
    std::process::exit(err.code);
}

fn main() -> anyhow::Result<()> {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let raw_args: Vec<String> = std::env::args().collect();
    let parsed = match olap_explorer::parse_cli(raw_args) {
        Ok(parsed) => parsed,
        Err(err) => report(&err),
    };

    match olap_explorer::run_with_parsed(parsed) {
        Ok(()) => Ok(()),
        Err(err) => report(&err),
    }
}
