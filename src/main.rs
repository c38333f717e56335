use gallery_tui::RunOptions;

enum Cli {
    Exit(i32),
    Run(RunOptions),
}

fn main() {
    let opts = match handle_cli_flags() {
        Cli::Exit(code) => std::process::exit(code),
        Cli::Run(opts) => opts,
    };

    if let Err(err) = gallery_tui::run(opts) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn handle_cli_flags() -> Cli {
    let mut opts = RunOptions::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Gallery-TUI {}", gallery_tui::VERSION);
                return Cli::Exit(0);
            }
            "--help" | "-h" => {
                println!(
                    "Gallery-TUI - Browse a media knowledge gallery from the terminal.\n\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message\n  --fresh              Start with cleared filters\n  --server <url>       Gallery server base URL"
                );
                return Cli::Exit(0);
            }
            "--fresh" => opts.fresh = true,
            "--server" => match args.next() {
                Some(url) => opts.server = Some(url),
                None => {
                    eprintln!("error: --server needs a URL");
                    return Cli::Exit(2);
                }
            },
            other => {
                if let Some(url) = other.strip_prefix("--server=") {
                    opts.server = Some(url.to_string());
                } else {
                    eprintln!("error: unknown argument {other}");
                    return Cli::Exit(2);
                }
            }
        }
    }
    Cli::Run(opts)
}
