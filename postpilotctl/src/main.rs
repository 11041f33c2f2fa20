use clap::Parser;

fn main() {
    postpilotctl::init_tracing();
    let cli = postpilotctl::Cli::parse();
    if let Err(err) = postpilotctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
