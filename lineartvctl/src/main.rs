use clap::Parser;

fn main() {
    let cli = lineartvctl::Cli::parse();
    if let Err(err) = lineartvctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
