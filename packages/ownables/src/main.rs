use clap::Parser;
use ownables::cli::{self, Command};

/// Ownables - inspect packages and event chains
#[derive(Parser, Debug)]
#[command(name = "ownables")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match cli::run(args.command).await {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
