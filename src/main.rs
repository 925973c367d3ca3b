use clap::Parser;

use docbench::cli::Args;
use docbench::startup::{report_fatal, run};

#[tokio::main]
async fn main() {
    // Load .env
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let Some(mode) = args.mode() else {
        eprintln!(
            "docbench: no mode selected; pass one of --load, --provision, --view-query-test, --indexed-query-test"
        );
        std::process::exit(2);
    };

    if let Err(e) = run(args, mode).await {
        std::process::exit(report_fatal(&e));
    }
}
