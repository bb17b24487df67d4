//! # Top Markets Live Data Test
//!
//! Fetches the current top KRW markets by 24h turnover from the Upbit REST
//! API through lib_common and prints the ranking and the subscription frame
//! the broadcaster would send for it.

use clap::Parser;
use lib_common::ingestors::subscription_frame;
use lib_common::markets::{RankingSource, UPBIT_REST_URL, UpbitApi};

#[derive(Parser, Debug)]
#[clap(about = "Fetch the live Upbit top-N ranking")]
struct Args {
    /// How many markets to rank.
    #[clap(long, default_value_t = 10)]
    top: usize,

    /// REST API base URL.
    #[clap(long, default_value = UPBIT_REST_URL)]
    rest_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // // Statement: One attempt only, a live check should fail fast
    let api = UpbitApi::new(&args.rest_url)?.with_retry(1, std::time::Duration::ZERO);

    println!("[*] Requesting top {} markets from {}...", args.top, args.rest_url);

    match api.fetch_top_n(args.top).await {
        Ok(ranking) => {
            println!("\n[SUCCESS] Ranking received:");
            println!("-----------------------------------------------");
            println!("{}", serde_json::to_string_pretty(&ranking)?);
            println!("-----------------------------------------------");
            println!("[INFO] Subscription frame: {}", subscription_frame("live-test", &ranking)?);
        }
        Err(e) => {
            eprintln!("\n[ERROR] Top markets retrieval failed:");
            eprintln!(">>> {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
