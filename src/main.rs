use delta_counter::dst::{run_dst_batch, summarize_batch, DeltaCounterDSTConfig};
use delta_counter::observability::{init_tracing, LogFormat};

const USAGE: &str = "usage: delta-counter-dst [calm|moderate|chaos] [SEEDS] [OPS] [--base-seed N] [--json]";

struct Args {
    mode: String,
    seeds: usize,
    ops: usize,
    base_seed: u64,
    json: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        mode: "moderate".to_string(),
        seeds: 100,
        ops: 1000,
        base_seed: 0,
        json: false,
    };

    let mut positional = 0;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => args.json = true,
            "--base-seed" => {
                let value = iter.next().ok_or("--base-seed needs a value")?;
                args.base_seed = value
                    .parse()
                    .map_err(|e| format!("bad --base-seed {:?}: {}", value, e))?;
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ => {
                match positional {
                    0 => args.mode = arg,
                    1 => args.seeds = arg.parse().map_err(|e| format!("bad SEEDS: {}", e))?,
                    2 => args.ops = arg.parse().map_err(|e| format!("bad OPS: {}", e))?,
                    _ => return Err(USAGE.to_string()),
                }
                positional += 1;
            }
        }
    }
    Ok(args)
}

// Buggify state is per thread, so the whole batch runs on one thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let args = parse_args()?;
    let config_fn: fn(u64) -> DeltaCounterDSTConfig = match args.mode.as_str() {
        "calm" => DeltaCounterDSTConfig::calm,
        "moderate" => DeltaCounterDSTConfig::moderate,
        "chaos" => DeltaCounterDSTConfig::chaos,
        other => return Err(format!("unknown mode {:?}\n{}", other, USAGE).into()),
    };

    tracing::info!(
        mode = %args.mode,
        seeds = args.seeds,
        ops = args.ops,
        base_seed = args.base_seed,
        "running delta counter DST"
    );
    let results = run_dst_batch(args.base_seed, args.seeds, args.ops, config_fn).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in results.iter().filter(|r| !r.is_success()) {
            println!("{}", result.summary());
            for violation in &result.invariant_violations {
                println!("  {}", violation);
            }
        }
        println!("{}", summarize_batch(&results));
    }

    if results.iter().all(|r| r.is_success()) {
        Ok(())
    } else {
        Err("invariant violations found".into())
    }
}
