//! Command-line driver for boundary-crossing benchmarks.

use std::io::Write;

use anyhow::Context;
use clap::Parser;

use transit::{MitigationConfig, Operation, Runner};

#[derive(Parser)]
#[command(about = "Measure trust-boundary crossing costs under side-channel mitigations")]
struct Args {
    /// Operation to measure (all of them when omitted)
    #[arg(short = 't', long = "op", value_enum)]
    op: Option<Operation>,

    /// Timed iterations per operation
    #[arg(short, long, default_value_t = 1000)]
    iterations: u64,

    /// Input file for the untrusted-fetch operation
    #[arg(short, long, default_value = "test.txt")]
    file: String,

    /// Mitigation set: "none", "all", or a comma-separated list of
    /// lfence,mfence,cache,timing,constant,memory,hyperthreading
    #[arg(short, long, default_value = "none")]
    mitigations: String,

    /// Append results to this CSV file
    #[arg(short, long)]
    output: Option<String>,

    /// Create the input file and sealed fixture before running
    #[arg(short, long)]
    setup: bool,
}

const ALL_OPS: [Operation; 6] = [
    Operation::EmptyEntry,
    Operation::TriggeredExit,
    Operation::RoundTrip,
    Operation::UntrustedFetch,
    Operation::SealedFetch,
    Operation::Synthetic,
];

fn fixture_payload() -> Vec<u8> {
    let mut s = String::from("This is test data for boundary-crossing benchmarks.\n");
    for i in 0..50 {
        s.push_str(&format!("More test data {}. ", i));
    }
    s.into_bytes()
}

fn append_csv(
    path: &str,
    op: Operation,
    mitigations: &str,
    res: &transit::BenchmarkResult,
) -> anyhow::Result<()> {
    let new = !std::path::Path::new(path).exists();
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("couldn't open {}", path))?;
    if new {
        writeln!(
            f,
            "operation,mitigations,iterations,wall_ms,us_per_op,cycles,cycles_per_op"
        )?;
    }
    writeln!(
        f,
        "{},{},{},{:.3},{:.3},{},{:.1}",
        op.name(),
        mitigations,
        res.iterations,
        res.wall_time_ms,
        res.us_per_op(),
        res.cycles,
        res.cycles_per_op
    )?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = MitigationConfig::parse(&args.mitigations);
    println!("{}", config);

    let mut runner = Runner::new(config, args.file.clone());
    runner
        .configure_environment()
        .context("environment setup failed")?;

    if args.setup {
        let payload = fixture_payload();
        std::fs::write(&args.file, &payload)
            .with_context(|| format!("couldn't create {}", args.file))?;
        let sealed = runner
            .create_sealed_fixture(&payload)
            .context("couldn't create the sealed fixture")?;
        println!("[*] wrote {} and {}", args.file, sealed);
    }

    runner.warm_up().context("warm-up failed")?;

    let ops: Vec<Operation> = match args.op {
        Some(op) => vec![op],
        None => ALL_OPS.to_vec(),
    };

    for op in ops {
        let res = runner
            .run(op, args.iterations)
            .with_context(|| format!("{} run failed", op.name()))?;
        println!(
            "[*] {:<16}: {:.3} ms total, {:.3} us/op, {:.1} cycles/op",
            op.name(),
            res.wall_time_ms,
            res.us_per_op(),
            res.cycles_per_op
        );
        if let Some(out) = &args.output {
            append_csv(out, op, &args.mitigations, &res)?;
        }
    }
    Ok(())
}
