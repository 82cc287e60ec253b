use std::env;
use std::error::Error;
use std::io;
use std::process;

use student_vault::{run, Command};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("student_vault=info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = try_main() {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((data_dir, rest)) = args.split_first() else {
        return Err(student_vault::runner::USAGE.into());
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
    let command = Command::parse(&rest)?;
    run(data_dir, command, io::stdout().lock())
}
