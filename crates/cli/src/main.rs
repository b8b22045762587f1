use std::process::ExitCode;

fn main() -> ExitCode {
    aisle_cli::run()
}
