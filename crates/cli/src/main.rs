use std::process::ExitCode;

fn main() -> ExitCode {
    leadwise_cli::run()
}
