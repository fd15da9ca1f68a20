use std::process::ExitCode;

fn main() -> ExitCode {
    fleet_updater::main()
}
