//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use geoload_cli::CliError;

fn main() {
    pretty_env_logger::init();
    if let Err(err) = geoload_cli::run() {
        // Help and version requests are reported by clap itself.
        if let CliError::ArgumentParsing(parse) = &err
            && !parse.use_stderr()
        {
            parse.exit();
        }
        eprintln!("geoload: {}: {err}", err.category());
        std::process::exit(1);
    }
}
