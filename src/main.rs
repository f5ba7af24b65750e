mod cli;
mod viewer;

use std::process::ExitCode;

use clap::Parser;

use glyphcrop::{log_err, logger};

use cli::{CliArgs, Command};

fn main() -> ExitCode {
    // Initialize session log (overwrites previous session log)
    logger::init();

    let args = CliArgs::parse();
    let source = match args.command {
        Command::View(source) => source,
        headless => return cli::run(headless),
    };

    // -- GUI mode -----------------------------------------------------
    let loaded = cli::resolve_config(&source).and_then(|config| {
        let image = cli::load_source(&source.input)?;
        let boxes = match &source.boxes {
            Some(path) => cli::load_boxes(path)?,
            None => Vec::new(),
        };
        Ok((config, image, boxes))
    });
    let (config, image, boxes) = match loaded {
        Ok(v) => v,
        Err(e) => {
            log_err!("{}", e);
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match viewer::run(config, image, boxes) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
