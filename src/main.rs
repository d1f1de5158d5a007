mod cli;
mod commands;
mod cvwatch;
mod driver;
mod env_loader;
mod error;
mod logging;

use crate::error::CvwatchError;

fn main() {
    env_loader::load_dotenv();
    logging::init();

    if let Err(err) = cli::run() {
        match err.downcast_ref::<CvwatchError>() {
            Some(known) => eprintln!("error[{}]: {err:#}", known.code()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}
