use std::{env, panic, process, thread};

use backtrace::Backtrace;
use clap::Parser;

use libnamelock::cli::{resolve_path, Options};
use libnamelock::logging;

fn main() {
    panic::set_hook(Box::new(|panic_info| {
        let message = match panic_info.payload().downcast_ref::<&str>() {
            Some(&message) => message.to_string(),
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(message) => message.clone(),
                None => "<no message>".to_string(),
            },
        };

        log::error!(
            "namelock crashed! You are running namelock {}.",
            env!("CARGO_PKG_VERSION")
        );
        log::error!("This is probably a namelock bug.");
        log::error!("Thread: {}", thread::current().name().unwrap_or("<unnamed>"));
        log::error!("");
        log::error!("Details: {}", message);

        if let Some(location) = panic_info.location() {
            log::error!("in file {} on line {}", location.file(), location.line());
        }

        let should_backtrace = env::var("RUST_BACKTRACE")
            .map(|var| var == "1")
            .unwrap_or(false);

        if should_backtrace {
            eprintln!("{:?}", Backtrace::new());
        } else {
            eprintln!(
                "note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace."
            );
        }

        // Tasks on the runtime's worker threads are isolated by tokio; only a
        // panic on the main thread takes the bot down.
        if panic_exits(thread::current().name()) {
            process::exit(1);
        }
    }));

    let options = Options::parse();

    let data_dir = options.subcommand.data_dir().map(resolve_path);

    let file_log_level = if env::var("NAMELOCK_NO_FILE_LOG").is_ok() {
        None
    } else {
        data_dir
            .as_deref()
            .and_then(logging::quick_read_file_log_level)
            .unwrap_or(Some(tracing::level_filters::LevelFilter::TRACE))
    };

    let command_name = format!("namelock-{}", options.subcommand.command_name());

    let _log_guard = logging::init_logging(
        options.global.verbosity,
        options.global.color,
        data_dir.as_deref(),
        file_log_level,
        &command_name,
    );

    if let Err(err) = options.run() {
        log::error!("{:?}", err);
        process::exit(1);
    }
}

fn panic_exits(thread_name: Option<&str>) -> bool {
    thread_name == Some("main")
}
