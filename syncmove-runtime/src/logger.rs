use log::LevelFilter;

/// Log level for the given command line flags.
pub fn level(verbose: u8, quiet: bool, daemon: bool) -> LevelFilter {
    if daemon {
        LevelFilter::Info
    } else if quiet {
        LevelFilter::Off
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Install the terminal logger.
///
/// A daemon logs without colors and without the time and thread columns.
pub fn init(verbose: u8, quiet: bool, daemon: bool) -> Result<(), log::SetLoggerError> {
    let mut log_config = simplelog::ConfigBuilder::new();
    if daemon {
        log_config.set_time_level(LevelFilter::Off);
        log_config.set_thread_level(LevelFilter::Off);
    }

    log_config.set_target_level(LevelFilter::Off);
    log_config.set_location_level(LevelFilter::Off);
    log_config.add_filter_ignore_str("mio");

    let color_choice = if daemon {
        simplelog::ColorChoice::Never
    } else {
        simplelog::ColorChoice::Auto
    };

    simplelog::TermLogger::init(
        level(verbose, quiet, daemon),
        log_config.build(),
        simplelog::TerminalMode::Mixed,
        color_choice,
    )
}
