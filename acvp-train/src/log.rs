use log::LevelFilter;

pub fn init_logging() {
    // a second call (e.g. from a test) keeps the first logger
    let _ = env_logger::builder()
        .format_target(false)
        .format_timestamp_secs()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .try_init();
}

#[cfg(test)]
#[ctor::ctor]
fn init() {
    use log::LevelFilter;
    let _ = env_logger::builder()
        .format_timestamp_secs()
        .filter_level(LevelFilter::Debug)
        .parse_default_env()
        .is_test(true)
        .try_init();
}
