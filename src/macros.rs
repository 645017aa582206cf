#[cfg(not(test))]
macro_rules! info {
    ($($arg:tt)*) => {
        log::info!($($arg)*)
    };
}

#[cfg(test)]
macro_rules! info {
    ($($arg:tt)*) => {
        eprintln!($($arg)*)
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*)
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        log::warn!($($arg)*)
    };
}
