//! Logging shim: routes the crate's log macros to `defmt` or `log` depending
//! on the enabled feature, and compiles them out entirely with neither.

#![allow(unused_macros)]

#[cfg(all(feature = "defmt", feature = "log"))]
compile_error!("the `defmt` and `log` features are mutually exclusive");

#[cfg(feature = "defmt")]
macro_rules! cec_log {
    (trace, $($arg:expr),*) => { defmt::trace!($($arg),*) };
    (debug, $($arg:expr),*) => { defmt::debug!($($arg),*) };
    (info,  $($arg:expr),*) => { defmt::info!($($arg),*) };
    (warn,  $($arg:expr),*) => { defmt::warn!($($arg),*) };
    (error, $($arg:expr),*) => { defmt::error!($($arg),*) };
}

#[cfg(feature = "log")]
macro_rules! cec_log {
    (trace, $($arg:expr),*) => { log::trace!($($arg),*) };
    (debug, $($arg:expr),*) => { log::debug!($($arg),*) };
    (info,  $($arg:expr),*) => { log::info!($($arg),*) };
    (warn,  $($arg:expr),*) => { log::warn!($($arg),*) };
    (error, $($arg:expr),*) => { log::error!($($arg),*) };
}

#[cfg(not(any(feature = "defmt", feature = "log")))]
macro_rules! cec_log {
    ($level:ident, $($arg:expr),*) => {{ $( let _ = &$arg; )* }};
}

macro_rules! trace {
    ($($arg:expr),* $(,)?) => (cec_log!(trace, $($arg),*));
}

macro_rules! debug {
    ($($arg:expr),* $(,)?) => (cec_log!(debug, $($arg),*));
}

macro_rules! info {
    ($($arg:expr),* $(,)?) => (cec_log!(info, $($arg),*));
}

macro_rules! warn {
    ($($arg:expr),* $(,)?) => (cec_log!(warn, $($arg),*));
}

macro_rules! error {
    ($($arg:expr),* $(,)?) => (cec_log!(error, $($arg),*));
}

/// `defmt::unwrap!` when defmt is enabled, a plain `unwrap` otherwise.
/// For invariants that hold by construction; never for fallible I/O.
#[cfg(feature = "defmt")]
macro_rules! unwrap {
    ($($arg:tt)*) => { defmt::unwrap!($($arg)*) };
}

#[cfg(not(feature = "defmt"))]
macro_rules! unwrap {
    ($arg:expr) => {
        $arg.unwrap()
    };
}
