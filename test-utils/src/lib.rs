//! `test-utils` is used for testing in both `fairshare-lib` and `fairshare-bin`.
//! This crate does not depend on `fairshare-lib`, else we would get dependency cycles.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a `BinSet` from a list of bin names
///
/// ```ignore
/// let bins = bins!["mirror-a", "mirror-b"];
/// ```
#[macro_export]
macro_rules! bins {
    () => {
        fairshare_lib::BinSet::new()
    };
    ($($name:expr),+ $(,)?) => {{
        let bins: fairshare_lib::BinSet = [$($name),+].into_iter().collect();
        bins
    }};
}

/// Create a `ThrottleSpec` from a connection limit, a byte rate and an
/// optional minimum fetch interval
///
/// ```ignore
/// let spec = spec!(4, 1024, Duration::from_millis(250));
/// ```
#[macro_export]
macro_rules! spec {
    ($connections:expr, $bytes_per_second:expr $(,)?) => {
        fairshare_lib::ThrottleSpec::new($connections, $bytes_per_second)
    };
    ($connections:expr, $bytes_per_second:expr, $interval:expr $(,)?) => {
        fairshare_lib::ThrottleSpec::new($connections, $bytes_per_second)
            .min_fetch_interval($interval)
    };
}
