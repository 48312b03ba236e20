//! Dot-per-interval progress reporting for `load`.

use std::{
    io::Write,
    num::NonZeroU64,
    sync::{Mutex, PoisonError},
};

use geoload_core::Progress;
use log::warn;

/// Writes one `.` every `interval` written records.
pub(crate) struct DotProgress<'a> {
    interval: NonZeroU64,
    out: Mutex<&'a mut (dyn Write + Send)>,
}

impl<'a> DotProgress<'a> {
    pub(crate) fn new(interval: NonZeroU64, out: &'a mut (dyn Write + Send)) -> Self {
        Self {
            interval,
            out: Mutex::new(out),
        }
    }

    /// Hand back the writer once loading has finished.
    pub(crate) fn into_inner(self) -> &'a mut (dyn Write + Send) {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Progress for DotProgress<'_> {
    fn record_written(&self, total: u64) {
        if total % self.interval.get() != 0 {
            return;
        }
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = out.write_all(b".").and_then(|()| out.flush()) {
            warn!("failed to report progress: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 5, ".....")]
    #[case(2, 5, "..")]
    #[case(10, 5, "")]
    fn writes_one_dot_per_interval(
        #[case] interval: u64,
        #[case] writes: u64,
        #[case] expected: &str,
    ) {
        let mut buffer = Vec::<u8>::new();
        let interval = NonZeroU64::new(interval).expect("non-zero");
        let progress = DotProgress::new(interval, &mut buffer);
        for total in 1..=writes {
            progress.record_written(total);
        }
        progress.into_inner();
        assert_eq!(String::from_utf8(buffer).expect("UTF-8"), expected);
    }
}
