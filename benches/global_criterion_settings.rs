/* Shared criterion configuration, pulled into each bench with `mod`. */

use criterion::Criterion;
use std::time::Duration;

pub fn get_criterion() -> Criterion {
    Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(50)
}
