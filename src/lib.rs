// Watches `snapd.seeded.service` and keeps an "installation in progress"
// notice up until the unit reports `active (exited)`.

pub mod app;
pub mod logging;
pub mod seed_glue;
