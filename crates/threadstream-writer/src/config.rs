use std::{env, path::Path, time::Duration};

use threadstream_core::StreamStatus;

/// Default minimum interval between two chunk writes of one stream.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(250);
/// Default number of finalized messages a reader loads per sync.
pub const DEFAULT_PAGE_SIZE: usize = 100;

const THROTTLE_ENV: &str = "THREADSTREAM_THROTTLE_MS";

/// Load `.env` files: the crate-local one first, then the working directory's.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Writer tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamingOptions {
    pub throttle: Duration,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            throttle: DEFAULT_THROTTLE,
        }
    }
}

impl StreamingOptions {
    /// Reads `THREADSTREAM_THROTTLE_MS`, falling back to the default.
    pub fn from_env() -> Self {
        match env::var(THROTTLE_ENV) {
            Ok(raw) => Self::default().throttle(parse_throttle(&raw)),
            Err(_) => Self::default(),
        }
    }

    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn throttle_ms(self, millis: u64) -> Self {
        self.throttle(Duration::from_millis(millis))
    }
}

fn parse_throttle(raw: &str) -> Duration {
    match raw.trim().parse::<u64>() {
        Ok(millis) => Duration::from_millis(millis),
        Err(_) => {
            tracing::warn!(value = %raw, "invalid {THROTTLE_ENV}, using default");
            DEFAULT_THROTTLE
        }
    }
}

/// Reader tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedOptions {
    pub page_size: usize,
    /// Stream statuses returned by the active-stream listing.
    pub include_statuses: Vec<StreamStatus>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            include_statuses: vec![StreamStatus::Streaming],
        }
    }
}

impl FeedOptions {
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn include_statuses(mut self, statuses: impl Into<Vec<StreamStatus>>) -> Self {
        self.include_statuses = statuses.into();
        self
    }
}
