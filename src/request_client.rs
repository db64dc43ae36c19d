use lazy_static::lazy_static;
use reqwest::ClientBuilder;
use reqwest_middleware::{ClientBuilder as ClientWithMiddlewareBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

const REPORT_RETRY_COUNT: u32 = 3;
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("migration-host/", env!("CARGO_PKG_VERSION"));

lazy_static! {
    // Client with retry middleware for error reports, they are sent in the background
    pub static ref REPORT_CLIENT: ClientWithMiddleware = ClientWithMiddlewareBuilder::new(
        ClientBuilder::new()
            .user_agent(USER_AGENT)
            .timeout(REPORT_TIMEOUT)
            .build()
            .unwrap_or_default()
    )
    .with(RetryTransientMiddleware::new_with_policy(
        ExponentialBackoff::builder().build_with_max_retries(REPORT_RETRY_COUNT)
    ))
    .build();
}
