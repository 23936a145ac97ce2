pub mod archive;
pub mod domain;
pub mod ingest;
pub mod momentum;
pub mod time;

#[cfg(test)]
pub(crate) mod test_support;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub data_go_kr_service_key: Option<String>,
        pub data_go_kr_base_url: Option<String>,
        pub archive_path: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                data_go_kr_service_key: non_empty_env("DATA_GO_KR_SERVICE_KEY"),
                data_go_kr_base_url: non_empty_env("DATA_GO_KR_BASE_URL"),
                archive_path: non_empty_env("MOMENTUM_ARCHIVE_PATH"),
                sentry_dsn: non_empty_env("SENTRY_DSN"),
            })
        }

        pub fn require_service_key(&self) -> anyhow::Result<&str> {
            self.data_go_kr_service_key
                .as_deref()
                .context("DATA_GO_KR_SERVICE_KEY is required")
        }
    }

    fn non_empty_env(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }
}
