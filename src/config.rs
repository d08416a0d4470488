use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Debug, Copy)]
pub enum CargoEnv {
    Development,
    Production,
}

#[derive(clap::Parser, Debug, Clone)]
pub struct AppConfig {
    // production or development
    #[clap(long, env, value_enum, default_value = "development")]
    pub cargo_env: CargoEnv,

    // address and port that the app will bind to
    #[clap(long, env, default_value = "0.0.0.0")]
    pub host: String,

    #[clap(long, env, default_value = "8080")]
    pub port: u16,

    // channels that are always served, comma seperated like espn,fox1,cnn
    #[clap(long, env, value_delimiter = ',')]
    pub channels: Vec<String>,

    // newline seperated channel list, this is what /upload_channels writes to
    #[clap(long, env, default_value = "channels.txt")]
    pub channels_file: String,

    // page that embeds the live m3u8, {channel} gets swapped for the channel id
    #[clap(
        long,
        env,
        default_value = "https://streamtpglobal.com/global1.php?stream={channel}"
    )]
    pub origin_page_template: String,

    // links on this domain win over everything else the page has
    #[clap(long, env, default_value = "crackstreamslivehd.com")]
    pub delivery_cdn_domain: String,

    // sent as Referer/Origin on playlist and segment fetches when the cdn checks it
    #[clap(long, env)]
    pub origin_referer: Option<String>,

    // how long an extracted link is trusted
    #[clap(long, env, default_value = "300")]
    pub cache_ttl_secs: u64,

    // how often every channel gets re-extracted in the background, keep it under the ttl so
    // clients mostly hit a warm entry
    #[clap(long, env, default_value = "240")]
    pub refresh_interval_secs: u64,

    #[clap(long, env, default_value = "4")]
    pub refresh_concurrency: usize,

    #[clap(long, env, default_value = "30")]
    pub page_timeout_secs: u64,

    #[clap(long, env, default_value = "10")]
    pub connect_timeout_secs: u64,

    // segments can be big and slow so they get their own budget
    #[clap(long, env, default_value = "120")]
    pub segment_timeout_secs: u64,

    // key for the hmac on every proxied link. Unset means a random one per process, which
    // breaks links handed out before a restart and across replicas behind a load balancer
    #[clap(long, env)]
    pub reference_secret: Option<String>,

    // max requests handled at once
    #[clap(long, env, default_value = "1000")]
    pub max_connections: usize,

    // this should be either * for allowing everything, or a comma seperated list of domains like
    // example.com,something.com
    #[clap(long, env, default_value = "*")]
    pub cors_origin: String,

    // only used in production, development logs to stdout
    #[clap(long, env, default_value = "logs")]
    pub log_dir: String,

    // optional sentry integration
    #[clap(long, env)]
    pub sentry_dsn: Option<String>,
}

impl AppConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn segment_timeout(&self) -> Duration {
        Duration::from_secs(self.segment_timeout_secs)
    }
}

impl Default for AppConfig {
    // mirrors the clap defaults, mostly here for tests
    fn default() -> Self {
        Self {
            cargo_env: CargoEnv::Development,
            host: "0.0.0.0".to_string(),
            port: 8080,
            channels: Vec::new(),
            channels_file: "channels.txt".to_string(),
            origin_page_template: "https://streamtpglobal.com/global1.php?stream={channel}"
                .to_string(),
            delivery_cdn_domain: "crackstreamslivehd.com".to_string(),
            origin_referer: None,
            cache_ttl_secs: 300,
            refresh_interval_secs: 240,
            refresh_concurrency: 4,
            page_timeout_secs: 30,
            connect_timeout_secs: 10,
            segment_timeout_secs: 120,
            reference_secret: None,
            max_connections: 1000,
            cors_origin: "*".to_string(),
            log_dir: "logs".to_string(),
            sentry_dsn: None,
        }
    }
}
