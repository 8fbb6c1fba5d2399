use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser, Debug)]
#[command(
    author = "hua0512 <https://github.com/hua0512>",
    version,
    about = "Caching HTTPS proxy for object storage",
    long_about = "Serves objects from an object-storage service and a video host through a\n\
                  content-addressed disk cache. Misses are fetched with time-bounded signed\n\
                  URLs, encrypted objects are decrypted at rest, and byte ranges are served\n\
                  straight from the cache."
)]
pub struct CliArgs {
    /// Port to listen on
    #[arg(short, long, env = "CLOUD_PROXY_PORT", default_value_t = 63446)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "CLOUD_PROXY_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Root directory of the disk cache
    #[arg(long, env = "CLOUD_PROXY_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Access key id used to sign upstream requests
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: String,

    /// Secret access key used to sign upstream requests
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: String,

    /// Expected value of the `auth` cookie
    #[arg(long, env = "CLOUD_PROXY_AUTH_COOKIE", hide_env_values = true)]
    pub auth_cookie: String,

    /// Request path that is served without the auth cookie
    #[arg(long, env = "CLOUD_PROXY_AUTH_PATH")]
    pub auth_path: Option<String>,

    /// PEM private key of the HTTPS listener
    #[arg(long, env = "CLOUD_PROXY_SERVER_KEY")]
    pub server_key: PathBuf,

    /// PEM certificate chain of the HTTPS listener
    #[arg(long, env = "CLOUD_PROXY_SERVER_CERTIFICATE")]
    pub server_certificate: PathBuf,

    /// JSON object mapping file extensions to MIME types
    #[arg(long, env = "MIME_TYPES_FILE")]
    pub mime_types_file: PathBuf,

    /// Passphrase for objects whose upstream metadata names a cipher
    #[arg(long, env = "CLOUD_PROXY_PASSPHRASE", hide_env_values = true)]
    pub passphrase: Option<String>,

    /// Base URL of the video host; the `video` namespace is disabled without it
    #[arg(long, env = "CLOUD_PROXY_VIDEO_BASE_URL")]
    pub video_base_url: Option<String>,

    /// Remote addresses that are not reported at warn level (repeatable)
    #[arg(long = "trusted-address", default_value = "127.0.0.1")]
    pub trusted_addresses: Vec<IpAddr>,

    /// Command run after each fetch, with the entry path appended, e.g. "meta checksum"
    #[arg(long, env = "CLOUD_PROXY_POST_FETCH_HOOK")]
    pub post_fetch_hook: Option<String>,

    /// Overall timeout of one upstream fetch in seconds, 0 for none
    #[arg(long, default_value_t = 0)]
    pub fetch_timeout: u64,

    /// Connect timeout for upstream requests in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl CliArgs {
    /// The hook command split on whitespace.
    pub fn post_fetch_command(&self) -> Option<Vec<String>> {
        self.post_fetch_hook
            .as_deref()
            .map(|hook| hook.split_whitespace().map(str::to_string).collect())
    }
}
